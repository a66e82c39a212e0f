//! Percentage math for progress events.

/// Percentage of `done` out of `total`, rounded up.
///
/// `done` is clamped to `total`, and a zero `total` counts as complete, so
/// the result is always in `0..=100` and any non-zero amount shows at least 1.
pub fn percent_ceil(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = u128::from(done.min(total));
    (done * 100).div_ceil(u128::from(total)) as u8
}
