//! Shared data model for Parcel batch uploads.
//!
//! Types in this crate are exchanged between the upload orchestrator and
//! transfer clients. They are plain data and serialize to camelCase JSON.

pub mod signal;
pub mod types;

pub use signal::{SessionKey, SignalKind, TransferSignal};
pub use types::{Destination, DestinationKind, Item, ItemSource, UploadParams};
