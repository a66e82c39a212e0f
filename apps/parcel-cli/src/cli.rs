use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sequential batch uploads into local containers", long_about = None)]
pub struct Cli {
    /// JSON config file (defaults to ~/.config/parcel/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload files and directories into a container directory
    Upload {
        /// files or directories, uploaded in the order given
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// container directory
        #[arg(long)]
        into: PathBuf,
        /// create the container once the batch has started
        #[arg(long)]
        create: bool,
    },
    /// Replace the contents of an existing file
    Replace {
        /// new content
        file: PathBuf,
        /// file whose contents are replaced
        #[arg(long)]
        target: PathBuf,
    },
}
