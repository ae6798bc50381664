use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Flash image on the host
    #[arg(long, short)]
    pub image: PathBuf,

    /// Erase block size in bytes
    #[arg(long, short, default_value_t = 4096)]
    pub block_size: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an erased image and format it
    Format {
        /// Image size in KiB
        #[arg(long, short, default_value_t = 1024)]
        size: u64,
    },

    /// Copy a host directory into the image
    Pack {
        /// Host directory
        #[arg(long, short)]
        source: PathBuf,

        /// Directory inside the image
        #[arg(long, short, default_value = "/")]
        dest: String,
    },

    /// List a directory of the image
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a file of the image
    Cat { path: String },
}
