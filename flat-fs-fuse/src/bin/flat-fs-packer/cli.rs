use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Directory whose regular files are copied into the image
    #[arg(long, short)]
    pub source: PathBuf,

    /// Output directory
    #[arg(long, short = 'O')]
    pub out_dir: PathBuf,

    /// Disk size in blocks
    #[arg(long, short, default_value_t = 1000)]
    pub blocks: u32,

    /// Number of inodes, which bounds the number of files
    #[arg(long, short, default_value_t = flat_fs::DEFAULT_INODES)]
    pub inodes: u32,
}
