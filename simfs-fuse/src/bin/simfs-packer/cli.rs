use clap::Parser;
use simfs::VolumeConfig;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Volume image
    #[arg(long, short)]
    pub image: PathBuf,

    /// Number of volume blocks
    #[arg(long, short, default_value_t = VolumeConfig::DEFAULT_NUMBER_OF_BLOCKS)]
    pub blocks: u32,

    /// Pack this directory tree into a fresh image
    #[arg(long, short)]
    pub source: Option<PathBuf>,

    /// List every entry of the image
    #[arg(long, short)]
    pub list: bool,

    /// Print one file of the image to stdout
    #[arg(long)]
    pub cat: Option<String>,
}
