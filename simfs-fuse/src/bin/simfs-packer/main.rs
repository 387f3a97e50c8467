mod cli;

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use cli::Cli;
use simfs::VolumeConfig;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("simfs-packer: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> simfs::Result<()> {
    let config = VolumeConfig::with_blocks(cli.blocks);

    if let Some(source) = &cli.source {
        println!("source={:?}\nimage={:?}", source, cli.image);
        let packed = simfs_fuse::pack(&cli.image, source, config)?;
        println!("packed {packed} entries");
    }

    if cli.list {
        for entry in simfs_fuse::walk(&cli.image, config)? {
            println!("{:?}\t{}\t{}", entry.kind, entry.size, entry.path);
        }
    }

    if let Some(path) = &cli.cat {
        let bytes = simfs_fuse::extract(&cli.image, config, path)?;
        io::stdout().write_all(&bytes)?;
    }
    Ok(())
}
