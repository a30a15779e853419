//! CLI entry point for the lossless image codec

use clap::Parser;
use env_logger::Env;
use pixelfit::io::cli::{Cli, FileProcessor};

fn main() -> pixelfit::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level()))
        .format_timestamp(None)
        .init();
    FileProcessor::new(cli).process()
}
