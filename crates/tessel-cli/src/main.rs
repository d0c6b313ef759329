//! Tessel CLI entry point

use anyhow::Result;
use clap::Parser;

use tessel_cli::{Cli, execute};

fn main() -> Result<()> {
    let cli = Cli::parse();
    tessel_cli::init_logging(cli.verbose);
    execute(cli)
}
