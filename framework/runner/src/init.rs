use crate::cli::GaleCli;
use clap::Parser;

/// Initialise the CLI and logging for the Gale runner.
pub fn init() -> GaleCli {
    env_logger::init();

    GaleCli::parse()
}
