//! Entry point for the elf2e32 translator.
//!
//! Simple flow: parse args → run the translation → map failures onto
//! per-kind exit codes.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use elf2e32::config::Config;
use elf2e32::error::Error;
use elf2e32::target;

fn main() {
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = target::run(&config) {
        eprintln!("elf2e32: error: {err:#}");
        let code = err.downcast_ref::<Error>().map_or(1, Error::exit_code);
        std::process::exit(code);
    }
}
