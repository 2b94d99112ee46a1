pub mod capture;
pub mod cli;
mod console;
pub mod cue_audio;
pub mod engine;
pub mod events;
pub mod logging;
pub mod matcher;
pub mod script;
pub mod sequencer;
pub mod settings;
#[cfg(unix)]
mod signal_handle;
pub mod speech;

use clap::Parser;
use cli::CliArgs;

pub fn run() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Parse console logging directives from RUST_LOG, falling back to info-level logging
    // when the variable is unset
    if let Err(e) = logging::init_logging(args.debug) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    console::run(args)
}
