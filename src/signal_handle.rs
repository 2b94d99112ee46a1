use crate::engine::EngineSender;
use log::{debug, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::thread;
use std::time::Duration;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Tears the engine down on SIGINT/SIGTERM, then exits.
pub fn setup_signal_handler(sender: EngineSender) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    debug!("Signal handlers registered (SIGINT, SIGTERM)");

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, shutting down", sig);
            if !sender.shutdown_and_wait(SHUTDOWN_GRACE) {
                warn!("Engine did not confirm shutdown");
            }
            std::process::exit(128 + sig);
        }
    });
    Ok(())
}
