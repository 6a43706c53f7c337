//! Shutdown signal handling.
//!
//! Signals arrive on a dedicated thread and are forwarded into the async
//! half. A termination signal stops new ticks; the in-flight session is
//! drained, never aborted.

use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::sync::Notify;

pub fn handle_termination(shutdown: Arc<Notify>) {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).expect("failed to register signal handlers");

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            log::info!("Termination signal received, shutting down...");
            shutdown.notify_one();
        }
    });
}
