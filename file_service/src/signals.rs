//! Turns SIGTERM/SIGINT into a shutdown trigger.

use nix::sys::signal::{SigSet, Signal};
use shm_ring::Shutdown;
use std::io;
use std::thread::{self, JoinHandle};

/// Blocks SIGTERM and SIGINT in the calling thread and spawns a thread that
/// waits for either and triggers `shutdown`.
///
/// Call before spawning any other thread so that every thread inherits the
/// mask and the signal is only ever consumed here.
pub fn install_termination_handler(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGTERM);
    set.add(Signal::SIGINT);
    set.thread_block().map_err(io::Error::from)?;

    thread::Builder::new()
        .name("signals".into())
        .spawn(move || match set.wait() {
            Ok(signal) => {
                tracing::info!(?signal, "received termination signal");
                shutdown.trigger();
            }
            Err(e) => tracing::error!(error = %e, "sigwait failed"),
        })
}
