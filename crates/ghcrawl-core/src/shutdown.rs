//! Graceful shutdown: signal flag bridged into a cancellation token

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::runtime::SHARED_RUNTIME;

/// Poll interval of the flag watcher
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Global shutdown flag, set by the SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Register SIGTERM/SIGINT handlers.
///
/// First signal sets the shutdown flag, a second one force-exits with 130.
pub fn install_signal_handlers() -> std::io::Result<()> {
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        unsafe {
            signal_hook::low_level::register(signal, || {
                if shutdown_flag().swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            })?;
        }
    }
    Ok(())
}

/// Cancel `token` once the shutdown flag is raised.
///
/// The watcher exits on its own when the token is cancelled by someone else.
pub fn bridge_to_token(token: CancellationToken) -> JoinHandle<()> {
    SHARED_RUNTIME.spawn(async move {
        loop {
            if is_shutdown_requested() {
                log::warn!("Shutdown requested, draining in-flight work");
                token.cancel();
                return;
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(WATCH_INTERVAL) => {}
            }
        }
    })
}
