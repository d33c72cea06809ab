//! Process-wide interrupt flag.
//!
//! Ctrl-C sets the flag; the service run loop and the client's discovery
//! wait poll it every [`POLL_INTERVAL`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// The flag set by [`install_handler`].
#[must_use]
pub fn flag() -> &'static AtomicBool {
    &INTERRUPTED
}

/// Set [`flag`] when the process receives Ctrl-C.
///
/// # Errors
///
/// Returns an error when called outside a tokio runtime.
pub fn install_handler() -> Result<(), tokio::runtime::TryCurrentError> {
    let handle = tokio::runtime::Handle::try_current()?;
    handle.spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                INTERRUPTED.store(true, Ordering::SeqCst);
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {e}"),
        }
    });
    Ok(())
}

/// Poll `done` until it returns true or `stop` is set. Returns `false` when
/// stopped first.
pub async fn wait_until<F>(stop: &AtomicBool, mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    loop {
        if done() {
            return true;
        }
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_condition() {
        let mut polls = 0;
        let stop = AtomicBool::new(false);
        let done = wait_until(&stop, || {
            polls += 1;
            polls == 3
        })
        .await;
        assert!(done);
        assert_eq!(polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_stopped() {
        let stop = Arc::new(AtomicBool::new(false));
        let setter = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            setter.store(true, Ordering::SeqCst);
        });
        let start = tokio::time::Instant::now();
        assert!(!wait_until(&stop, || false).await);
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() <= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_wins_over_stop() {
        let stop = AtomicBool::new(true);
        assert!(wait_until(&stop, || true).await);
    }

    #[test]
    fn test_install_handler_requires_runtime() {
        assert!(install_handler().is_err());
    }
}
