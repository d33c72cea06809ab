//! Discover the LED service, join its session and make one call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use led_common::{
    CLIENT_APP_NAME, INTERFACE_NAME, LedCommand, LedState, OBJECT_PATH, SERVICE_NAME,
    SERVICE_PORT, interrupt, led_interface, session_opts,
};
use ledbus::{
    BusAttachment, BusError, BusListener, ProxyBusObject, SessionId, TransportMask,
    WeakBusAttachment,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Router connect spec
    pub address: String,
    /// Limit for the method call itself
    pub timeout: Duration,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            address: ledbus::DEFAULT_ADDRESS.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Joins the service's session the first time its name is found.
struct ServiceFinder {
    bus: WeakBusAttachment,
    joining: AtomicBool,
    outcome: Mutex<Option<ledbus::Result<SessionId>>>,
}

impl ServiceFinder {
    fn new(bus: WeakBusAttachment) -> Self {
        Self {
            bus,
            joining: AtomicBool::new(false),
            outcome: Mutex::new(None),
        }
    }

    fn is_complete(&self) -> bool {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn take_outcome(&self) -> Option<ledbus::Result<SessionId>> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl BusListener for ServiceFinder {
    async fn found_advertised_name(&self, name: &str, transport: TransportMask, prefix: &str) {
        debug!(name, prefix, transport = transport.0, "Found advertised name");
        if name != SERVICE_NAME || self.joining.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(bus) = self.bus.upgrade() else {
            return;
        };

        bus.enable_concurrent_callbacks();
        let result = bus
            .join_session(SERVICE_NAME, SERVICE_PORT, session_opts())
            .await
            .map(|(session_id, _)| session_id);
        match &result {
            Ok(session_id) => info!(session_id, "Joined session"),
            Err(e) => warn!("Joining session failed: {e}"),
        }
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }

    async fn name_owner_changed(
        &self,
        name: &str,
        previous_owner: Option<&str>,
        new_owner: Option<&str>,
    ) {
        if name == SERVICE_NAME {
            debug!(
                previous = previous_owner.unwrap_or("<none>"),
                new = new_owner.unwrap_or("<none>"),
                "Owner of {name} changed"
            );
        }
    }
}

/// Find the service, join it and invoke `command`. Discovery waits until
/// the service shows up or `stop` is set.
///
/// # Errors
///
/// Returns [`BusError::Interrupted`] if `stop` is set before the session is
/// joined, otherwise the failure of the connect, join or call step.
pub async fn invoke(
    options: &InvokeOptions,
    command: LedCommand,
    stop: &AtomicBool,
) -> ledbus::Result<LedState> {
    let bus = BusAttachment::new(CLIENT_APP_NAME, true);
    let result = call_service(&bus, options, command, stop).await;
    bus.stop();
    result
}

async fn call_service(
    bus: &BusAttachment,
    options: &InvokeOptions,
    command: LedCommand,
    stop: &AtomicBool,
) -> ledbus::Result<LedState> {
    let iface = bus.register_interface(led_interface()?)?;
    bus.start()?;
    bus.connect(&options.address).await?;

    let finder = Arc::new(ServiceFinder::new(bus.downgrade()));
    bus.register_bus_listener(finder.clone());
    bus.find_advertised_name(SERVICE_NAME).await?;

    if !interrupt::wait_until(stop, || finder.is_complete()).await {
        info!("Interrupted while looking for {SERVICE_NAME}");
        return Err(BusError::Interrupted);
    }
    let session_id = finder.take_outcome().ok_or(BusError::Interrupted)??;

    let mut proxy = ProxyBusObject::new(bus, SERVICE_NAME, OBJECT_PATH, session_id)?;
    proxy.add_interface(&iface);
    let reply = proxy
        .method_call(
            INTERFACE_NAME,
            command.member_name(),
            &command.args(),
            options.timeout,
        )
        .await?;
    LedState::from_args(&reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_router() {
        let dir = tempfile::tempdir().unwrap();
        let options = InvokeOptions {
            address: format!("unix:path={}", dir.path().join("none.sock").display()),
            ..InvokeOptions::default()
        };
        let stop = AtomicBool::new(false);
        let err = invoke(&options, LedCommand::Status, &stop)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Io(_)), "{err}");
        assert!(err.status() > 1);
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let options = InvokeOptions {
            address: "tcp:host=example".to_string(),
            ..InvokeOptions::default()
        };
        let stop = AtomicBool::new(false);
        let err = invoke(&options, LedCommand::Off, &stop).await.unwrap_err();
        assert!(matches!(err, BusError::InvalidAddress(_)), "{err}");
    }

    #[test]
    fn test_default_options() {
        let options = InvokeOptions::default();
        assert_eq!(options.address, "unix:abstract=alljoyn");
        assert_eq!(options.timeout, Duration::from_millis(5000));
    }
}
