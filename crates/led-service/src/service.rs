//! Service lifecycle: bring the LED object onto the bus, serve until
//! interrupted, tear down.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use led_common::{
    OBJECT_PATH, SERVICE_APP_NAME, SERVICE_NAME, SERVICE_PORT, interrupt, led_interface,
    session_opts,
};
use ledbus::{
    BusAttachment, BusError, BusListener, BusObject, NameFlags, SessionId, SessionOpts,
    SessionPort, SessionPortListener,
};
use tracing::{debug, error, info};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError, StartupStep};
use crate::handlers;
use crate::led::LedController;

/// Logs ownership changes of the service name.
struct OwnerLogger;

impl BusListener for OwnerLogger {
    async fn name_owner_changed(
        &self,
        name: &str,
        previous_owner: Option<&str>,
        new_owner: Option<&str>,
    ) {
        if name == SERVICE_NAME {
            info!(
                previous = previous_owner.unwrap_or("<none>"),
                new = new_owner.unwrap_or("<none>"),
                "Owner of {name} changed"
            );
        }
    }
}

/// Accepts every joiner on the service port.
struct PortAcceptor;

impl SessionPortListener for PortAcceptor {
    async fn accept_session_joiner(
        &self,
        port: SessionPort,
        joiner: &str,
        _opts: &SessionOpts,
    ) -> bool {
        if port == SERVICE_PORT {
            debug!(joiner, "Accepting session joiner");
            true
        } else {
            info!(port, joiner, "Rejecting joiner on unexpected port");
            false
        }
    }

    async fn session_joined(&self, port: SessionPort, session_id: SessionId, joiner: &str) {
        info!(port, session_id, joiner, "Session joined");
    }
}

/// A started service. Dropping it without [`shutdown`](Self::shutdown)
/// leaves teardown to the attachment's own drop.
pub struct LedService {
    bus: BusAttachment,
    opts: SessionOpts,
}

impl LedService {
    /// Run startup steps in order. On the first failure the attachment is
    /// stopped and the failing step reported.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Startup`] naming the step that failed.
    pub async fn start(config: &ServiceConfig) -> Result<Self> {
        let bus = BusAttachment::new(SERVICE_APP_NAME, true);
        let opts = session_opts();
        match bring_up(&bus, config, &opts).await {
            Ok(()) => {
                info!(
                    name = SERVICE_NAME,
                    port = SERVICE_PORT,
                    unique = bus.unique_name().as_deref().unwrap_or_default(),
                    "Service ready"
                );
                Ok(Self { bus, opts })
            }
            Err(e) => {
                error!("{e}");
                bus.stop();
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn bus(&self) -> &BusAttachment {
        &self.bus
    }

    #[must_use]
    pub fn session_opts(&self) -> SessionOpts {
        self.opts
    }

    /// Stop the attachment. The router drops the advertisement, port and
    /// name along with the connection.
    pub fn shutdown(self) {
        debug!("Shutting down service");
        self.bus.stop();
        info!("Service stopped");
    }
}

async fn bring_up(bus: &BusAttachment, config: &ServiceConfig, opts: &SessionOpts) -> Result<()> {
    let iface = led_interface()
        .and_then(|iface| bus.register_interface(iface))
        .map_err(at(StartupStep::DeclareInterface))?;

    bus.register_bus_listener(Arc::new(OwnerLogger));

    let led = Arc::new(LedController::new(&config.leds_root, &config.device));
    let mut object = BusObject::new(OBJECT_PATH).map_err(at(StartupStep::CreateObject))?;
    object
        .add_interface(&iface)
        .map_err(at(StartupStep::CreateObject))?;
    handlers::install(&mut object, &iface, &led).map_err(at(StartupStep::CreateObject))?;
    object.on_registered(|path| info!(path, "LED object registered"));

    bus.start().map_err(at(StartupStep::Start))?;
    bus.register_bus_object(object)
        .map_err(at(StartupStep::RegisterObject))?;
    bus.connect(&config.address)
        .await
        .map_err(at(StartupStep::Connect))?;
    info!(address = %config.address, "Connected to router");

    bus.request_name(
        SERVICE_NAME,
        NameFlags::REPLACE_EXISTING | NameFlags::DO_NOT_QUEUE,
    )
    .await
    .map_err(at(StartupStep::RequestName))?;

    bus.bind_session_port(SERVICE_PORT, *opts, Arc::new(PortAcceptor))
        .await
        .map_err(at(StartupStep::BindSessionPort))?;

    bus.advertise_name(SERVICE_NAME, opts.transports)
        .await
        .map_err(at(StartupStep::Advertise))?;

    Ok(())
}

fn at(step: StartupStep) -> impl FnOnce(BusError) -> ServiceError {
    move |source| ServiceError::Startup { step, source }
}

/// Start the service, serve until `stop` is set, then tear down.
///
/// # Errors
///
/// Returns the first failing startup step.
pub async fn run(config: &ServiceConfig, stop: &AtomicBool) -> Result<()> {
    let service = LedService::start(config).await?;
    interrupt::wait_until(stop, || false).await;
    service.shutdown();
    Ok(())
}
