//! Serial callback delivery.
//!
//! The dispatcher runs one callback at a time. Each callback executes in its
//! own task inside a [`CallbackScope`]; bus calls that wait on the router
//! consult the scope and refuse to run unless the callback has enabled
//! concurrent callbacks, which also lets the dispatcher move on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::listener::{BusListener, SessionListener, SessionPortListener};
use crate::object::BusObject;
use crate::session::{SessionId, SessionLostReason, SessionOpts, SessionPort, TransportMask};
use crate::util::lock;

tokio::task_local! {
    static CALLBACK: Arc<CallbackScope>;
}

struct CallbackScope {
    concurrent: AtomicBool,
    release: Mutex<Option<oneshot::Sender<()>>>,
}

/// False only inside a callback that has not enabled concurrent callbacks.
pub(crate) fn blocking_calls_allowed() -> bool {
    CALLBACK
        .try_with(|scope| scope.concurrent.load(Ordering::Acquire))
        .unwrap_or(true)
}

/// Returns false when called outside a callback.
pub(crate) fn enable_concurrent_callbacks() -> bool {
    CALLBACK
        .try_with(|scope| {
            scope.concurrent.store(true, Ordering::Release);
            if let Some(release) = lock(&scope.release).take() {
                let _ = release.send(());
            }
        })
        .is_ok()
}

#[derive(Debug, Clone)]
pub(crate) enum BusEvent {
    FoundAdvertisedName {
        name: String,
        transport: TransportMask,
        prefix: String,
    },
    LostAdvertisedName {
        name: String,
        transport: TransportMask,
        prefix: String,
    },
    NameOwnerChanged {
        name: String,
        previous_owner: Option<String>,
        new_owner: Option<String>,
    },
    BusDisconnected,
}

#[derive(Debug)]
pub(crate) enum PortEvent {
    AcceptJoiner {
        port: SessionPort,
        joiner: String,
        opts: SessionOpts,
        reply: oneshot::Sender<bool>,
    },
    SessionJoined {
        port: SessionPort,
        session_id: SessionId,
        joiner: String,
    },
}

pub(crate) enum Callback {
    Bus(BusEvent),
    Port(PortEvent),
    SessionLost {
        session_id: SessionId,
        reason: SessionLostReason,
    },
    ObjectRegistered(Arc<BusObject>),
}

pub(crate) trait DynBusListener: Send + Sync {
    fn deliver(self: Arc<Self>, event: BusEvent) -> BoxFuture<'static, ()>;
}

impl<L: BusListener> DynBusListener for L {
    fn deliver(self: Arc<Self>, event: BusEvent) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match event {
                BusEvent::FoundAdvertisedName {
                    name,
                    transport,
                    prefix,
                } => self.found_advertised_name(&name, transport, &prefix).await,
                BusEvent::LostAdvertisedName {
                    name,
                    transport,
                    prefix,
                } => self.lost_advertised_name(&name, transport, &prefix).await,
                BusEvent::NameOwnerChanged {
                    name,
                    previous_owner,
                    new_owner,
                } => {
                    self.name_owner_changed(&name, previous_owner.as_deref(), new_owner.as_deref())
                        .await;
                }
                BusEvent::BusDisconnected => self.bus_disconnected().await,
            }
        })
    }
}

pub(crate) trait DynSessionPortListener: Send + Sync {
    fn deliver(self: Arc<Self>, event: PortEvent) -> BoxFuture<'static, ()>;
}

impl<L: SessionPortListener> DynSessionPortListener for L {
    fn deliver(self: Arc<Self>, event: PortEvent) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match event {
                PortEvent::AcceptJoiner {
                    port,
                    joiner,
                    opts,
                    reply,
                } => {
                    let accepted = self.accept_session_joiner(port, &joiner, &opts).await;
                    let _ = reply.send(accepted);
                }
                PortEvent::SessionJoined {
                    port,
                    session_id,
                    joiner,
                } => self.session_joined(port, session_id, &joiner).await,
            }
        })
    }
}

pub(crate) trait DynSessionListener: Send + Sync {
    fn deliver(
        self: Arc<Self>,
        session_id: SessionId,
        reason: SessionLostReason,
    ) -> BoxFuture<'static, ()>;
}

impl<L: SessionListener> DynSessionListener for L {
    fn deliver(
        self: Arc<Self>,
        session_id: SessionId,
        reason: SessionLostReason,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.session_lost(session_id, reason).await })
    }
}

/// Deliver callbacks until the queue closes or `resolve` returns `None`.
pub(crate) async fn run<R>(mut queue: mpsc::UnboundedReceiver<Callback>, resolve: R)
where
    R: Fn(Callback) -> Option<BoxFuture<'static, ()>> + Send + 'static,
{
    while let Some(callback) = queue.recv().await {
        let Some(work) = resolve(callback) else {
            break;
        };

        let (release_tx, release_rx) = oneshot::channel();
        let scope = Arc::new(CallbackScope {
            concurrent: AtomicBool::new(false),
            release: Mutex::new(Some(release_tx)),
        });
        let task = tokio::spawn(CALLBACK.scope(scope, work));

        tokio::select! {
            result = task => {
                if let Err(e) = result
                    && e.is_panic()
                {
                    warn!("Callback panicked");
                }
            }
            _ = release_rx => trace!("Callback enabled concurrent callbacks"),
        }
    }
    trace!("Callback dispatcher stopped");
}
