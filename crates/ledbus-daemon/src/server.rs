//! Socket server for the bus router.
//!
//! Accepts attachment connections, gives each a writer task fed by an
//! unbounded channel, and routes every incoming frame through the handlers.

use std::future::Future;
use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use ledbus::protocol::Message;
use ledbus::{BusAddress, FrameCodec};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, RouterError};
use crate::handlers::handle_request;
use crate::state::{ConnectionId, RouterState, SharedState};

/// Run the router at `address` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address is malformed, another router already
/// listens there, or the socket cannot be bound.
pub async fn run(address: &str) -> Result<()> {
    let address: BusAddress = address
        .parse()
        .map_err(|e: ledbus::BusError| RouterError::InvalidAddress(e.to_string()))?;

    if let Some(path) = address.socket_path() {
        cleanup_stale_socket(path).await?;
    }

    let listener = address.bind()?;
    info!("Router listening on {address}");

    serve(listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for Ctrl-C: {e}");
        }
        info!("Shutdown requested, stopping router");
    })
    .await;

    if let Some(path) = address.socket_path()
        && path.exists()
        && let Err(e) = std::fs::remove_file(path)
    {
        warn!("Failed to remove socket file {:?}: {}", path, e);
    }
    Ok(())
}

/// Accept connections on `listener` until `shutdown` completes.
pub async fn serve(listener: UnixListener, shutdown: impl Future<Output = ()>) {
    let state = RouterState::shared();
    tokio::pin!(shutdown);

    info!("Ready to accept connections");
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    debug!("Accepted connection");
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            },
        }
    }
}

async fn cleanup_stale_socket(path: &Path) -> Result<()> {
    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            return Err(RouterError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "Another router is already running",
            )));
        }
        info!("Removing stale socket at {}", path.display());
        std::fs::remove_file(path)?;
    }
    Ok(())
}

async fn handle_connection(stream: UnixStream, state: SharedState) -> Result<()> {
    let framed = Framed::new(stream, FrameCodec::new());
    let (mut sink, mut stream) = framed.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.write().await.add_connection(tx);
    debug!("New connection: {}", conn);

    let conn_clone = conn.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sink.send(msg).await {
                warn!("Failed to send to {}: {}", conn_clone, e);
                break;
            }
        }
        trace!("[{}] send_task ended", conn_clone);
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(msg) => {
                if let Some(resp) = process_message(&conn, msg, &state).await
                    && !state.read().await.send_to(&conn, resp)
                {
                    break;
                }
            }
            Err(e) => {
                warn!("Read error from {}: {}", conn, e);
                break;
            }
        }
    }

    debug!("Connection closed: {}", conn);
    state.write().await.remove_connection(&conn);
    send_task.abort();

    Ok(())
}

async fn process_message(
    conn: &ConnectionId,
    msg: Message,
    state: &SharedState,
) -> Option<Message> {
    match msg {
        Message::Request(request) => handle_request(conn, request, state).await,
        Message::Response(response) => {
            state.write().await.complete_forward(conn, response);
            None
        }
        Message::Notification(n) => {
            debug!(conn = %conn, method = %n.method, "Ignoring notification");
            None
        }
    }
}
