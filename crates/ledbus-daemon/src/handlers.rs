//! Request handlers for the router.
//!
//! Most methods only touch router state and answer immediately. Joins and
//! method calls have to wait for another attachment, so they run in their
//! own task and deliver the response when the peer answers.

use std::time::Duration;

use ledbus::protocol::{
    AcceptJoinerParams, AcceptJoinerResult, AdvertiseParams, BindSessionPortParams,
    BindSessionPortResult, FindParams, HelloParams, JoinSessionParams, JoinSessionResult,
    LeaveSessionParams, Message, MethodCallParams, NameParams, ReleaseNameResult, Request,
    RequestId, RequestNameParams, RequestNameResult, Response, RpcError, UnbindSessionPortParams,
    method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{Result, RouterError};
use crate::state::{ConnectionId, SharedState};

/// How long a host gets to accept or reject a joiner.
pub const ACCEPT_JOINER_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the router waits for a forwarded method call to be answered.
pub const METHOD_CALL_TIMEOUT: Duration = Duration::from_secs(30);

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| RouterError::InvalidParams(e.to_string()))
}

fn empty() -> Value {
    serde_json::json!({})
}

/// Handle a request from `conn`. Returns the response to send right away,
/// or `None` when the answer is delivered later by a spawned task.
pub async fn handle_request(
    conn: &ConnectionId,
    request: Request,
    state: &SharedState,
) -> Option<Message> {
    let Some(id) = request.id else {
        debug!(conn = %conn, method = %request.method, "Ignoring request without id");
        return None;
    };
    trace!(conn = %conn, method = %request.method, %id, "Request");

    if request.method != method::HELLO && !state.read().await.is_hello(conn) {
        return Some(error_response(id, RouterError::HelloRequired));
    }

    match request.method.as_str() {
        method::JOIN_SESSION => {
            spawn_deferred(state, conn, id, request.params, join_session);
            None
        }
        method::METHOD_CALL => {
            spawn_deferred(state, conn, id, request.params, route_method_call);
            None
        }
        _ => {
            let result = handle_local(conn, &request.method, request.params, state).await;
            Some(Message::Response(match result {
                Ok(value) => Response::success(id, value),
                Err(e) => {
                    debug!(conn = %conn, method = %request.method, "Request failed: {e}");
                    Response::error(id, e.into())
                }
            }))
        }
    }
}

fn error_response(id: RequestId, err: RouterError) -> Message {
    Message::Response(Response::error(id, RpcError::from(err)))
}

async fn handle_local(
    conn: &ConnectionId,
    method_name: &str,
    params: Option<Value>,
    state: &SharedState,
) -> Result<Value> {
    let mut state = state.write().await;
    match method_name {
        method::HELLO => {
            let p: HelloParams = parse_params(params)?;
            Ok(serde_json::to_value(state.hello(conn, &p)?)?)
        }
        method::REQUEST_NAME => {
            let p: RequestNameParams = parse_params(params)?;
            let reply = state.request_name(conn, &p.name, p.flags)?;
            Ok(serde_json::to_value(RequestNameResult { reply })?)
        }
        method::RELEASE_NAME => {
            let p: NameParams = parse_params(params)?;
            let reply = state.release_name(conn, &p.name)?;
            Ok(serde_json::to_value(ReleaseNameResult { reply })?)
        }
        method::ADVERTISE_NAME => {
            let p: AdvertiseParams = parse_params(params)?;
            state.advertise(conn, &p.name, p.transports)?;
            Ok(empty())
        }
        method::CANCEL_ADVERTISE_NAME => {
            let p: AdvertiseParams = parse_params(params)?;
            state.cancel_advertise(conn, &p.name, p.transports)?;
            Ok(empty())
        }
        method::FIND_ADVERTISED_NAME => {
            let p: FindParams = parse_params(params)?;
            state.find(conn, &p.prefix);
            Ok(empty())
        }
        method::CANCEL_FIND_ADVERTISED_NAME => {
            let p: FindParams = parse_params(params)?;
            state.cancel_find(conn, &p.prefix);
            Ok(empty())
        }
        method::BIND_SESSION_PORT => {
            let p: BindSessionPortParams = parse_params(params)?;
            let port = state.bind_port(conn, p.port, p.opts)?;
            Ok(serde_json::to_value(BindSessionPortResult { port })?)
        }
        method::UNBIND_SESSION_PORT => {
            let p: UnbindSessionPortParams = parse_params(params)?;
            state.unbind_port(conn, p.port)?;
            Ok(empty())
        }
        method::LEAVE_SESSION => {
            let p: LeaveSessionParams = parse_params(params)?;
            state.leave_session(conn, p.session_id)?;
            Ok(empty())
        }
        other => Err(RouterError::MethodNotFound(other.to_string())),
    }
}

fn spawn_deferred<F, Fut>(
    state: &SharedState,
    conn: &ConnectionId,
    id: RequestId,
    params: Option<Value>,
    handler: F,
) where
    F: FnOnce(SharedState, ConnectionId, Option<Value>) -> Fut,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    let fut = handler(state.clone(), conn.clone(), params);
    let state = state.clone();
    let conn = conn.clone();
    tokio::spawn(async move {
        let response = match fut.await {
            Ok(resp) => resp.readdressed(id),
            Err(e) => {
                debug!(conn = %conn, "Deferred request failed: {e}");
                Response::error(id, e.into())
            }
        };
        if !state.read().await.send_to(&conn, Message::Response(response)) {
            trace!(conn = %conn, "Caller went away before its answer");
        }
    });
}

/// Wait for the peer's answer to a forwarded request.
async fn await_forward(
    state: &SharedState,
    forward_id: u64,
    rx: tokio::sync::oneshot::Receiver<Response>,
    timeout: Duration,
) -> Result<Response> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(resp)) => Ok(resp),
        Ok(Err(_)) => Err(RouterError::PeerGone),
        Err(_) => {
            state.write().await.cancel_forward(forward_id);
            Err(RouterError::Timeout)
        }
    }
}

async fn join_session(
    state: SharedState,
    joiner: ConnectionId,
    params: Option<Value>,
) -> Result<Response> {
    let p: JoinSessionParams = parse_params(params)?;

    let (plan, forward_id, rx) = {
        let mut guard = state.write().await;
        let plan = guard.prepare_join(&p.host, p.port, &p.opts)?;
        let ask = AcceptJoinerParams {
            port: plan.port,
            joiner: joiner.to_string(),
            opts: plan.opts,
        };
        let (forward_id, rx) = guard.forward(
            &plan.host,
            method::ACCEPT_SESSION_JOINER,
            serde_json::to_value(&ask)?,
        )?;
        (plan, forward_id, rx)
    };
    debug!(joiner = %joiner, host = %plan.host, port = plan.port, "Asking host to accept joiner");

    let answer = await_forward(&state, forward_id, rx, ACCEPT_JOINER_TIMEOUT).await?;
    let accepted = match (answer.error, answer.result) {
        (None, Some(result)) => serde_json::from_value::<AcceptJoinerResult>(result)
            .map(|r| r.accepted)
            .unwrap_or(false),
        (Some(e), _) => {
            warn!(host = %plan.host, "Host failed to answer accept_session_joiner: {e}");
            false
        }
        (None, None) => false,
    };
    if !accepted {
        return Err(RouterError::SessionRejected);
    }

    let session_id = state.write().await.complete_join(&joiner, &plan)?;
    let result = JoinSessionResult {
        session_id,
        opts: plan.opts,
    };
    Ok(Response::success(
        RequestId::Number(0),
        serde_json::to_value(result)?,
    ))
}

async fn route_method_call(
    state: SharedState,
    caller: ConnectionId,
    params: Option<Value>,
) -> Result<Response> {
    let mut call: MethodCallParams = parse_params(params)?;

    let (forward_id, rx) = {
        let mut guard = state.write().await;
        let target = guard
            .resolve(&call.destination)
            .ok_or_else(|| RouterError::ServiceUnknown(call.destination.clone()))?;
        guard.check_session(&caller, &target, call.session_id)?;
        call.sender = Some(caller.to_string());
        trace!(
            caller = %caller,
            target = %target,
            member = %call.member,
            session_id = call.session_id,
            "Routing method call"
        );
        guard.forward(&target, method::METHOD_CALL, serde_json::to_value(&call)?)?
    };

    await_forward(&state, forward_id, rx, METHOD_CALL_TIMEOUT).await
}
