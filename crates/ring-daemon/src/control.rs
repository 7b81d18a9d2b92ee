//! HTTP control and inspection routes.
//!
//! Handlers never touch the node directly: each one posts a
//! [`ControlRequest`] to the runtime and waits for its reply. Application
//! level refusals come back as `200 {"success": false, "error": ..., "code": ...}`
//! where `code` is a stable identifier for the refusal.

use crate::runtime::RuntimeEvent;
use crate::server::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use ring_core::identity::as_opt_string;
use ring_core::{ControlError, NodeId, NodeSnapshot, VariableError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// A request for the runtime, carrying where to send the answer.
#[derive(Debug)]
pub enum ControlRequest {
    Snapshot(oneshot::Sender<NodeSnapshot>),
    GetVariable(oneshot::Sender<Option<Value>>),
    /// `from` is set when the leader is pushing to us.
    SetVariable {
        value: Option<Value>,
        from: Option<NodeId>,
        reply: oneshot::Sender<Result<(), VariableError>>,
    },
    SignOut(oneshot::Sender<Result<(), ControlError>>),
    SignIn(oneshot::Sender<Result<(), ControlError>>),
    StartElection(oneshot::Sender<()>),
}

/// Body of every control response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<Value>,
}

impl ControlReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            code: None,
            variable: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            code: None,
            variable: None,
        }
    }

    /// A refusal the caller can match on by `code`.
    pub fn refused(code: &str, error: impl ToString) -> Self {
        Self {
            code: Some(code.to_string()),
            ..Self::failed(error)
        }
    }

    fn from_result<E: ToString>(
        result: Result<(), E>,
        code: impl FnOnce(&E) -> &'static str,
    ) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::refused(code(&e), e),
        }
    }
}

/// Body of `POST /variable`. Pushes from the leader carry `fromId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableRequest {
    #[serde(default)]
    pub variable: Option<Value>,
    #[serde(
        default,
        with = "as_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub from_id: Option<NodeId>,
}

#[derive(Debug, Error)]
#[error("Ring runtime has stopped")]
pub struct RuntimeStopped;

impl IntoResponse for RuntimeStopped {
    fn into_response(self) -> Response {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ControlReply::failed(self)),
        )
            .into_response()
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(status))
        .route("/variable", get(get_variable).post(set_variable))
        .route("/signout", get(sign_out))
        .route("/signin", get(sign_in))
        .route("/election", get(start_election))
}

/// Post a request and wait for the runtime's answer.
async fn ask<T>(
    state: &AppState,
    request: impl FnOnce(oneshot::Sender<T>) -> ControlRequest,
) -> Result<T, RuntimeStopped> {
    let (tx, rx) = oneshot::channel();
    state
        .events
        .send(RuntimeEvent::Control(request(tx)))
        .map_err(|_| RuntimeStopped)?;
    rx.await.map_err(|_| RuntimeStopped)
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<NodeSnapshot>, RuntimeStopped> {
    let snapshot = ask(&state, ControlRequest::Snapshot).await?;
    Ok(Json(snapshot))
}

async fn get_variable(State(state): State<Arc<AppState>>) -> Result<Response, RuntimeStopped> {
    let response = match ask(&state, ControlRequest::GetVariable).await? {
        Some(variable) => Json(ControlReply {
            variable: Some(variable),
            ..ControlReply::ok()
        })
        .into_response(),
        None => (StatusCode::NOT_FOUND, Json(ControlReply::failed("Not set"))).into_response(),
    };
    Ok(response)
}

async fn set_variable(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VariableRequest>,
) -> Result<Json<ControlReply>, RuntimeStopped> {
    debug!(
        "Variable write requested{}",
        request
            .from_id
            .as_ref()
            .map(|from| format!(" by {}", from))
            .unwrap_or_default()
    );
    let result = ask(&state, |reply| ControlRequest::SetVariable {
        value: request.variable,
        from: request.from_id,
        reply,
    })
    .await?;
    Ok(Json(ControlReply::from_result(result, VariableError::code)))
}

async fn sign_out(State(state): State<Arc<AppState>>) -> Result<Json<ControlReply>, RuntimeStopped> {
    let result = ask(&state, ControlRequest::SignOut).await?;
    Ok(Json(ControlReply::from_result(result, ControlError::code)))
}

async fn sign_in(State(state): State<Arc<AppState>>) -> Result<Json<ControlReply>, RuntimeStopped> {
    let result = ask(&state, ControlRequest::SignIn).await?;
    Ok(Json(ControlReply::from_result(result, ControlError::code)))
}

async fn start_election(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlReply>, RuntimeStopped> {
    ask(&state, ControlRequest::StartElection).await?;
    Ok(Json(ControlReply::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_omits_empty_fields() {
        let json = serde_json::to_value(ControlReply::ok()).unwrap();
        assert_eq!(json, json!({"success": true}));

        let json = serde_json::to_value(ControlReply::failed("Not set")).unwrap();
        assert_eq!(json, json!({"success": false, "error": "Not set"}));
    }

    #[test]
    fn test_refusals_carry_a_code() {
        let reply = ControlReply::from_result(Err(VariableError::NotHealthy), VariableError::code);
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"success": false, "error": "Not healthy", "code": "NOT_HEALTHY"})
        );

        let reply =
            ControlReply::from_result(Err(ControlError::AlreadySignedIn), ControlError::code);
        assert_eq!(reply.code.as_deref(), Some("ALREADY_SIGNED_IN"));
        assert_eq!(reply.error.as_deref(), Some("Already signed-in"));

        let reply = ControlReply::from_result(Ok::<(), VariableError>(()), VariableError::code);
        assert_eq!(reply, ControlReply::ok());
    }

    #[test]
    fn test_variable_request_accepts_both_id_forms() {
        let plain: VariableRequest =
            serde_json::from_value(json!({"variable": 5, "fromId": "127.0.0.1:3001"})).unwrap();
        let object: VariableRequest = serde_json::from_value(json!({
            "variable": 5,
            "fromId": {"ipAddress": "127.0.0.1", "port": 3001}
        }))
        .unwrap();
        assert_eq!(plain, object);
        assert_eq!(plain.from_id, Some(NodeId::new("127.0.0.1", 3001)));
    }

    #[test]
    fn test_variable_request_without_sender() {
        let request: VariableRequest = serde_json::from_value(json!({"variable": [1, 2]})).unwrap();
        assert_eq!(request.variable, Some(json!([1, 2])));
        assert!(request.from_id.is_none());

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"variable": [1, 2]}));
    }

    #[tokio::test]
    async fn test_stopped_runtime_is_reported() {
        let (events, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let state = AppState::new(events);
        let result = ask(&state, ControlRequest::Snapshot).await;
        assert!(result.is_err());
    }
}
