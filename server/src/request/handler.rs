//! Request dispatcher

use crate::fleet::{AgentAction, Fleet, FleetError};
use northstar_shared::{CommandKind, Response};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq)]
pub enum RequestError {
    #[error("Request must be a JSON object")]
    NotAnObject,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid position data")]
    InvalidPosition,

    #[error(transparent)]
    Fleet(#[from] FleetError),
}

type Request = Map<String, Value>;

/// Agent ids may arrive as strings or bare numbers
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn agent_id(request: &Request) -> Result<String, RequestError> {
    let value = request.get("id").ok_or(RequestError::MissingField("id"))?;
    id_text(value).ok_or(RequestError::InvalidField {
        field: "id",
        expected: "string",
    })
}

fn id_list(request: &Request) -> Result<Option<Vec<String>>, RequestError> {
    let invalid = RequestError::InvalidField {
        field: "ids",
        expected: "array of strings",
    };
    match request.get("ids") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(values)) => values
            .iter()
            .map(id_text)
            .collect::<Option<Vec<_>>>()
            .map(Some)
            .ok_or(invalid),
        Some(_) => Err(invalid),
    }
}

fn number(request: &Request, field: &'static str, default: Option<f64>) -> Result<f64, RequestError> {
    match request.get(field) {
        None | Some(Value::Null) => default.ok_or(RequestError::MissingField(field)),
        Some(value) => value.as_f64().ok_or(RequestError::InvalidField {
            field,
            expected: "number",
        }),
    }
}

/// A number that must still be finite once narrowed to `f32`
fn float32(request: &Request, field: &'static str, default: Option<f64>) -> Result<f32, RequestError> {
    let value = number(request, field, default)? as f32;
    if !value.is_finite() {
        return Err(RequestError::InvalidField {
            field,
            expected: "finite number",
        });
    }
    Ok(value)
}

fn flag(request: &Request, field: &'static str) -> bool {
    request.get(field).and_then(Value::as_bool).unwrap_or(false)
}

fn position(request: &Request) -> Result<[f32; 3], RequestError> {
    let values = request
        .get("position")
        .and_then(Value::as_array)
        .filter(|values| values.len() == 3)
        .ok_or(RequestError::InvalidPosition)?;

    let mut position = [0.0f32; 3];
    for (slot, value) in position.iter_mut().zip(values) {
        *slot = value
            .as_f64()
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .ok_or(RequestError::InvalidPosition)?;
    }
    Ok(position)
}

/// Handles decoded requests against a shared fleet
pub struct RequestHandler {
    fleet: Arc<Fleet>,
    shutdown: watch::Sender<bool>,
}

impl RequestHandler {
    pub fn new(fleet: Arc<Fleet>, shutdown: watch::Sender<bool>) -> Self {
        Self { fleet, shutdown }
    }

    /// Handle raw request bytes. Every failure becomes an `ok: false` response.
    pub async fn handle(&self, raw: &[u8]) -> Response {
        let request = match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(request)) => request,
            Ok(_) => return Response::failure(RequestError::NotAnObject.to_string()),
            Err(e) => {
                warn!("Unparseable request: {}", e);
                return Response::failure(e.to_string());
            }
        };

        let action = request
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!("Request: {}", serde_json::Value::Object(request.clone()));

        match self.dispatch(&action, &request).await {
            Ok(response) => response,
            Err(e) => {
                info!("{} failed: {}", action, e);
                Response::failure(e.to_string())
            }
        }
    }

    async fn dispatch(&self, action: &str, request: &Request) -> Result<Response, RequestError> {
        // Action names on the wire are lowercase; anything else is unknown here
        let kind = match action.parse::<CommandKind>() {
            Ok(kind) if kind.as_str() == action => kind,
            _ => return Err(RequestError::UnknownAction(action.to_string())),
        };

        match kind {
            CommandKind::Link => {
                let ids = id_list(request)?.unwrap_or_default();
                self.fleet.link(&ids).await;
            }
            CommandKind::Unlink => {
                if flag(request, "all") {
                    self.fleet.unlink_all().await;
                } else {
                    let ids = id_list(request)?.unwrap_or_default();
                    self.fleet.unlink(&ids).await;
                }
            }
            CommandKind::Status => {
                let ids = id_list(request)?;
                let status = self.fleet.status(ids.as_deref()).await;
                return Ok(Response::with_status(status));
            }
            CommandKind::Launch => {
                let ids = id_list(request)?;
                let launched = self.fleet.launch(ids.as_deref()).await?;
                debug!("Launched {} agents", launched);
            }
            CommandKind::Shutdown => {
                info!("Shutdown requested");
                self.shutdown.send_replace(true);
            }
            CommandKind::Kill => {
                let id = agent_id(request)?;
                self.fleet.command(&id, AgentAction::Kill, false).await?;
            }
            CommandKind::Delay => self.delay(request).await?,
            _ => {
                let id = agent_id(request)?;
                let setcmd = flag(request, "setcmd");
                if !self.fleet.is_linked(&id).await {
                    return Err(FleetError::NotConnected(id).into());
                }
                let action = agent_action(&kind, request)?;
                self.fleet.command(&id, action, setcmd).await?;
            }
        }

        Ok(Response::success())
    }

    /// A queued delay is held for launch; an immediate one is waited out
    /// before answering
    async fn delay(&self, request: &Request) -> Result<(), RequestError> {
        let id = agent_id(request)?;
        let seconds = float32(request, "seconds", Some(1.0))?;
        let setcmd = flag(request, "setcmd");

        // Checked before the agent is touched so a bad value changes nothing
        let wait = if !setcmd && seconds > 0.0 {
            let wait = Duration::try_from_secs_f32(seconds).map_err(|_| RequestError::InvalidField {
                field: "seconds",
                expected: "duration in seconds",
            })?;
            Some(wait)
        } else {
            None
        };

        self.fleet
            .command(&id, AgentAction::Delay { seconds }, setcmd)
            .await?;

        if let Some(wait) = wait {
            debug!("Agent {}: waiting {}s", id, seconds);
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

/// Build the agent action for a per-agent request
fn agent_action(kind: &CommandKind, request: &Request) -> Result<AgentAction, RequestError> {
    let action = match kind {
        CommandKind::Origin => AgentAction::Origin {
            lat: number(request, "lat", None)?,
            lon: number(request, "lon", None)?,
        },
        CommandKind::Arm => AgentAction::Arm,
        CommandKind::Disarm => AgentAction::Disarm,
        CommandKind::Land => AgentAction::Land,
        CommandKind::Home => AgentAction::Home,
        CommandKind::Takeoff => AgentAction::Takeoff {
            altitude: float32(request, "altitude", Some(3.0))?,
            time: float32(request, "time", Some(10.0))?,
        },
        CommandKind::Move => AgentAction::Move {
            position: position(request)?,
            time: float32(request, "time", Some(1.0))?,
        },
        other => return Err(RequestError::UnknownAction(other.to_string())),
    };
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> (RequestHandler, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (RequestHandler::new(Arc::new(Fleet::new()), tx), rx)
    }

    async fn send(handler: &RequestHandler, request: Value) -> Response {
        handler.handle(request.to_string().as_bytes()).await
    }

    #[tokio::test]
    async fn test_per_agent_command_requires_link() {
        let (handler, _rx) = handler();
        let response = send(&handler, json!({"action": "arm", "id": "72", "setcmd": false})).await;
        assert_eq!(response, Response::failure("Agent 72 not connected"));

        send(&handler, json!({"action": "link", "ids": ["72"]})).await;
        let response = send(&handler, json!({"action": "arm", "id": "72", "setcmd": false})).await;
        assert_eq!(response, Response::success());
    }

    #[tokio::test]
    async fn test_move_validates_position() {
        let (handler, _rx) = handler();
        send(&handler, json!({"action": "link", "ids": ["72"]})).await;

        let response = send(
            &handler,
            json!({"action": "move", "position": [1.0, 2.0], "time": 1.0, "id": "72"}),
        )
        .await;
        assert_eq!(response, Response::failure("Invalid position data"));

        let response = send(
            &handler,
            json!({"action": "move", "position": [-5, 0, 7], "time": 12, "id": "72", "setcmd": false}),
        )
        .await;
        assert!(response.ok);

        let status = send(&handler, json!({"action": "status", "ids": ["72"]})).await;
        assert_eq!(status.status.unwrap()["72"]["pos"], json!([-5.0, 0.0, 7.0]));
    }

    #[tokio::test]
    async fn test_setcmd_queues_until_launch() {
        let (handler, _rx) = handler();
        send(&handler, json!({"action": "link", "ids": ["72"]})).await;
        send(&handler, json!({"action": "arm", "id": "72", "setcmd": true})).await;
        send(
            &handler,
            json!({"action": "takeoff", "altitude": 10.0, "time": 15.0, "id": "72", "setcmd": true}),
        )
        .await;

        let status = send(&handler, json!({"action": "status"})).await.status.unwrap();
        assert_eq!(status["72"]["queued"], json!(["arm", "takeoff"]));
        assert_eq!(status["72"]["armed"], json!(false));

        let response = send(&handler, json!({"action": "launch", "ids": []})).await;
        assert!(response.ok);

        let status = send(&handler, json!({"action": "status"})).await.status.unwrap();
        assert_eq!(status["72"]["armed"], json!(true));
        assert_eq!(status["72"]["pos"], json!([0.0, 0.0, 10.0]));
    }

    #[tokio::test]
    async fn test_launch_without_agents() {
        let (handler, _rx) = handler();
        let response = send(&handler, json!({"action": "launch", "ids": []})).await;
        assert_eq!(response, Response::failure("No agents to launch"));
    }

    #[tokio::test]
    async fn test_status_reports_unlinked_agents() {
        let (handler, _rx) = handler();
        let response = send(&handler, json!({"action": "status", "ids": ["80"]})).await;
        assert!(response.ok);
        assert_eq!(response.status.unwrap()["80"], json!({"error": "Not connected"}));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_requests() {
        let (handler, _rx) = handler();
        let response = send(&handler, json!({"action": "hover", "id": "72"})).await;
        assert_eq!(response, Response::failure("Unknown action: hover"));

        let response = handler.handle(b"{\"action\":\"arm\"").await;
        assert!(!response.ok);
        assert!(response.error.is_some());

        let response = handler.handle(b"[1,2,3]").await;
        assert_eq!(response, Response::failure("Request must be a JSON object"));
    }

    #[tokio::test]
    async fn test_unlink_all() {
        let (handler, _rx) = handler();
        send(&handler, json!({"action": "link", "ids": ["72", "74"]})).await;
        send(&handler, json!({"action": "unlink", "all": true, "ids": []})).await;

        let response = send(&handler, json!({"action": "kill", "id": "74"})).await;
        assert_eq!(response, Response::failure("Agent 74 not connected"));
    }

    #[tokio::test]
    async fn test_shutdown_signals_listener() {
        let (handler, rx) = handler();
        let response = send(&handler, json!({"action": "shutdown"})).await;
        assert!(response.ok);
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_immediate_delay_waits() {
        let (handler, _rx) = handler();
        send(&handler, json!({"action": "link", "ids": [72]})).await;

        let started = std::time::Instant::now();
        let response = send(&handler, json!({"action": "delay", "seconds": 0.05, "id": 72, "setcmd": false})).await;
        assert!(response.ok);
        assert!(started.elapsed() >= Duration::from_millis(50));

        // Queued delays answer at once
        let started = std::time::Instant::now();
        send(&handler, json!({"action": "delay", "seconds": 5.0, "id": "72", "setcmd": true})).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_out_of_range_numbers_change_nothing() {
        let (handler, _rx) = handler();
        send(&handler, json!({"action": "link", "ids": ["72"]})).await;
        let before = send(&handler, json!({"action": "status", "ids": ["72"]})).await.status;

        let started = std::time::Instant::now();
        let response = send(&handler, json!({"action": "delay", "seconds": 1e39, "id": "72", "setcmd": false})).await;
        assert!(!response.ok);
        assert!(response.error.unwrap().contains("seconds"));
        assert!(started.elapsed() < Duration::from_secs(1));

        let response = send(&handler, json!({"action": "delay", "seconds": 1e39, "id": "72", "setcmd": true})).await;
        assert!(!response.ok);

        // Finite as f32 but too long for a Duration
        let response = send(&handler, json!({"action": "delay", "seconds": 1e30, "id": "72", "setcmd": false})).await;
        assert_eq!(response, Response::failure("Invalid seconds: expected duration in seconds"));

        let response = send(
            &handler,
            json!({"action": "takeoff", "altitude": 1e39, "time": 1.0, "id": "72", "setcmd": false}),
        )
        .await;
        assert!(!response.ok);

        let response = send(
            &handler,
            json!({"action": "move", "position": [0.0, 1e39, 0.0], "time": 1.0, "id": "72", "setcmd": true}),
        )
        .await;
        assert_eq!(response, Response::failure("Invalid position data"));

        let after = send(&handler, json!({"action": "status", "ids": ["72"]})).await.status;
        assert_eq!(before, after);
    }
}
