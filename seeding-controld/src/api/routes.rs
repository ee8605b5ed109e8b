use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{oneshot, watch};
use shared::protocol::control_id;
use shared::types::{ServiceAction, ServiceDescriptor, StatusSnapshot};
use crate::discord::client::DiscordClient;
use crate::discord::payload::EPHEMERAL;
use crate::api::signature::SignatureVerifier;
use crate::discord::reply::{Ack, InteractionReply};
use crate::reconciler::{PendingCommand, ReconcilerHandle};

const PING: u8 = 1;
const MESSAGE_COMPONENT: u8 = 3;

const PONG: u8 = 1;
const CHANNEL_MESSAGE: u8 = 4;
const DEFERRED_CHANNEL_MESSAGE: u8 = 5;

/// The platform drops interactions not answered within three seconds
const ACK_DEADLINE: Duration = Duration::from_secs(2);

/// Interaction payloads are small; anything bigger is not from the platform
const MAX_INTERACTION_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: ReconcilerHandle,
    pub client: Arc<DiscordClient>,
    pub controls: Arc<ControlMap>,
    pub snapshot_rx: watch::Receiver<StatusSnapshot>,
    pub verifier: Arc<SignatureVerifier>,
}

/// Resolves button ids back to the service and action they stand for.
pub struct ControlMap {
    by_id: HashMap<String, (ServiceDescriptor, ServiceAction)>,
}

impl ControlMap {
    pub fn new(services: &[ServiceDescriptor], location: &str) -> Self {
        let by_id = services
            .iter()
            .flat_map(|service| {
                [ServiceAction::Start, ServiceAction::Stop].map(|action| {
                    (control_id(action, &service.label, location), (service.clone(), action))
                })
            })
            .collect();
        Self { by_id }
    }

    pub fn resolve(&self, custom_id: &str) -> Option<&(ServiceDescriptor, ServiceAction)> {
        self.by_id.get(custom_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub data: Option<InteractionData>,
}

#[derive(Debug, Deserialize)]
pub struct InteractionData {
    #[serde(default)]
    pub custom_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let signed = Router::new()
        .route("/interactions", post(interactions))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_signature));

    Router::new()
        .merge(signed)
        .route("/v1/status", get(get_status))
        .with_state(state)
}

/// Rejects requests not signed with the application key before the body
/// is parsed.
async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_INTERACTION_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    if let Err(e) = state.verifier.verify(&parts.headers, &body) {
        tracing::warn!("Rejecting interaction: {}", e);
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(body))).await)
}

fn ephemeral(content: impl Into<String>) -> Value {
    json!({
        "type": CHANNEL_MESSAGE,
        "data": { "content": content.into(), "flags": EPHEMERAL },
    })
}

async fn interactions(
    State(state): State<AppState>,
    Json(interaction): Json<Interaction>,
) -> Result<Json<Value>, StatusCode> {
    match interaction.kind {
        PING => Ok(Json(json!({ "type": PONG }))),
        MESSAGE_COMPONENT => Ok(Json(handle_component(&state, interaction).await)),
        other => {
            tracing::warn!("Unsupported interaction type {}", other);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

async fn handle_component(state: &AppState, interaction: Interaction) -> Value {
    let custom_id = interaction
        .data
        .and_then(|d| d.custom_id)
        .unwrap_or_default();

    let Some((service, action)) = state.controls.resolve(&custom_id).cloned() else {
        tracing::warn!("Ignoring unknown control {:?}", custom_id);
        return ephemeral("Unknown control");
    };

    let (ack_tx, ack_rx) = oneshot::channel();
    let reply = InteractionReply::new(
        state.client.clone(),
        interaction.token,
        interaction.channel_id.unwrap_or_default(),
        ack_tx,
    );
    let name = service.name.clone();
    let command = PendingCommand { service, action, reply: Arc::new(reply) };

    if let Err(e) = state.reconciler.submit(command).await {
        tracing::error!("Failed to queue {} for {}: {}", action, name, e);
        return ephemeral(format!("Error executing command for {}: {}", name, e));
    }

    // the reconciler releases us before it touches docker
    match tokio::time::timeout(ACK_DEADLINE, ack_rx).await {
        Ok(Ok(Ack::Deferred)) => deferred(),
        Ok(Ok(Ack::Reply(content))) => ephemeral(content),
        Ok(Err(_)) => {
            tracing::error!("{} {} dropped without a reply", action, name);
            ephemeral(format!("Error executing command for {}: command was dropped", name))
        }
        Err(_) => {
            tracing::warn!("{} {} not acknowledged within {:?}, deferring anyway", action, name, ACK_DEADLINE);
            deferred()
        }
    }
}

fn deferred() -> Value {
    json!({
        "type": DEFERRED_CHANNEL_MESSAGE,
        "data": { "flags": EPHEMERAL },
    })
}

async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.snapshot_rx.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;
    use ed25519_dalek::Signer;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use crate::api::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
    use crate::reconciler::Trigger;
    use crate::testing::{descriptor, discord_config, signing_key, test_client};

    fn state() -> (AppState, mpsc::Receiver<Trigger>) {
        let services = vec![descriptor("midcap"), descriptor("lastcap")];
        let (tx, rx) = mpsc::channel(4);
        let (_snapshot_tx, snapshot_rx) = watch::channel(StatusSnapshot::unknown(&services));

        let state = AppState {
            reconciler: ReconcilerHandle::new(tx),
            client: Arc::new(test_client()),
            controls: Arc::new(ControlMap::new(&services, "eu-server")),
            snapshot_rx,
            verifier: Arc::new(SignatureVerifier::from_hex(&discord_config().public_key).unwrap()),
        };
        (state, rx)
    }

    fn component(custom_id: &str) -> Interaction {
        Interaction {
            kind: MESSAGE_COMPONENT,
            token: "interaction-token".into(),
            channel_id: Some("2".into()),
            data: Some(InteractionData { custom_id: Some(custom_id.into()) }),
        }
    }

    #[test]
    fn test_control_map() {
        let controls = ControlMap::new(&[descriptor("midcap"), descriptor("lastcap")], "eu-server");

        let (service, action) = controls.resolve("stop-lastcap-eu-server").unwrap();
        assert_eq!(service.name, "hll-geofences-lastcap");
        assert_eq!(*action, ServiceAction::Stop);

        assert!(controls.resolve("stop-lastcap-us-server").is_none());
        assert!(controls.resolve("restart-midcap-eu-server").is_none());
    }

    #[test]
    fn test_interaction_parse() {
        let interaction: Interaction = serde_json::from_str(
            r#"{"type":3,"id":"1","token":"t","channel_id":"42","data":{"custom_id":"start-midcap-eu","component_type":2}}"#,
        )
        .unwrap();
        assert_eq!(interaction.kind, MESSAGE_COMPONENT);
        assert_eq!(interaction.data.unwrap().custom_id.as_deref(), Some("start-midcap-eu"));

        let ping: Interaction = serde_json::from_str(r#"{"type":1}"#).unwrap();
        assert_eq!(ping.kind, PING);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (state, _rx) = state();
        let ping = Interaction { kind: PING, token: String::new(), channel_id: None, data: None };

        let Json(body) = interactions(State(state), Json(ping)).await.unwrap();
        assert_eq!(body["type"], 1);
    }

    #[tokio::test]
    async fn test_button_press_is_deferred_after_ack() {
        let (state, mut rx) = state();

        let reconciler = tokio::spawn(async move {
            match rx.recv().await {
                Some(Trigger::Command(command)) => {
                    command.reply.acknowledge().await.unwrap();
                    (command.service.name, command.action)
                }
                _ => panic!("expected a command"),
            }
        });

        let Json(body) = interactions(State(state), Json(component("start-midcap-eu-server")))
            .await
            .unwrap();

        assert_eq!(body["type"], 5);
        assert_eq!(body["data"]["flags"], 64);
        let (name, action) = reconciler.await.unwrap();
        assert_eq!(name, "hll-geofences-midcap");
        assert_eq!(action, ServiceAction::Start);
    }

    #[tokio::test]
    async fn test_unknown_control_is_ignored() {
        let (state, mut rx) = state();

        let Json(body) = interactions(State(state), Json(component("start-other-eu-server")))
            .await
            .unwrap();

        assert_eq!(body["type"], 4);
        assert_eq!(body["data"]["content"], "Unknown control");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconciler_gone() {
        let (state, rx) = state();
        drop(rx);

        let Json(body) = interactions(State(state), Json(component("stop-midcap-eu-server")))
            .await
            .unwrap();

        assert_eq!(body["type"], 4);
        assert!(body["data"]["content"]
            .as_str()
            .unwrap()
            .starts_with("Error executing command for hll-geofences-midcap"));
    }

    #[tokio::test]
    async fn test_unsupported_type() {
        let (state, _rx) = state();
        let autocomplete = Interaction { kind: 4, token: String::new(), channel_id: None, data: None };

        let err = interactions(State(state), Json(autocomplete)).await.unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (state, _rx) = state();
        let Json(snapshot) = get_status(State(state)).await;
        assert_eq!(snapshot.services.len(), 2);
        assert!(!snapshot.any_running());
    }

    #[tokio::test]
    async fn test_dropped_command_is_answered() {
        let (state, mut rx) = state();

        let reconciler = tokio::spawn(async move {
            // received, then lost before anyone acknowledged it
            drop(rx.recv().await);
        });

        let started = std::time::Instant::now();
        let Json(body) = interactions(State(state), Json(component("stop-midcap-eu-server")))
            .await
            .unwrap();
        reconciler.await.unwrap();

        assert!(started.elapsed() < ACK_DEADLINE);
        assert_eq!(body["type"], 4);
        assert_eq!(
            body["data"]["content"],
            "Error executing command for hll-geofences-midcap: command was dropped"
        );
    }

    #[tokio::test]
    async fn test_reply_before_ack_is_immediate() {
        let (state, mut rx) = state();

        let reconciler = tokio::spawn(async move {
            if let Some(Trigger::Command(command)) = rx.recv().await {
                let content = "Error executing command for hll-geofences-midcap: shutting down";
                command.reply.finish(content).await.unwrap();
            }
        });

        let Json(body) = interactions(State(state), Json(component("start-midcap-eu-server")))
            .await
            .unwrap();
        reconciler.await.unwrap();

        assert_eq!(body["type"], 4);
        assert_eq!(body["data"]["flags"], 64);
        assert!(body["data"]["content"].as_str().unwrap().ends_with("shutting down"));
    }

    fn signed_request(body: &'static str, sign: bool) -> axum::http::Request<Body> {
        let timestamp = "1700000000";
        let mut request = axum::http::Request::post("/interactions")
            .header(CONTENT_TYPE, "application/json");
        if sign {
            let signature = signing_key().sign(format!("{}{}", timestamp, body).as_bytes());
            request = request
                .header(SIGNATURE_HEADER, hex::encode(signature.to_bytes()))
                .header(TIMESTAMP_HEADER, timestamp);
        }
        request.body(Body::from(body)).unwrap()
    }

    const FORGED_STOP: &str =
        r#"{"type":3,"token":"forged","channel_id":"2","data":{"custom_id":"stop-midcap-eu-server"}}"#;

    #[tokio::test]
    async fn test_unsigned_interaction_rejected() {
        let (state, mut rx) = state();

        let response = router(state).oneshot(signed_request(FORGED_STOP, false)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err(), "nothing may be queued");
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let (state, mut rx) = state();
        let mut request = signed_request(r#"{"type":1}"#, true);
        *request.body_mut() = Body::from(FORGED_STOP);

        let response = router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signed_ping_accepted() {
        let (state, _rx) = state();

        let response = router(state).oneshot(signed_request(r#"{"type":1}"#, true)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], 1);
    }

    #[tokio::test]
    async fn test_status_needs_no_signature() {
        let (state, _rx) = state();
        let request = axum::http::Request::get("/v1/status").body(Body::empty()).unwrap();

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
