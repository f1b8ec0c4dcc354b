// ============================
// crates/backend-lib/src/webhook.rs
// ============================
//! Call-provider webhook receiver.
//!
//! The provider posts room events (participant departures in particular)
//! keyed by the external room handle. Every request must carry an
//! `x-huddle-signature` header: the base64 HMAC-SHA256 of the raw body
//! under the shared webhook secret. Unknown event types are acknowledged
//! and ignored so the provider does not retry them forever.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::AppError;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-huddle-signature";

#[derive(Debug, Deserialize)]
struct CallEvent {
    event: String,
    /// External room handle, not a channel id.
    room: String,
    #[serde(default)]
    user_id: Option<String>,
}

pub async fn calls_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    verify_signature(&state.settings.webhook_secret, &headers, &body)?;
    let payload: CallEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidInput(format!("malformed webhook body: {e}")))?;

    match payload.event.as_str() {
        "participant.left" => {
            let user_id = payload.user_id.ok_or_else(|| {
                AppError::InvalidInput("participant.left without user_id".into())
            })?;
            info!(room = payload.room, user_id, "provider reported departure");
            state.meetings.force_leave(&payload.room, &user_id).await?;
        },
        other => {
            // acknowledged so the provider stops retrying
            debug!(event = other, room = payload.room, "ignoring webhook event");
        },
    }
    Ok(StatusCode::OK)
}

fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::PermissionDenied("missing webhook signature".into()))?;
    let signature = BASE64
        .decode(header)
        .map_err(|_| AppError::PermissionDenied("malformed webhook signature".into()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("webhook secret unusable: {e}")))?;
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| AppError::PermissionDenied("webhook signature mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sign a payload the way the provider does.
    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("any key length works");
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }
    use crate::access::Roster;
    use crate::calls::LocalCallProvider;
    use crate::config::Settings;
    use crate::store::MemoryStore;
    use crate::ws_router;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use huddle_common::RoomId;
    use tower::ServiceExt;

    struct Fixture {
        router: Router,
        state: Arc<AppState>,
        secret: String,
    }

    fn fixture() -> Fixture {
        let settings = Settings::default();
        let secret = settings.webhook_secret.clone();
        let roster = Arc::new(Roster::new());
        roster.add_member(RoomId::channel("general"), "alice");
        let state = AppState::new(
            settings,
            roster.clone(),
            roster,
            Arc::new(MemoryStore::new()),
            Arc::new(LocalCallProvider::new()),
        );
        Fixture {
            router: ws_router::router(state.clone()),
            state,
            secret,
        }
    }

    fn signed_request(secret: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/hooks/calls")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, sign(secret, body.as_bytes()))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_and_bad_signatures() {
        let f = fixture();
        let body = r#"{"event":"participant.left","room":"r1","user_id":"alice"}"#;

        let unsigned = Request::builder()
            .method("POST")
            .uri("/hooks/calls")
            .body(Body::from(body))
            .unwrap();
        let response = f.router.clone().oneshot(unsigned).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = f
            .router
            .clone()
            .oneshot(signed_request("wrong-secret", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn participant_left_winds_down_the_last_departure() {
        let f = fixture();
        let session = f
            .state
            .meetings
            .start("general", "alice", None)
            .await
            .unwrap();

        let body = format!(
            r#"{{"event":"participant.left","room":"{}","user_id":"alice"}}"#,
            session.room_handle
        );
        let response = f
            .router
            .clone()
            .oneshot(signed_request(&f.secret, &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // alice was the only participant; the session ended
        assert!(f
            .state
            .meetings
            .join("general", "alice")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unknown_events_and_rooms_are_acknowledged() {
        let f = fixture();
        let body = r#"{"event":"recording.ready","room":"r1"}"#;
        let response = f
            .router
            .clone()
            .oneshot(signed_request(&f.secret, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // a departure for a room with no active session is a no-op
        let body = r#"{"event":"participant.left","room":"gone","user_id":"alice"}"#;
        let response = f
            .router
            .clone()
            .oneshot(signed_request(&f.secret, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
