use axum::Router;

use crate::state::SharedState;

pub mod actor;
pub mod docs;
pub mod health;
pub mod sessions;
pub mod sse;
pub mod tickets;
pub mod valid_json;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sessions::router())
        .merge(tickets::router())
        .merge(sse::router())
        .merge(docs::router());

    api_router.with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::{config::AppConfig, state::AppState};

    fn app() -> Router<()> {
        router(AppState::new(AppConfig::default()))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(actor::USER_ID_HEADER, "scorer-1")
            .header(actor::ACCOUNT_ID_HEADER, "acct-1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router<()>, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn mutation(client_event_id: &str, sequence: u64, home: u32) -> Value {
        json!({
            "type": "create",
            "clientEventId": client_event_id,
            "sequence": sequence,
            "event": {
                "id": client_event_id,
                "inning": 1,
                "half": "top",
                "outsBefore": 0,
                "outsAfter": 1,
                "scoreAfter": {"home": home, "away": 0},
                "basesAfter": {"first": false, "second": false, "third": false},
                "notation": "6-3",
                "summary": "ground out",
                "createdBy": "scorer-1",
                "deviceId": "tablet-a",
                "createdAt": "2026-05-01T18:00:00Z"
            },
            "audit": {"userName": "Scorer", "deviceId": "tablet-a", "timestamp": "2026-05-01T18:00:00Z"}
        })
    }

    #[tokio::test]
    async fn healthcheck_reports_degraded_without_storage() {
        let (status, body) = send(
            &app(),
            Request::get("/healthcheck").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn requests_without_identity_are_unauthorized() {
        let request = Request::post("/live/sessions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"gameOrRoundId": "g"}).to_string()))
            .unwrap();
        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn session_start_and_scoring_flow() {
        let app = app();
        let (status, session) =
            send(&app, post("/live/sessions", json!({"gameOrRoundId": "game-1"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = session["sessionId"].as_str().unwrap().to_string();

        let (status, body) =
            send(&app, post("/live/sessions", json!({"gameOrRoundId": "game-1"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["sessionId"], id);

        let uri = format!("/live/sessions/{id}/mutations");
        let (status, body) = send(&app, post(&uri, mutation("c-1", 1, 1))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["serverSequence"], 1);

        let (status, retry) = send(&app, post(&uri, mutation("c-1", 1, 1))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(retry["serverEventId"], body["serverEventId"]);

        let (status, body) = send(&app, post(&uri, mutation("c-2", 0, 2))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "stale");
        assert_eq!(body["state"]["state"]["headSequence"], 1);
    }

    #[tokio::test]
    async fn malformed_mutations_are_rejected() {
        let app = app();
        let (_, session) =
            send(&app, post("/live/sessions", json!({"gameOrRoundId": "game-1"}))).await;
        let uri = format!("/live/sessions/{}/mutations", session["sessionId"].as_str().unwrap());

        let mut empty_audit = mutation("c-1", 1, 1);
        empty_audit["audit"]["userName"] = json!("");
        let (status, body) = send(&app, post(&uri, empty_audit)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let mut unknown_field = mutation("c-1", 1, 1);
        unknown_field["extra"] = json!(true);
        let (status, body) = send(&app, post(&uri, unknown_field)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "invalid_body");
        assert!(body["message"].as_str().unwrap().contains("extra"));

        let mut delete_without_target = mutation("c-1", 1, 1);
        delete_without_target["type"] = json!("delete");
        delete_without_target
            .as_object_mut()
            .unwrap()
            .remove("event");
        let (status, body) = send(&app, post(&uri, delete_without_target)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn stream_with_unknown_ticket_is_rejected() {
        let request = Request::get("/live/stream/game/game-1?ticket=bogus")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "ticket_rejected");
        assert_eq!(body["reason"], "not_found");
    }

    #[tokio::test]
    async fn issued_ticket_opens_a_stream() {
        let app = app();
        let (status, body) = send(
            &app,
            post(
                "/live/tickets",
                json!({"scope": {"kind": "game", "id": "game-1"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ticket = body["ticket"].as_str().unwrap().to_string();

        let request = Request::get(format!("/live/stream/game/game-1?ticket={ticket}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
    }
}
