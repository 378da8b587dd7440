use crate::error::{AppError, AppResult};
use crate::history::{HistoryPoint, HistoryService};
use crate::ingest::SensorIngestor;
use crate::pipeline::IngestStatsSnapshot;
use crate::telemetry::parse_reading;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct HttpState {
    pub ingestor: SensorIngestor,
    pub history: HistoryService,
    pub backend: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadingResponse {
    accepted: bool,
    samples: usize,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    store: &'static str,
    live_subscribers: usize,
    query_limit: usize,
    #[serde(flatten)]
    ingest: IngestStatsSnapshot,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_samples(
    State(state): State<HttpState>,
    Path((resource, start, aggr_window)): Path<(String, String, String)>,
) -> AppResult<Json<Vec<HistoryPoint>>> {
    let points = state
        .history
        .get_samples(&resource, &start, &aggr_window)
        .await?;
    Ok(Json(points))
}

async fn post_reading(
    State(state): State<HttpState>,
    body: Bytes,
) -> AppResult<Json<ReadingResponse>> {
    let mut payload = body.to_vec();
    let reading = parse_reading(&mut payload)
        .map_err(|err| AppError::bad_request(format!("invalid reading: {err}")))?;
    let emitted = state.ingestor.record(reading);
    Ok(Json(ReadingResponse {
        accepted: !emitted.is_empty(),
        samples: emitted.len(),
    }))
}

async fn get_status(State(state): State<HttpState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        store: state.backend,
        live_subscribers: state.ingestor.live().subscriber_count(),
        query_limit: state.history.limit(),
        ingest: state.ingestor.stats().snapshot(),
    })
}

/// Server-sent events, one per sample. The event name is the channel and the data is
/// `{"value": .., "ts": ..}`.
async fn live_events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.ingestor.live().subscribe()).filter_map(
        |message| async move {
            match message {
                Ok(message) => match Event::default()
                    .event(message.channel.as_str())
                    .json_data(&message)
                {
                    Ok(event) => Some(Ok(event)),
                    Err(err) => {
                        tracing::warn!(error=%err, channel=%message.channel, "failed to encode live event");
                        None
                    }
                },
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "live subscriber lagged; dropping messages");
                    None
                }
            }
        },
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/get_samples/{resource}/{start}/{aggr_window}",
            get(get_samples),
        )
        .route("/events", get(live_events))
        .route("/v1/readings", post(post_reading))
        .route("/v1/status", get(get_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::LiveFeed;
    use crate::pipeline::{self, IngestStats};
    use crate::store::SampleStore;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> HttpState {
        let store = SampleStore::memory();
        let stats = Arc::new(IngestStats::new());
        let (handle, _worker) =
            pipeline::start(store.clone(), stats, 64, 500, Duration::from_secs(60));
        let ingestor =
            SensorIngestor::with_rng(handle, LiveFeed::new(16), true, StdRng::seed_from_u64(7));
        HttpState {
            ingestor,
            history: HistoryService::new(store.clone(), 180),
            backend: store.backend(),
        }
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = router(test_state())
            .oneshot(get_request("/healthz"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_history_is_an_empty_array() {
        let resp = router(test_state())
            .oneshot(get_request("/get_samples/temperature/-3h/1m"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn malformed_window_is_a_bad_request() {
        let resp = router(test_state())
            .oneshot(get_request("/get_samples/temperature/-3h/ten"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = router(test_state())
            .oneshot(get_request("/get_samples/temperature/yesterday/1m"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = router(test_state())
            .oneshot(get_request("/get_samples/temperature/9223372036854775807/1m"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn posted_reading_is_queryable() {
        let state = test_state();
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/readings")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"celsius": 20.0, "humidity": 50.0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["accepted"], true);
        assert_eq!(body["samples"], 5);

        state.ingestor.flush().await.unwrap();

        let resp = app
            .clone()
            .oneshot(get_request("/get_samples/dew_point/-1h/1m"))
            .await
            .unwrap();
        let points = body_json(resp).await;
        let points = points.as_array().unwrap();
        assert_eq!(points.len(), 1);
        let dew_point = points[0]["value"].as_f64().unwrap();
        assert!((dew_point - 9.26).abs() < 0.01);

        let resp = app.oneshot(get_request("/v1/status")).await.unwrap();
        let status = body_json(resp).await;
        assert_eq!(status["store"], "memory");
        assert_eq!(status["accepted_batches"], 1);
        assert_eq!(status["written_samples"], 5);
    }

    #[tokio::test]
    async fn rejected_and_malformed_readings() {
        let app = router(test_state());
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/readings")
                    .body(Body::from(r#"{"humidity": 50.0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["accepted"], false);

        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/readings")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_endpoint_streams_sse() {
        let resp = router(test_state())
            .oneshot(get_request("/events"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
    }
}
