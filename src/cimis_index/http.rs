// cimis_index - Daily watering index from CIMIS reference evapotranspiration
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::index::IndexSelection;
use crate::status::{ServiceInfo, StatusBoard, StatusDocument};
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const TEXT_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Global state shared between all HTTP requests via `Arc`.
#[derive(Debug)]
pub struct RequestContext {
    registry: Registry,
    board: Arc<StatusBoard>,
    info: ServiceInfo,
}

impl RequestContext {
    pub fn new(registry: Registry, board: Arc<StatusBoard>, info: ServiceInfo) -> Self {
        Self { registry, board, info }
    }

    fn document(&self) -> StatusDocument {
        StatusDocument::render(&self.board.snapshot(), &self.info, chrono::Utc::now().timestamp())
    }
}

#[derive(Debug, Deserialize)]
pub struct SetParams {
    index: Option<String>,
}

/// Build the router for the status, set, and metrics endpoints.
pub fn router(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/cimis/status", get(status_handler))
        .route("/cimis/set", get(set_handler))
        .route("/metrics", get(text_metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

pub async fn status_handler(State(context): State<Arc<RequestContext>>) -> Json<StatusDocument> {
    Json(context.document())
}

pub async fn set_handler(
    State(context): State<Arc<RequestContext>>,
    Query(params): Query<SetParams>,
) -> Json<StatusDocument> {
    if let Some(value) = params.index {
        match value.parse::<IndexSelection>() {
            Ok(selection) => {
                context.board.select(selection);
                tracing::info!(message = "selected index", index = %selection);
            }
            Err(e) => {
                tracing::warn!(message = "ignoring index selection", error = %e);
            }
        }
    }

    Json(context.document())
}

pub async fn text_metrics_handler(State(context): State<Arc<RequestContext>>) -> Response {
    let mut buf = String::new();

    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, TEXT_FORMAT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics to text format", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod test {
    use super::{router, RequestContext};
    use crate::index::{IndexSelection, ReferenceSet};
    use crate::metrics::IndexMetrics;
    use crate::poll::Poller;
    use crate::status::{ServiceInfo, StatusBoard};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use prometheus_client::registry::Registry;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn context() -> Arc<RequestContext> {
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 2, 0, 0).unwrap();
        let mut poller = Poller::new(ReferenceSet::new(2100).unwrap(), 16);
        poller.tick(&now);
        poller.complete(Ok(600), &now);

        let mut registry = Registry::default();
        let metrics = IndexMetrics::new(&mut registry);
        metrics.observe(&poller.report());

        let board = Arc::new(StatusBoard::new(poller.report(), IndexSelection::Weekly));
        let info = ServiceInfo {
            host: "garden".to_owned(),
            proxy: "garden".to_owned(),
            origin: "https://et.water.ca.gov/api/data".to_owned(),
            priority: 9,
        };

        Arc::new(RequestContext::new(registry, board, info))
    }

    async fn get(context: Arc<RequestContext>, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let res = router(context).oneshot(req).await.unwrap();
        let status = res.status();
        let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_status() {
        let (status, body) = get(context(), "/cimis/status").await;
        let doc: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(StatusCode::OK, status);
        assert_eq!("Weekly", doc["waterindex"]["status"]["type"]);
        assert_eq!(28, doc["waterindex"]["status"]["index"]);
        assert_eq!(14700, doc["waterindex"]["status"]["et0Reference"]);
    }

    #[tokio::test]
    async fn test_set_changes_selection() {
        let context = context();
        let (status, body) = get(context.clone(), "/cimis/set?index=DAILY").await;
        let doc: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(StatusCode::OK, status);
        assert_eq!("Daily", doc["waterindex"]["status"]["type"]);
        assert_eq!(600, doc["waterindex"]["status"]["et0"]);
        assert_eq!(2100, doc["waterindex"]["status"]["et0Reference"]);

        // Selection sticks for later status requests
        let (_, body) = get(context, "/cimis/status").await;
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!("Daily", doc["waterindex"]["status"]["type"]);
    }

    #[tokio::test]
    async fn test_set_unknown_keeps_selection() {
        let (status, body) = get(context(), "/cimis/set?index=yearly").await;
        let doc: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(StatusCode::OK, status);
        assert_eq!("Weekly", doc["waterindex"]["status"]["type"]);
    }

    #[tokio::test]
    async fn test_metrics() {
        let (status, body) = get(context(), "/metrics").await;
        let text = String::from_utf8(body).unwrap();

        assert_eq!(StatusCode::OK, status);
        assert!(text.contains("cimis_index_percent{period=\"daily\"} 28"), "{}", text);
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, _) = get(context(), "/nope").await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }
}
