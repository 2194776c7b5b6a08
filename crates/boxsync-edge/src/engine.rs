//! # Sync Engine Boundary
//!
//! The row-level synchronization engine is an external capability. This
//! crate only calls it with the practice filters and a bearer token, and
//! reads back the counts.

use async_trait::async_trait;
use boxsync_core::{SyncReport, TenantFilterSet};
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::token::SessionToken;

// =============================================================================
// Progress
// =============================================================================

/// Receives stage/message pairs while a pass runs. Observability only.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: &str, message: &str);
}

/// Forwards progress to `tracing`.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, stage: &str, message: &str) {
        info!(target: "boxsync::progress", "{}: {}", stage, message);
    }
}

// =============================================================================
// Engine Trait
// =============================================================================

/// One full synchronization pass.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    async fn synchronize(
        &self,
        filters: &TenantFilterSet,
        credentials: &SessionToken,
        progress: &dyn ProgressSink,
    ) -> SyncResult<SyncReport>;
}

// =============================================================================
// HTTP Engine
// =============================================================================

/// Engine reached through the central sync proxy endpoint.
///
/// Posts the filter set as JSON with the session bearer and expects a
/// [`SyncReport`] back.
pub struct HttpSyncEngine {
    client: reqwest::Client,
    url: Url,
}

impl HttpSyncEngine {
    pub fn new(url: Url, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::SyncEngine(e.to_string()))?;

        Ok(HttpSyncEngine { client, url })
    }
}

#[async_trait]
impl SyncEngine for HttpSyncEngine {
    async fn synchronize(
        &self,
        filters: &TenantFilterSet,
        credentials: &SessionToken,
        progress: &dyn ProgressSink,
    ) -> SyncResult<SyncReport> {
        progress.report(
            "begin",
            &format!("{} tables for practice {}", filters.clauses().len(), filters.practice_id()),
        );

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(credentials.value())
            .json(filters)
            .send()
            .await
            .map_err(|e| SyncError::SyncEngine(e.to_string()))?
            .error_for_status()
            .map_err(|e| SyncError::SyncEngine(e.to_string()))?;

        progress.report("apply", "engine responded, reading result");

        let report: SyncReport = response
            .json()
            .await
            .map_err(|e| SyncError::SyncEngine(format!("unreadable sync result: {}", e)))?;

        progress.report(
            "end",
            &format!("downloaded {}, uploaded {}", report.downloaded, report.uploaded),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingProgress {
        stages: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingProgress {
        fn report(&self, stage: &str, _message: &str) {
            self.stages.lock().unwrap().push(stage.to_string());
        }
    }

    async fn sync_post(headers: HeaderMap, Json(filters): Json<TenantFilterSet>) -> Response {
        let auth = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if auth != Some("Bearer tok-1") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match filters.practice_id() {
            "P1" => Json(serde_json::json!({
                "completedAt": "2024-05-01T10:00:00Z",
                "downloaded": 4,
                "uploaded": 2
            }))
            .into_response(),
            "garbled" => "not json".into_response(),
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    async fn engine() -> HttpSyncEngine {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let router = Router::new().route("/api/sync/post", post(sync_post));
            axum::serve(listener, router).await.unwrap();
        });

        let url = Url::parse(&format!("http://{}/api/sync/post", addr)).unwrap();
        HttpSyncEngine::new(url, Duration::from_secs(5)).unwrap()
    }

    fn token(value: &str) -> SessionToken {
        SessionToken::new(value, chrono::Utc::now() + chrono::Duration::hours(1))
    }

    #[tokio::test]
    async fn test_engine_reads_report() {
        let engine = engine().await;
        let progress = RecordingProgress::default();

        let report = engine
            .synchronize(&TenantFilterSet::for_practice("P1"), &token("tok-1"), &progress)
            .await
            .unwrap();

        assert_eq!(report.downloaded, 4);
        assert_eq!(report.uploaded, 2);
        assert!(report.has_uploads());
        assert_eq!(*progress.stages.lock().unwrap(), ["begin", "apply", "end"]);
    }

    #[tokio::test]
    async fn test_engine_error_status_is_sync_error() {
        let engine = engine().await;

        let err = engine
            .synchronize(&TenantFilterSet::for_practice("P9"), &token("tok-1"), &TracingProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncEngine(_)));

        let err = engine
            .synchronize(&TenantFilterSet::for_practice("P1"), &token("stale"), &TracingProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncEngine(_)));
    }

    #[tokio::test]
    async fn test_engine_unreadable_result() {
        let engine = engine().await;
        let progress = RecordingProgress::default();

        let err = engine
            .synchronize(&TenantFilterSet::for_practice("garbled"), &token("tok-1"), &progress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unreadable sync result"));
        assert_eq!(*progress.stages.lock().unwrap(), ["begin", "apply"]);
    }
}
