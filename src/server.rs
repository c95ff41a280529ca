//! HTTP surface over the pipeline and the catalog.

use crate::error::SpecGenieError;
use crate::pipeline::{Pipeline, SheetsRun, TestRun};
use crate::record::{EvaluationRecord, SheetOutput};
use crate::store::{Category, PromptDescriptor, PromptRole};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Error body returned by every route.
pub struct ApiError(SpecGenieError);

impl From<SpecGenieError> for ApiError {
    fn from(err: SpecGenieError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SpecGenieError::NotFound(_) => StatusCode::NOT_FOUND,
            SpecGenieError::Config(_) | SpecGenieError::InvalidConfig(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PromptsQuery {
    role: PromptRole,
}

/// Rows keyed by their position in the run.
pub async fn test(
    State(pipeline): State<Pipeline>,
    Query(run): Query<TestRun>,
) -> Result<Json<BTreeMap<usize, EvaluationRecord>>, ApiError> {
    let records = pipeline.run_test(&run).await?;
    Ok(Json(records.into_iter().enumerate().collect()))
}

pub async fn categories(State(pipeline): State<Pipeline>) -> Json<Vec<Category>> {
    Json(pipeline.store().list_categories())
}

pub async fn prompts(
    State(pipeline): State<Pipeline>,
    Query(query): Query<PromptsQuery>,
) -> Json<Vec<PromptDescriptor>> {
    Json(pipeline.store().list_prompts(query.role))
}

pub async fn get_sheets(
    State(pipeline): State<Pipeline>,
    Json(run): Json<SheetsRun>,
) -> Result<Json<Vec<SheetOutput>>, ApiError> {
    Ok(Json(pipeline.generate_sheets(&run).await?))
}

/// Router exposing the four routes.
pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/test", get(test))
        .route("/categories", get(categories))
        .route("/prompts", get(prompts))
        .route("/get_sheets", post(get_sheets))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

/// Serve the router until the process is stopped.
pub async fn run_server(pipeline: Pipeline, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedFactory, pipeline};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_route_returns_rows_keyed_by_index() {
        let factory = Arc::new(ScriptedFactory::default());
        factory.maker.push(r#"{"voltage":"5V","part_number":"42"}"#);
        factory.maker.push("unparseable");
        factory.helper.push("Nice widget.");
        factory.helper.push(r#"{"verdict":"Correct","reasoning":"ok"}"#);
        let app = router(pipeline(factory));

        let (status, body) = call(
            app,
            get_request("/test?llm=gemini&judge=gpt&copywriter=gpt&category=1&google_search=false"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["0"]["Similarity Score"]["verdict"], "Correct");
        assert_eq!(body["0"]["Similarity Score"]["score"], 100.0);
        assert_eq!(body["0"]["LLM Evaluation"]["verdict"], "Correct");
        assert_eq!(body["0"]["Spec Sheet"]["description"], "Nice widget.");
        assert_eq!(body["1"]["Spec Sheet"], "unparseable");
        assert_eq!(body["1"]["Similarity Score"]["verdict"], Value::Null);
        assert_eq!(body["1"]["Ground Truth"]["name"], "WidgetY");
    }

    #[tokio::test]
    async fn test_route_unknown_category_is_404() {
        let app = router(pipeline(Arc::new(ScriptedFactory::default())));

        let (status, body) = call(
            app,
            get_request("/test?llm=gemini&judge=gpt&copywriter=gpt&category=9"),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("category 9"));
    }

    #[tokio::test]
    async fn test_categories_route() {
        let app = router(pipeline(Arc::new(ScriptedFactory::default())));

        let (status, body) = call(app, get_request("/categories")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"id": 1, "name": "Widgets"}]));
    }

    #[tokio::test]
    async fn test_prompts_route() {
        let app = router(pipeline(Arc::new(ScriptedFactory::default())));

        let (status, body) = call(app, get_request("/prompts?role=Judge")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{"category": "Widgets", "lang": "en", "number": 1, "version": 1, "content": "judge prompt"}])
        );
    }

    #[tokio::test]
    async fn test_get_sheets_route() {
        let factory = Arc::new(ScriptedFactory::default());
        factory.maker.push(r#"{"voltage":"5V"}"#);
        factory.helper.push("Five volts.");
        let app = router(pipeline(factory));

        let payload = json!({
            "products": ["Acme 42"],
            "llm": "gemini",
            "copywriter": "gpt",
            "category": 1,
            "google_search": false
        });
        let request = Request::post("/get_sheets")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap();

        let (status, body) = call(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"voltage": "5V", "description": "Five volts."}]));
    }
}
