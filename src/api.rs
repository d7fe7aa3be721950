//! API server for email-scout.

use crate::models::{EmailMatch, Subject};
use crate::pipeline::Pipeline;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::Semaphore;
use warp::{Filter, Rejection, Reply, http::StatusCode};

/// Maximum number of subjects processed at once across all requests.
const MAX_CONCURRENT_SUBJECTS: usize = 4;

/// API response structure
#[derive(Serialize, Deserialize)]
struct ApiResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<EmailMatch>,
}

/// Batch API request structure
#[derive(Deserialize)]
struct BatchRequest {
    subjects: Vec<Subject>,
}

/// Batch API response structure
#[derive(Serialize)]
struct BatchResponse {
    success: bool,
    message: String,
    results: Vec<EmailMatch>,
}

/// All routes, with rejections turned into JSON error replies.
fn routes(
    pipeline: Arc<Pipeline>,
    semaphore: Arc<Semaphore>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let pipeline_filter = warp::any().map(move || pipeline.clone());
    let semaphore_filter = warp::any().map(move || semaphore.clone());

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&ApiResponse {
                success: true,
                message: "Email Scout API is running".to_string(),
                result: None,
            })
        });

    let find = warp::path("find")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(pipeline_filter.clone())
        .and(semaphore_filter.clone())
        .and_then(handle_find);

    let batch = warp::path("batch")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(pipeline_filter)
        .and(semaphore_filter)
        .and_then(handle_batch);

    health
        .or(find)
        .or(batch)
        .with(warp::cors().allow_any_origin())
        .recover(handle_rejection)
}

/// Start the API server
pub(crate) async fn start_api_server(pipeline: Pipeline, port: u16) {
    let routes = routes(
        Arc::new(pipeline),
        Arc::new(Semaphore::new(MAX_CONCURRENT_SUBJECTS)),
    );

    tracing::info!("Starting API server on port {}", port);
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}

/// Handle a single subject
async fn handle_find(
    subject: Subject,
    pipeline: Arc<Pipeline>,
    semaphore: Arc<Semaphore>,
) -> Result<impl Reply, Rejection> {
    if subject.identifier.trim().is_empty() {
        return Err(warp::reject::custom(InvalidSubject));
    }
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| warp::reject::custom(ApiError))?;

    tracing::info!("Processing find request for {}", subject.identifier);
    let result = pipeline.find_email(&subject).await;
    let message = if result.is_found() {
        "Email found".to_string()
    } else {
        "No email found".to_string()
    };

    Ok(warp::reply::json(&ApiResponse {
        success: true,
        message,
        result: Some(result),
    }))
}

/// Handle a batch of subjects, processed one after another
async fn handle_batch(
    batch: BatchRequest,
    pipeline: Arc<Pipeline>,
    semaphore: Arc<Semaphore>,
) -> Result<impl Reply, Rejection> {
    tracing::info!("Processing batch of {} subjects", batch.subjects.len());

    let mut results = Vec::with_capacity(batch.subjects.len());
    for subject in batch.subjects {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| warp::reject::custom(ApiError))?;
        results.push(pipeline.find_email(&subject).await);
    }

    let found = results.iter().filter(|r| r.is_found()).count();
    Ok(warp::reply::json(&BatchResponse {
        success: true,
        message: format!("Processed {} subjects, found {} emails", results.len(), found),
        results,
    }))
}

/// Custom error type for API rejections
#[derive(Debug)]
struct ApiError;

impl warp::reject::Reject for ApiError {}

#[derive(Debug)]
struct InvalidSubject;

impl warp::reject::Reject for InvalidSubject {}

/// Handle API rejections
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if err.find::<InvalidSubject>().is_some() {
        (StatusCode::BAD_REQUEST, "Subject identifier must not be empty")
    } else if err.find::<ApiError>().is_some() {
        (StatusCode::INTERNAL_SERVER_ERROR, "Server error")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        (StatusCode::BAD_REQUEST, "Bad request")
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse {
            success: false,
            message: message.to_string(),
            result: None,
        }),
        status,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fetcher::PageFetcher;
    use crate::harvest::RegexExtractor;
    use crate::pipeline::PipelineSettings;
    use async_trait::async_trait;

    struct StaticFetcher;

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> String {
            match url {
                "https://uni.edu/jane" => "Jane Doe <jane.doe@uni.edu>".to_string(),
                _ => String::new(),
            }
        }
    }

    fn test_routes() -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let settings = PipelineSettings {
            pause_between_searches: (0.0, 0.0),
            ..PipelineSettings::from_config(&Config::default())
        };
        let pipeline = Pipeline::new(
            None,
            Arc::new(StaticFetcher),
            Arc::new(RegexExtractor),
            settings,
        );
        routes(Arc::new(pipeline), Arc::new(Semaphore::new(2)))
    }

    #[tokio::test]
    async fn test_health() {
        let res = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&test_routes())
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_find_with_urls() {
        let res = warp::test::request()
            .method("POST")
            .path("/find")
            .json(&serde_json::json!({
                "identifier": "Jane Doe",
                "urls": ["https://uni.edu/jane"]
            }))
            .reply(&test_routes())
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["result"]["email"], "jane.doe@uni.edu");
        assert_eq!(body["result"]["identifier"], "Jane Doe");
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_empty_rows() {
        let res = warp::test::request()
            .method("POST")
            .path("/batch")
            .json(&serde_json::json!({
                "subjects": [
                    {"identifier": "John Roe", "urls": ["https://lab.org/none"]},
                    {"identifier": "Jane Doe", "urls": ["https://uni.edu/jane"]}
                ]
            }))
            .reply(&test_routes())
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["results"][0]["email"], "");
        assert_eq!(body["results"][1]["email"], "jane.doe@uni.edu");
    }

    #[tokio::test]
    async fn test_rejections_are_json() {
        let routes = test_routes();

        let res = warp::test::request()
            .method("POST")
            .path("/find")
            .json(&serde_json::json!({"identifier": "  "}))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = warp::test::request()
            .method("POST")
            .path("/find")
            .body("not json")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = warp::test::request()
            .method("GET")
            .path("/nope")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
