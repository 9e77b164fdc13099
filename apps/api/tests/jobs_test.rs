//! HTTP-level tests for the job and media routes, over the in-memory store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use attune_api::api_router;
use attune_queue::{GeneratedArtifact, JobQueue, MemoryQueueStore, Stage};

fn test_app() -> (Router, JobQueue) {
    let queue = JobQueue::new(Arc::new(MemoryQueueStore::new()), 3);
    (api_router(queue.clone()), queue)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn valid_create_body() -> Value {
    json!({
        "job_type": "complete_reading",
        "params": {"subject": {"name": "Ada", "birth_date": "1990-03-14"}}
    })
}

#[tokio::test]
async fn test_create_job_returns_created() {
    let (app, _) = test_app();

    let (status, body) = send(&app, post_json("/jobs", valid_create_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["job_type"], "complete_reading");
    assert_eq!(body["progress"]["total"], 16);
}

#[tokio::test]
async fn test_create_job_validation_error() {
    let (app, _) = test_app();

    // Compatibility reading without the partner's identifying data.
    let (status, body) = send(
        &app,
        post_json(
            "/jobs",
            json!({
                "job_type": "compatibility_reading",
                "params": {"subject": {"name": "Ada", "birth_date": "1990-03-14"}}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["message"].as_str().unwrap().contains("partner"));
}

#[tokio::test]
async fn test_get_job_with_documents() {
    let (app, _) = test_app();

    let (_, created) = send(&app, post_json("/jobs", valid_create_body())).await;
    let job_id = created["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["id"], created["id"]);
    let documents = body["documents"].as_array().unwrap();
    assert_eq!(documents.len(), 5);
    assert_eq!(documents[0]["title"], "Western Astrology");
    assert!(documents[0]["text"].is_null());
}

#[tokio::test]
async fn test_get_job_not_found() {
    let (app, _) = test_app();
    let (status, body) = send(
        &app,
        get("/jobs/00000000-0000-0000-0000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_get_job_tasks_diagnostics() {
    let (app, _) = test_app();

    let (_, created) = send(&app, post_json("/jobs", valid_create_body())).await;
    let job_id = created["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/jobs/{job_id}/tasks"))).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = body.as_array().unwrap();
    assert_eq!(tasks.len(), 16);
    assert!(tasks.iter().all(|t| t["status"] == "pending"));
}

#[tokio::test]
async fn test_cancel_job_then_conflict() {
    let (app, _) = test_app();

    let (_, created) = send(&app, post_json("/jobs", valid_create_body())).await;
    let job_id = created["id"].as_str().unwrap().to_string();

    let cancel_uri = format!("/jobs/{job_id}/cancel");
    let (status, body) = send(&app, post_json(&cancel_uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, post_json(&cancel_uri, json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_media_fetch_resolves_artifact() {
    let (app, queue) = test_app();

    let (_, created) = send(&app, post_json("/jobs", valid_create_body())).await;
    let job_id = created["id"].as_str().unwrap().to_string();

    // Drive one text task to completion through the queue service.
    let task = queue
        .claim_next_task(Stage::Text, "test-worker")
        .await
        .unwrap()
        .unwrap();
    queue.start_task(&task, "test-worker").await.unwrap();
    queue
        .complete_task(
            &task,
            "test-worker",
            GeneratedArtifact {
                storage_reference: "s3://attune/text/1.md".to_string(),
                metadata: json!({}),
            },
        )
        .await
        .unwrap();

    let (status, body) = send(&app, get(&format!("/jobs/{job_id}/documents/1/text"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["artifact"]["storage_reference"], "s3://attune/text/1.md");
    assert_eq!(body["document_index"], 1);

    // Not generated yet.
    let (status, _) = send(&app, get(&format!("/jobs/{job_id}/documents/2/text"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Unknown stage name.
    let (status, body) = send(&app, get(&format!("/jobs/{job_id}/documents/1/video"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PATH_PARAM");
}

#[tokio::test]
async fn test_reset_stuck_tasks_route() {
    let (app, queue) = test_app();

    let (_, created) = send(&app, post_json("/jobs", valid_create_body())).await;
    let job_id = created["id"].as_str().unwrap().to_string();

    let task = queue
        .claim_next_task(Stage::Text, "wedged-worker")
        .await
        .unwrap()
        .unwrap();
    queue.start_task(&task, "wedged-worker").await.unwrap();

    let (status, body) = send(&app, post_json(&format!("/jobs/{job_id}/reset"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reset_count"], 1);
    assert_eq!(body["tasks"][0]["status"], "pending");
}

#[tokio::test]
async fn test_delete_job() {
    let (app, _) = test_app();

    let (_, created) = send(&app, post_json("/jobs", valid_create_body())).await;
    let job_id = created["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/jobs/{job_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get(&format!("/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
