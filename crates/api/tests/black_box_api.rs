use std::sync::Arc;
use std::time::Duration;

use bulkpatch_api::app::services::AppServices;
use bulkpatch_api::config::AppConfig;
use bulkpatch_auth::{JwtClaims, Role};
use bulkpatch_infra::downstream::InMemoryRecordTarget;
use bulkpatch_infra::store::InMemoryKvStore;
use bulkpatch_infra::throttle::RateLimiterConfig;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    target: Arc<InMemoryRecordTarget>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, fast limiter, in-memory store and target.
        let config = AppConfig {
            rate_limiter: RateLimiterConfig {
                initial_delay: Duration::from_millis(1),
                min_delay: Duration::from_millis(1),
                ..RateLimiterConfig::default()
            },
            status_cache_ttl: Duration::ZERO,
            ..AppConfig::default()
        };
        let target = Arc::new(InMemoryRecordTarget::new());
        let services = Arc::new(AppServices::new(
            Arc::new(InMemoryKvStore::new()),
            target.clone(),
            &config,
        ));
        let app = bulkpatch_api::app::router(services, SECRET);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            target,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn submit(&self, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/batches"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn drain(&self, token: &str) -> reqwest::Response {
        self.client
            .post(self.url("/drain"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(roles: &[&'static str]) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: "svc-integration".to_string(),
        roles: roles.iter().map(|r| Role::new(*r)).collect(),
        iat: now.timestamp(),
        exp: (now + ChronoDuration::minutes(10)).timestamp(),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn operations(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "target_id": format!("acct-{i}"), "fields": { "tier": "gold", "rank": i } }))
        .collect()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .post(srv.url("/batches"))
        .json(&json!({ "operations": operations(1) }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn principal_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(&["operator"]);

    let res = srv.get(&token, "/whoami").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["subject"], "svc-integration");
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "operator"));
    assert!(
        body["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "drain.trigger")
    );
}

#[tokio::test]
async fn submission_is_accepted_without_touching_downstream() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(&["client"]);

    let res = srv
        .submit(
            &token,
            json!({ "operations": operations(120), "options": { "batchSize": 25 } }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total_jobs"], 3);
    assert_eq!(body["total_operations"], 120);
    assert_eq!(body["job_ids"].as_array().unwrap().len(), 3);
    assert_eq!(srv.target.calls(), 0);

    let batch_id = body["batch_id"].as_str().unwrap();
    let res = srv.get(&token, &format!("/batches/{batch_id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let batch: Value = res.json().await.unwrap();
    assert_eq!(batch["total_jobs"], 3);
    assert_eq!(batch["completed_jobs"], 0);
    assert_eq!(batch["status"], "pending");
}

#[tokio::test]
async fn invalid_submissions_are_rejected() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(&["client"]);

    let res = srv.submit(&token, json!({ "operations": [] })).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = srv.submit(&token, json!({ "operations": operations(501) })).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .submit(
            &token,
            json!({ "operations": operations(2), "options": { "concurrency": 11 } }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .client
        .post(srv.url("/batches"))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clients_cannot_trigger_drains() {
    let srv = TestServer::spawn().await;
    let res = srv.drain(&mint_jwt(&["client"])).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn drain_then_query_status_and_results() {
    let srv = TestServer::spawn().await;
    let client = mint_jwt(&["client"]);
    let operator = mint_jwt(&["operator"]);

    let res = srv
        .submit(
            &client,
            json!({
                "operations": operations(4),
                "options": { "rateLimitDelay": 0, "concurrency": 2 }
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: Value = res.json().await.unwrap();
    let job_id = receipt["job_ids"][0].as_str().unwrap().to_string();

    let res = srv.get(&client, &format!("/jobs/status?ids={job_id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["jobs"][0]["status"], "pending");

    // Nothing attempted yet.
    let res = srv.get(&client, &format!("/jobs/results?ids={job_id}")).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "pending");

    let res = srv.drain(&operator).await;
    assert_eq!(res.status(), StatusCode::OK);
    let summary: Value = res.json().await.unwrap();
    assert_eq!(summary["jobs_completed"], 1);
    assert_eq!(summary["operations_attempted"], 4);
    assert_eq!(summary["operations_succeeded"], 4);
    assert_eq!(srv.target.calls(), 4);

    let res = srv
        .client
        .post(srv.url("/jobs/status"))
        .bearer_auth(&client)
        .json(&json!({ "job_ids": [job_id.clone()], "format": "summary" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["summary"]["by_status"]["completed"], 1);
    assert!(status.get("jobs").is_none());

    let res = srv
        .get(&client, &format!("/jobs/results?ids={job_id}&only_successful=true"))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let results: Value = res.json().await.unwrap();
    assert_eq!(results["summary"]["success_count"], 4);
    assert_eq!(results["summary"]["error_count"], 0);
    assert_eq!(results["jobs"][0]["results"].as_array().unwrap().len(), 4);

    let batch_id = receipt["batch_id"].as_str().unwrap();
    let batch: Value = srv
        .get(&client, &format!("/batches/{batch_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(batch["status"], "completed");
}

#[tokio::test]
async fn status_queries_validate_ids() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(&["client"]);

    let res = srv.get(&token, "/jobs/status?ids=").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv.get(&token, "/jobs/status?ids=not-a-job").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let ids: Vec<String> = (0..51).map(|_| uuid::Uuid::now_v7().to_string()).collect();
    let res = srv
        .get(&token, &format!("/jobs/status?ids={}", ids.join(",")))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "too_many_ids");

    let res = srv
        .get(&token, &format!("/jobs/status?ids={}", uuid::Uuid::now_v7()))
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv
        .get(
            &token,
            &format!("/jobs/results?ids={}&only_successful=true&only_errors=true", ids[0]),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
