use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/validate", post(handlers::validate))
        .route("/run", post(handlers::run))
        .route("/problems/random", get(handlers::random_problem))
        .route("/languages", get(handlers::languages))
        .route("/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health_check))
}

#[cfg(test)]
mod tests {
    use crate::metrics::Metrics;
    use crate::{app, AppState};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use dojo_common::memory::{MemoryStore, Seed};
    use dojo_common::types::{Problem, Topic, User};
    use dojo_grader::achievements::{default_rules, Achievements};
    use dojo_grader::config::{LanguageConfig, LanguageConfigManager, LanguageKind};
    use dojo_grader::messages::{Locale, Messages};
    use dojo_grader::sandbox::Isolation;
    use dojo_grader::{CodeRunner, GraderSettings, Validator};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_app() -> axum::Router {
        let store = Arc::new(MemoryStore::from_seed(Seed {
            topics: vec![Topic { id: 1, name: "Basics".into(), level: 1, order: 1 }],
            problems: vec![Problem {
                id: 1,
                topic_id: 1,
                title: "Four".into(),
                description: "Print 4".into(),
                example: "4".into(),
                difficulty: "easy".into(),
                starter_code: String::new(),
                reference_solution: "echo 4".into(),
                order: 1,
                locked: false,
                points_awarded: 10,
            }],
            users: vec![User { id: 1, name: "ana".into(), points: 0, level: 1 }],
            ..Default::default()
        }));

        let shell = LanguageConfig {
            name: "shell".into(),
            kind: LanguageKind::Interpreted,
            commands: vec!["sh".into()],
            args: vec!["{file}".into()],
            file_name: "main.sh".into(),
            comment_prefix: "#".into(),
            env: BTreeMap::new(),
            image: None,
            memory_limit_mb: 64,
            cpu_limit: 0.5,
        };
        let runner = CodeRunner::new(
            Arc::new(LanguageConfigManager::builtin().with_language(shell)),
            Isolation::Host,
            std::env::temp_dir(),
            Messages::new(Locale::En),
        );
        let settings = GraderSettings {
            locale: Locale::En,
            ..Default::default()
        };
        let achievements = Achievements::new(store.clone(), default_rules());
        let validator = Validator::new(store.clone(), runner, achievements, settings);

        app(Arc::new(AppState {
            validator: Arc::new(validator),
            store,
            metrics: Metrics::new().unwrap(),
        }))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_app().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_validate_correct_submission() {
        let body = json!({ "userId": 1, "problemId": 1, "code": "echo 4", "language": "shell" });
        let response = test_app().oneshot(post_json("/validate", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["isCorrect"], true);
        assert_eq!(json["pointsAwarded"], 10);
        assert_eq!(json["userOutput"], "4");
    }

    #[tokio::test]
    async fn test_validate_defaults_to_python_and_rejects_bad_id() {
        let body = json!({ "userId": 1, "problemId": -3, "code": "print(4)" });
        let response = test_app().oneshot(post_json("/validate", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["isCorrect"], false);
        assert!(json["message"].as_str().unwrap().contains("Invalid problem id"));
    }

    #[tokio::test]
    async fn test_run_returns_execution_result() {
        let body = json!({ "code": "echo hi", "language": "shell" });
        let response = test_app().oneshot(post_json("/run", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["output"], "hi");
    }

    #[tokio::test]
    async fn test_random_problem() {
        let response = test_app()
            .oneshot(get("/problems/random?userId=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["id"], 1);

        let missing = test_app()
            .oneshot(get("/problems/random?userId=42"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_languages_lists_sorted_tags() {
        let response = test_app().oneshot(get("/languages")).await.unwrap();
        let json = json_body(response).await;
        assert_eq!(json["languages"], json!(["csharp", "python", "shell"]));
        assert_eq!(json["isolation"], "host");
    }

    #[tokio::test]
    async fn test_metrics_after_validation() {
        let app = test_app();
        let body = json!({ "userId": 1, "problemId": 1, "code": "echo 5", "language": "shell" });
        app.clone().oneshot(post_json("/validate", body)).await.unwrap();

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("dojo_validations_total{language=\"shell\",verdict=\"incorrect\"} 1"));
    }
}
