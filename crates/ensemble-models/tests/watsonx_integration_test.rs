//! Integration tests for the watsonx.ai client against a mock server.

use ensemble_abstraction::{ChatMessage, Model, ModelError, ModelParameters};
use ensemble_models::WatsonxModel;
use mockito::{Matcher, Server, ServerGuard};

const PROJECT_ID: &str = "853780be-1a79-4185-8642-bbd8370910fd";

async fn mock_iam(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/identity/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "iam-token", "token_type": "Bearer", "expires_in": 3600}"#)
        .create_async()
        .await
}

fn model_for(server: &ServerGuard, model_id: &str) -> WatsonxModel {
    WatsonxModel::with_api_key(
        model_id.to_string(),
        server.url(),
        PROJECT_ID.to_string(),
        "test-api-key".to_string(),
    )
    .with_iam_url(server.url())
    .with_parameters(ModelParameters::greedy(500))
}

fn generation_path() -> Matcher {
    Matcher::Regex(r"^/ml/v1/text/generation".to_string())
}

#[tokio::test]
async fn test_generate_text_sends_expected_request() {
    let mut server = Server::new_async().await;
    let iam = mock_iam(&mut server).await;

    let generation = server
        .mock("POST", generation_path())
        .match_query(Matcher::UrlEncoded("version".into(), "2023-05-29".into()))
        .match_header("authorization", "Bearer iam-token")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model_id": "ibm/granite-13b-instruct-v2",
            "input": "who is Niels Bohr?",
            "project_id": PROJECT_ID,
            "parameters": {
                "decoding_method": "greedy",
                "max_new_tokens": 500
            }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model_id": "ibm/granite-13b-instruct-v2",
                "results": [{
                    "generated_text": "A Danish physicist.",
                    "generated_token_count": 5,
                    "input_token_count": 6,
                    "stop_reason": "eos_token"
                }]
            }"#,
        )
        .create_async()
        .await;

    let model = model_for(&server, "ibm/granite-13b-instruct-v2");
    let response = model.generate_text("who is Niels Bohr?", None).await.unwrap();

    assert_eq!(response.content, "A Danish physicist.");
    assert_eq!(response.model_id.as_deref(), Some("ibm/granite-13b-instruct-v2"));
    assert_eq!(response.stop_reason.as_deref(), Some("eos_token"));
    let usage = response.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 6);
    assert_eq!(usage.completion_tokens, 5);
    assert_eq!(usage.total_tokens, 11);

    iam.assert_async().await;
    generation.assert_async().await;
}

#[tokio::test]
async fn test_call_parameters_override_defaults() {
    let mut server = Server::new_async().await;
    let _iam = mock_iam(&mut server).await;

    let generation = server
        .mock("POST", generation_path())
        .match_body(Matcher::PartialJson(serde_json::json!({
            "parameters": {
                "decoding_method": "greedy",
                "max_new_tokens": 500,
                "stop_sequences": ["\nObservation:"]
            }
        })))
        .with_status(200)
        .with_body(r#"{"results": [{"generated_text": "Thought: search"}]}"#)
        .create_async()
        .await;

    let model = model_for(&server, "ibm/granite-13b-instruct-v2");
    let overrides = ModelParameters {
        stop_sequences: Some(vec!["\nObservation:".to_string()]),
        ..Default::default()
    };
    let response = model.generate_text("prompt", Some(overrides)).await.unwrap();

    assert_eq!(response.content, "Thought: search");
    assert!(response.usage.is_none());
    generation.assert_async().await;
}

#[tokio::test]
async fn test_chat_completion_uses_llama3_template() {
    let mut server = Server::new_async().await;
    let _iam = mock_iam(&mut server).await;

    let generation = server
        .mock("POST", generation_path())
        .match_body(Matcher::Regex(r"<\|start_header_id\|>system<\|end_header_id\|>".to_string()))
        .with_status(200)
        .with_body(r#"{"results": [{"generated_text": "Hello!"}]}"#)
        .create_async()
        .await;

    let model = model_for(&server, "meta-llama/llama-3-70b-instruct");
    let messages = vec![ChatMessage::system("Be brief."), ChatMessage::user("Say hello")];
    let response = model.generate_chat_completion(&messages, None).await.unwrap();

    assert_eq!(response.content, "Hello!");
    generation.assert_async().await;
}

#[tokio::test]
async fn test_token_reused_across_calls() {
    let mut server = Server::new_async().await;
    let iam = server
        .mock("POST", "/identity/token")
        .with_status(200)
        .with_body(r#"{"access_token": "iam-token", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;
    let generation = server
        .mock("POST", generation_path())
        .with_status(200)
        .with_body(r#"{"results": [{"generated_text": "ok"}]}"#)
        .expect(2)
        .create_async()
        .await;

    let model = model_for(&server, "ibm/granite-13b-instruct-v2");
    model.generate_text("one", None).await.unwrap();
    model.generate_text("two", None).await.unwrap();

    iam.assert_async().await;
    generation.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_maps_to_authentication_error() {
    let mut server = Server::new_async().await;
    let _iam = mock_iam(&mut server).await;
    let _generation = server
        .mock("POST", generation_path())
        .with_status(401)
        .with_body(r#"{"errors": [{"code": "authentication_token_expired", "message": "Token expired"}]}"#)
        .create_async()
        .await;

    let model = model_for(&server, "ibm/granite-13b-instruct-v2");
    match model.generate_text("x", None).await {
        Err(ModelError::AuthenticationError(msg)) => {
            assert!(msg.contains("authentication_token_expired"));
        }
        other => panic!("Expected AuthenticationError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limit_maps_to_quota_exceeded() {
    let mut server = Server::new_async().await;
    let _iam = mock_iam(&mut server).await;
    let _generation = server
        .mock("POST", generation_path())
        .with_status(429)
        .with_body(r#"{"errors": [{"code": "too_many_requests", "message": "Rate limit reached"}]}"#)
        .create_async()
        .await;

    let model = model_for(&server, "ibm/granite-13b-instruct-v2");
    match model.generate_text("x", None).await {
        Err(ModelError::QuotaExceeded { provider, message }) => {
            assert_eq!(provider, "watsonx");
            assert!(message.unwrap().contains("Rate limit reached"));
        }
        other => panic!("Expected QuotaExceeded, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_and_empty_results() {
    let mut server = Server::new_async().await;
    let _iam = mock_iam(&mut server).await;
    let _failing = server
        .mock("POST", generation_path())
        .match_body(Matcher::PartialJson(serde_json::json!({"input": "fail"})))
        .with_status(500)
        .with_body("internal")
        .create_async()
        .await;
    let _empty = server
        .mock("POST", generation_path())
        .match_body(Matcher::PartialJson(serde_json::json!({"input": "empty"})))
        .with_status(200)
        .with_body(r#"{"results": []}"#)
        .create_async()
        .await;

    let model = model_for(&server, "ibm/granite-13b-instruct-v2");

    match model.generate_text("fail", None).await {
        Err(ModelError::ModelResponseError(msg)) => assert!(msg.contains("500")),
        other => panic!("Expected ModelResponseError, got {:?}", other),
    }
    match model.generate_text("empty", None).await {
        Err(ModelError::ModelResponseError(msg)) => assert!(msg.contains("No results")),
        other => panic!("Expected ModelResponseError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_maps_to_serialization_error() {
    let mut server = Server::new_async().await;
    let _iam = mock_iam(&mut server).await;
    let _generation = server
        .mock("POST", generation_path())
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let model = model_for(&server, "ibm/granite-13b-instruct-v2");
    assert!(matches!(
        model.generate_text("x", None).await,
        Err(ModelError::SerializationError(_))
    ));
}
