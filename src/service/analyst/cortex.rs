//! Snowflake Cortex Analyst integration.
//!
//! Sends a single-turn question, together with the configured semantic model file,
//! to `/api/v2/cortex/analyst/message`.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::{
    base::{
        config::Config,
        types::{AnalystResponse, Res},
    },
    service::warehouse::snowflake::authorization_header,
};

use super::{AnalystClient, GenericAnalystClient};

// Extra methods on `AnalystClient` applied by the cortex implementation.

impl AnalystClient {
    pub fn cortex(config: &Config) -> Res<Self> {
        let client = CortexAnalystClient::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Wire types.

#[derive(Debug, Serialize)]
struct AnalystRequest<'a> {
    messages: Vec<RequestMessage<'a>>,
    semantic_model_file: String,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

fn build_request<'a>(question: &'a str, semantic_model_file: String) -> AnalystRequest<'a> {
    AnalystRequest {
        messages: vec![RequestMessage {
            role: "user",
            content: vec![RequestContent { kind: "text", text: question }],
        }],
        semantic_model_file,
    }
}

/// Statuses below 400 carry an analyst message; anything else is a failure with the status and body attached.
fn parse_response(status: u16, body: &str) -> Res<AnalystResponse> {
    if status >= 400 {
        return Err(anyhow!("Failed request with status {status}: {body}"));
    }

    serde_json::from_str(body).map_err(|e| anyhow!("Failed to parse analyst response: {e}"))
}

// Specific implementations.

/// Cortex Analyst client implementation.
#[derive(Clone)]
pub struct CortexAnalystClient {
    http: reqwest::Client,
    url: String,
    semantic_model_file: String,
}

impl CortexAnalystClient {
    /// Create a new Cortex Analyst client for the configured account.
    pub fn new(config: &Config) -> Res<Self> {
        Self::with_base_url(config, config.snowflake_url())
    }

    /// Create a new Cortex Analyst client against an explicit base URL.
    pub fn with_base_url(config: &Config, base_url: impl Into<String>) -> Res<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            url: format!("{}/api/v2/cortex/analyst/message", base_url.into()),
            semantic_model_file: config.semantic_model_file(),
        })
    }
}

#[async_trait]
impl GenericAnalystClient for CortexAnalystClient {
    #[instrument(name = "CortexAnalystClient::send_message", skip_all)]
    async fn send_message(&self, question: &str, session_token: &str) -> Res<AnalystResponse> {
        let request = build_request(question, self.semantic_model_file.clone());

        debug!("Asking analyst with semantic model `{}` ...", self.semantic_model_file);

        let response = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, authorization_header(session_token))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to reach analyst: {e}"))?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        parse_response(status, &body)
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::base::{config::tests::create_test_config, types::AnalystAnswer};

    #[test]
    fn test_request_body_shape() {
        let request = serde_json::to_value(build_request("show me sales by region", "@DB.SCHEMA.STAGE/model.yaml".to_string())).unwrap();

        assert_eq!(
            request,
            json!({
                "messages": [{ "role": "user", "content": [{ "type": "text", "text": "show me sales by region" }] }],
                "semantic_model_file": "@DB.SCHEMA.STAGE/model.yaml"
            })
        );
    }

    #[test]
    fn test_parse_response_error_carries_status_and_body() {
        let err = parse_response(400, r#"{"message":"semantic model not found"}"#).unwrap_err().to_string();

        assert!(err.contains("400"));
        assert!(err.contains("semantic model not found"));
    }

    #[test]
    fn test_parse_response_success_below_400() {
        let body = json!({ "message": { "role": "analyst", "content": [{ "type": "text", "text": "ok" }] } }).to_string();

        assert!(parse_response(200, &body).is_ok());
        assert!(parse_response(399, &body).is_ok());
        assert!(parse_response(500, &body).is_err());
    }

    #[tokio::test]
    async fn test_send_message() {
        let server = MockServer::start_async().await;
        let analyst = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v2/cortex/analyst/message")
                    .header("authorization", "Snowflake Token=\"session-token\"")
                    .json_body(json!({
                        "messages": [{ "role": "user", "content": [{ "type": "text", "text": "show me sales by region" }] }],
                        "semantic_model_file": "@SALES_DB.PUBLIC.MODELS/sales.yaml"
                    }));
                then.status(200).json_body(json!({
                    "message": {
                        "role": "analyst",
                        "content": [
                            { "type": "text", "text": "This is our interpretation of your question." },
                            { "type": "sql", "statement": "SELECT region, SUM(amount) FROM sales GROUP BY region" }
                        ]
                    },
                    "request_id": "75d343ee"
                }));
            })
            .await;

        let client = CortexAnalystClient::with_base_url(&create_test_config(), server.base_url()).unwrap();

        let answer = AnalystAnswer::from(client.send_message("show me sales by region", "session-token").await.unwrap());

        assert_eq!(answer.narrative(), "This is our interpretation of your question.");
        assert_eq!(answer.sql(), Some("SELECT region, SUM(amount) FROM sales GROUP BY region"));
        analyst.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_http_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v2/cortex/analyst/message");
                then.status(401).body("unauthorized");
            })
            .await;

        let client = CortexAnalystClient::with_base_url(&create_test_config(), server.base_url()).unwrap();

        let err = client.send_message("anything", "bad-token").await.unwrap_err().to_string();

        assert!(err.contains("401"));
        assert!(err.contains("unauthorized"));
    }
}
