use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};

use crate::{
    config::{GeneratorConfig, RetryConfig},
    providers::{GenerationPrompt, GeneratorError, TextGenerator, retry::with_retry},
};

/// Text generator backed by an OpenAI-compatible chat completions API.
pub struct OpenAiTextGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f64,
    timeout: Duration,
    retry: RetryConfig,
}

impl OpenAiTextGenerator {
    pub fn from_config(config: &GeneratorConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: config.attempt_timeout(),
            retry: config.retry.clone(),
        }
    }

    /// Build a request with auth header and per-attempt timeout.
    fn build_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = if let Some(api_key) = &self.api_key {
            request.header(AUTHORIZATION, format!("Bearer {}", api_key))
        } else {
            request
        };

        request.timeout(self.timeout)
    }

    /// Check response status and extract the API error message on failure.
    ///
    /// OpenAI returns errors as `{"error": {"message": "...", "type": "...", "code": "..."}}`.
    async fn check_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GeneratorError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("(empty body)"));

        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or(body);

        Err(GeneratorError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(
        skip(self, prompt),
        fields(provider = "openai", operation = "chat_completion", model = %self.model)
    )]
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, GeneratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });

        // Pre-serialize before retry loop to avoid repeated serialization
        let body = serde_json::to_vec(&payload)?;

        let response = with_retry(&self.retry, "openai", "chat_completion", || async {
            self.build_request(self.client.post(&url))
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await
        })
        .await?;

        let response = Self::check_response(response).await?;
        let json: Value = response.json().await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }

        tracing::debug!(chars = content.len(), "Received generator response");
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;
    use crate::providers::test_utils::{SequentialResponder, chat_completion_body};

    fn generator(server: &MockServer) -> OpenAiTextGenerator {
        let config = GeneratorConfig {
            enabled: true,
            base_url: format!("{}/v1/", server.uri()),
            api_key: Some("sk-test".into()),
            model: "gpt-4o-mini".into(),
            retry: RetryConfig {
                max_retries: 2,
                initial_delay_ms: 1,
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        OpenAiTextGenerator::from_config(&config, reqwest::Client::new())
    }

    fn prompt() -> GenerationPrompt {
        GenerationPrompt {
            system: "Respond with JSON".into(),
            user: "Forecast 7 days".into(),
        }
    }

    #[tokio::test]
    async fn test_generate_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_completion_body("  [{\"a\": 1}]\n")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let content = generator(&server).generate(&prompt()).await.unwrap();
        assert_eq!(content, "[{\"a\": 1}]");
    }

    #[tokio::test]
    async fn test_api_error_message_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
            })))
            .mount(&server)
            .await;

        let err = generator(&server).generate(&prompt()).await.unwrap_err();
        match err {
            GeneratorError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        let responder = SequentialResponder::fail_then_succeed(
            1,
            ResponseTemplate::new(200).set_body_json(chat_completion_body("[]")),
        );
        Mock::given(method("POST"))
            .respond_with(responder.clone())
            .mount(&server)
            .await;

        let content = generator(&server).generate(&prompt()).await.unwrap();
        assert_eq!(content, "[]");
        assert_eq!(responder.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timed_out_attempt_is_retried() {
        let server = MockServer::start().await;
        let responder = SequentialResponder::new(vec![
            ResponseTemplate::new(200)
                .set_body_json(chat_completion_body("[\"late\"]"))
                .set_delay(Duration::from_secs(3)),
            ResponseTemplate::new(200).set_body_json(chat_completion_body("[\"on time\"]")),
        ]);
        Mock::given(method("POST"))
            .respond_with(responder.clone())
            .mount(&server)
            .await;

        // Two attempts share a 2s budget, so the first gives up after 1s
        let config = GeneratorConfig {
            enabled: true,
            base_url: format!("{}/v1", server.uri()),
            timeout_secs: 2,
            retry: RetryConfig {
                max_retries: 1,
                initial_delay_ms: 1,
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let generator = OpenAiTextGenerator::from_config(&config, reqwest::Client::new());

        let content = tokio::time::timeout(config.timeout(), generator.generate(&prompt()))
            .await
            .expect("attempts should fit in the call budget")
            .unwrap();
        assert_eq!(content, "[\"on time\"]");
        assert_eq!(responder.call_count(), 2);
    }

    #[test]
    fn test_encode_error_maps_to_generator_error() {
        let encode_error = serde_json::from_str::<Value>("{").unwrap_err();
        let err = GeneratorError::from(encode_error);
        assert!(matches!(err, GeneratorError::Encode(_)));
        assert!(err.to_string().starts_with("failed to encode request"));
    }

    #[tokio::test]
    async fn test_empty_content_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("   ")))
            .mount(&server)
            .await;

        let err = generator(&server).generate(&prompt()).await.unwrap_err();
        assert!(matches!(err, GeneratorError::EmptyResponse));
    }
}
