//! OpenAI-compatible embeddings over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{finish_batch, restore_order, EmbeddingProvider, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// Async embeddings client for `/embeddings` endpoints that speak the OpenAI schema.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        base_url: &str,
        model: &str,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey("api_key".to_string()));
        }
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| ProviderError::Api("API key is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, input: Input<'_>, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input,
        };
        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if should_retry(status) && attempt < self.max_retries {
                        attempt += 1;
                        tracing::debug!(%status, attempt, "retrying embeddings request");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    let body = resp.text().await?;
                    return parse_response(status, &body, expected);
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt < self.max_retries {
                        attempt += 1;
                        tracing::debug!(error = %err, attempt, "retrying embeddings request");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut out = self.request(Input::One(text), 1).await?;
        out.pop().ok_or(ProviderError::EmptyEmbedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(Input::Many(texts), texts.len()).await
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}

/// Turns a response body into input-ordered, normalized vectors.
///
/// An `error` payload wins over the HTTP status, since some compatible servers
/// report failures with a 200.
fn parse_response(
    status: StatusCode,
    body: &str,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let parsed: Result<EmbeddingResponse, _> = serde_json::from_str(body);
    if let Ok(EmbeddingResponse { error: Some(e), .. }) = &parsed {
        return Err(ProviderError::Api(e.message.clone()));
    }
    if !status.is_success() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    let parsed = parsed.map_err(|e| ProviderError::Malformed(e.to_string()))?;
    if parsed.data.is_empty() {
        return Err(ProviderError::EmptyEmbedding);
    }
    let items = parsed
        .data
        .into_iter()
        .map(|d| (d.index, d.embedding))
        .collect();
    finish_batch(restore_order(items, expected)?, expected)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Input<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Input<'a> {
    One(&'a str),
    Many(&'a [String]),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_is_returned_in_input_order() {
        let body = r#"{"data":[
            {"embedding":[0.0,2.0],"index":1},
            {"embedding":[3.0,0.0],"index":0}
        ]}"#;
        let out = parse_response(StatusCode::OK, body, 2).unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn error_payload_is_reported() {
        let body = r#"{"error":{"message":"invalid api key","type":"auth"}}"#;
        let res = parse_response(StatusCode::UNAUTHORIZED, body, 1);
        assert!(matches!(res, Err(ProviderError::Api(m)) if m == "invalid api key"));
    }

    #[test]
    fn error_payload_with_ok_status_is_reported() {
        let body = r#"{"data":[],"error":{"message":"quota"}}"#;
        assert!(matches!(
            parse_response(StatusCode::OK, body, 1),
            Err(ProviderError::Api(_))
        ));
    }

    #[test]
    fn non_json_failure_keeps_status_and_body() {
        let res = parse_response(StatusCode::BAD_GATEWAY, "upstream down", 1);
        assert!(matches!(
            res,
            Err(ProviderError::Status { status: 502, ref body }) if body == "upstream down"
        ));
    }

    #[test]
    fn empty_data_and_empty_vector_are_errors() {
        assert!(matches!(
            parse_response(StatusCode::OK, r#"{"data":[]}"#, 1),
            Err(ProviderError::EmptyEmbedding)
        ));
        assert!(matches!(
            parse_response(StatusCode::OK, r#"{"data":[{"embedding":[],"index":0}]}"#, 1),
            Err(ProviderError::EmptyEmbedding)
        ));
    }

    #[test]
    fn garbage_body_is_malformed() {
        assert!(matches!(
            parse_response(StatusCode::OK, "not json", 1),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn request_serializes_single_and_many() {
        let one = serde_json::to_value(EmbeddingRequest {
            model: "m",
            input: Input::One("hi"),
        })
        .unwrap();
        assert_eq!(one, serde_json::json!({"model": "m", "input": "hi"}));

        let texts = vec!["a".to_string(), "b".to_string()];
        let many = serde_json::to_value(EmbeddingRequest {
            model: "m",
            input: Input::Many(&texts),
        })
        .unwrap();
        assert_eq!(many, serde_json::json!({"model": "m", "input": ["a", "b"]}));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let p = OpenAiProvider::new(
            "sk-test".to_string(),
            "http://localhost:8080/v1/",
            DEFAULT_OPENAI_MODEL,
            Duration::from_secs(5),
            0,
        )
        .unwrap();
        assert_eq!(p.endpoint(), "http://localhost:8080/v1/embeddings");
        assert_eq!(p.model(), "text-embedding-3-small");
    }
}
