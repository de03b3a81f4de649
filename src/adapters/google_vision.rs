//! Google Cloud Vision `images:annotate` client (TEXT_DETECTION).

use crate::domain::model::ReceiptImage;
use crate::domain::ports::{TextDetector, VisionSettings};
use crate::utils::error::{ReceiptError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const EXTRACTOR: &str = "vision";

pub struct GoogleVisionClient {
    client: Client,
    settings: VisionSettings,
}

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    full_text_annotation: Option<FullText>,
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct FullText {
    text: String,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    message: String,
}

impl GoogleVisionClient {
    pub fn new(settings: VisionSettings) -> Result<Self> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn is_available(&self) -> bool {
        self.settings.api_key.is_some()
    }
}

#[async_trait::async_trait]
impl TextDetector for GoogleVisionClient {
    async fn detect_text(&self, image: &ReceiptImage) -> Result<String> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| ReceiptError::ExtractorUnavailable {
                extractor: EXTRACTOR.to_string(),
                reason: "no Google Vision API key configured".to_string(),
            })?;

        let url = format!(
            "{}/images:annotate",
            self.settings.endpoint.trim_end_matches('/')
        );
        let request = AnnotateRequest {
            requests: vec![ImageRequest {
                image: ImageContent {
                    content: STANDARD.encode(&image.bytes),
                },
                features: vec![Feature {
                    kind: "TEXT_DETECTION",
                }],
            }],
        };

        tracing::debug!("Calling Vision API ({} bytes)", image.bytes.len());
        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure(format!("Vision API error ({}): {}", status, body)));
        }

        let body: AnnotateResponse = response.json().await?;
        let first = body
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| failure("Vision API returned no responses".to_string()))?;

        if let Some(error) = first.error {
            return Err(failure(format!("Vision API error: {}", error.message)));
        }

        // fullTextAnnotation 保留版面順序；舊版回應只有 textAnnotations
        let text = first
            .full_text_annotation
            .map(|full| full.text)
            .or_else(|| first.text_annotations.into_iter().next().map(|t| t.description))
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(failure("no text detected in image".to_string()));
        }

        tracing::debug!("Vision API returned {} lines", text.lines().count());
        Ok(text)
    }
}

fn failure(message: String) -> ReceiptError {
    ReceiptError::ExtractorFailure {
        extractor: EXTRACTOR.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn settings(endpoint: String, api_key: Option<&str>) -> VisionSettings {
        VisionSettings {
            endpoint,
            api_key: api_key.map(str::to_string),
            timeout: Duration::from_secs(5),
        }
    }

    fn image() -> ReceiptImage {
        ReceiptImage {
            bytes: vec![1, 2, 3],
            mime_type: "image/jpeg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_detect_text_returns_full_annotation() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/images:annotate")
                .query_param("key", "secret")
                .body_contains("TEXT_DETECTION")
                .body_contains("AQID");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "responses": [{
                        "fullTextAnnotation": {"text": "SUBTOTAL 10.000\nTOTAL 11.000\n"},
                        "textAnnotations": [{"description": "ignored"}]
                    }]
                }));
        });

        let client = GoogleVisionClient::new(settings(server.base_url(), Some("secret"))).unwrap();
        let text = client.detect_text(&image()).await.unwrap();

        api_mock.assert();
        assert_eq!(text, "SUBTOTAL 10.000\nTOTAL 11.000\n");
    }

    #[tokio::test]
    async fn test_falls_back_to_text_annotations() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/images:annotate");
            then.status(200).json_body(serde_json::json!({
                "responses": [{"textAnnotations": [{"description": "TOTAL 5.000"}]}]
            }));
        });

        let client = GoogleVisionClient::new(settings(server.base_url(), Some("k"))).unwrap();
        assert_eq!(client.detect_text(&image()).await.unwrap(), "TOTAL 5.000");
    }

    #[tokio::test]
    async fn test_empty_text_is_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/images:annotate");
            then.status(200).json_body(serde_json::json!({"responses": [{}]}));
        });

        let client = GoogleVisionClient::new(settings(server.base_url(), Some("k"))).unwrap();
        assert!(matches!(
            client.detect_text(&image()).await,
            Err(ReceiptError::ExtractorFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_per_image_error_is_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/images:annotate");
            then.status(200).json_body(serde_json::json!({
                "responses": [{"error": {"code": 3, "message": "Bad image data."}}]
            }));
        });

        let client = GoogleVisionClient::new(settings(server.base_url(), Some("k"))).unwrap();
        let err = client.detect_text(&image()).await.unwrap_err();
        assert!(err.to_string().contains("Bad image data."));
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let client =
            GoogleVisionClient::new(settings("http://127.0.0.1:9".to_string(), None)).unwrap();
        assert!(!client.is_available());
        assert!(matches!(
            client.detect_text(&image()).await,
            Err(ReceiptError::ExtractorUnavailable { .. })
        ));
    }
}
