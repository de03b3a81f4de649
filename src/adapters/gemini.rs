//! Gemini `generateContent` client used for structured receipt reading and
//! text-only verification prompts.

use crate::domain::model::ReceiptImage;
use crate::domain::ports::{GenerativeModel, GenerativeSettings};
use crate::utils::error::{ReceiptError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const EXTRACTOR: &str = "generative";

pub struct GeminiClient {
    client: Client,
    settings: GenerativeSettings,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GeminiClient {
    pub fn new(settings: GenerativeSettings) -> Result<Self> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn is_available(&self) -> bool {
        self.settings.api_key.is_some()
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| ReceiptError::ExtractorUnavailable {
                extractor: EXTRACTOR.to_string(),
                reason: "no Gemini API key configured".to_string(),
            })?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        );
        let request = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                response_mime_type: "application/json",
            },
        };

        tracing::debug!("Calling Gemini model {}", self.settings.model);
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
            return Err(failure(format!("Gemini API error ({}): {}", status, body)));
        }

        let body: GenerateResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(failure(format!("Gemini API error: {}", error.message)));
        }

        // 把第一個候選的所有文字片段接起來
        let text: String = body
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(failure("Gemini returned no text".to_string()));
        }
        Ok(text)
    }
}

fn failure(message: String) -> ReceiptError {
    ReceiptError::ExtractorFailure {
        extractor: EXTRACTOR.to_string(),
        message,
    }
}

#[async_trait::async_trait]
impl GenerativeModel for GeminiClient {
    async fn extract_structured(&self, image: &ReceiptImage, prompt: &str) -> Result<String> {
        let parts = vec![
            Part::Text {
                text: prompt.to_string(),
            },
            Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: STANDARD.encode(&image.bytes),
                },
            },
        ];
        self.generate(parts).await
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(vec![Part::Text {
            text: prompt.to_string(),
        }])
        .await
    }
}
