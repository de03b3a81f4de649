use crate::domain::model::{
    DualExtraction, ExtractionCandidate, OcrSource, ParsedReceipt, RawExtraction, ReceiptImage,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub trait Storage: Send + Sync {
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 影像文字偵測服務（vision 路徑）
#[async_trait]
pub trait TextDetector: Send + Sync {
    async fn detect_text(&self, image: &ReceiptImage) -> Result<String>;
}

/// 生成式模型（影像轉 JSON 與純文字驗證）
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn extract_structured(&self, image: &ReceiptImage, prompt: &str) -> Result<String>;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// 協調器只依賴這個介面，不關心具體萃取器
#[async_trait]
pub trait ReceiptExtractor: Send + Sync {
    fn source(&self) -> OcrSource;

    async fn extract_raw(&self, image: &ReceiptImage) -> Result<RawExtraction>;

    async fn interpret(&self, raw: RawExtraction) -> Result<ExtractionCandidate>;

    async fn extract(&self, image: &ReceiptImage) -> Result<ExtractionCandidate> {
        let raw = self.extract_raw(image).await?;
        self.interpret(raw).await
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self, image: &ReceiptImage) -> Result<DualExtraction>;
    async fn transform(&self, extraction: DualExtraction) -> Result<ParsedReceipt>;
}

pub trait ConfigProvider: Send + Sync {
    fn vision_settings(&self) -> VisionSettings;
    fn generative_settings(&self) -> GenerativeSettings;
    fn engine_settings(&self) -> EngineSettings;
    fn output_path(&self) -> &str;
    fn output_formats(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GenerativeSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

/// 協調器的行為參數
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub currency: String,
    pub verify_below: f64,
    pub vision_timeout: Duration,
    pub generative_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            currency: "COP".to_string(),
            verify_below: 80.0,
            vision_timeout: Duration::from_secs(20),
            generative_timeout: Duration::from_secs(30),
        }
    }
}
