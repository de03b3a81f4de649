use crate::utils::error::{ReceiptError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 產生萃取結果的來源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrSource {
    Vision,
    Generative,
}

impl OcrSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrSource::Vision => "vision",
            OcrSource::Generative => "generative",
        }
    }
}

impl std::fmt::Display for OcrSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// 萃取器的原始輸出，只存活於單一請求內
#[derive(Debug, Clone)]
pub struct RawExtraction {
    pub source: OcrSource,
    pub payload: RawPayload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RawPayload {
    VisionText(String),
    GenerativeStructured(serde_json::Value),
}

impl RawExtraction {
    pub fn vision_text(text: String) -> Self {
        Self {
            source: OcrSource::Vision,
            payload: RawPayload::VisionText(text),
            timestamp: Utc::now(),
        }
    }

    pub fn generative(value: serde_json::Value) -> Self {
        Self {
            source: OcrSource::Generative,
            payload: RawPayload::GenerativeStructured(value),
            timestamp: Utc::now(),
        }
    }
}

/// 記憶體中的收據影像，MIME 類型由內容判斷
#[derive(Debug, Clone)]
pub struct ReceiptImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ReceiptImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ReceiptError::ParseFailure {
                input: "image".to_string(),
                reason: "image is empty".to_string(),
            });
        }

        let mime_type = match infer::get(&bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {
                kind.mime_type().to_string()
            }
            Some(kind) => {
                return Err(ReceiptError::ParseFailure {
                    input: "image".to_string(),
                    reason: format!("unsupported content type {}", kind.mime_type()),
                })
            }
            // 無法辨識時交給萃取器自行判斷
            None => "image/jpeg".to_string(),
        };

        Ok(Self { bytes, mime_type })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(rename = "price")]
    pub unit_price: Decimal,
    pub quantity: Decimal,
    #[serde(skip)]
    pub normalized_name: String,
    #[serde(skip, default = "default_item_confidence")]
    pub confidence: ConfidenceLevel,
    #[serde(skip)]
    pub duplicates_found: u32,
    #[serde(skip)]
    pub original_names: Vec<String>,
}

fn default_item_confidence() -> ConfidenceLevel {
    ConfidenceLevel::High
}

impl LineItem {
    pub fn new(name: impl Into<String>, unit_price: Decimal, quantity: Decimal) -> Self {
        let name = name.into().trim().to_string();
        Self {
            normalized_name: normalize_name(&name),
            original_names: vec![name.clone()],
            name,
            unit_price: unit_price.max(Decimal::ZERO).normalize(),
            quantity: if quantity > Decimal::ZERO {
                quantity.normalize()
            } else {
                Decimal::ONE
            },
            confidence: ConfidenceLevel::High,
            duplicates_found: 0,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * self.quantity
    }
}

/// 小寫並去除尾端標點與空白
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

pub fn items_sum(items: &[LineItem]) -> Decimal {
    items.iter().map(LineItem::line_total).sum()
}

/// 欄位萃取器與驗證模型共用的結構
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiptFields {
    pub total: Decimal,
    pub subtotal: Decimal,
    pub tip: Decimal,
    pub items: Vec<LineItem>,
}

/// 單一來源經解析與評分後的候選結果
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionCandidate {
    pub source: OcrSource,
    pub fields: ReceiptFields,
    pub currency: String,
    pub confidence: f64,
    pub problems: Vec<String>,
    pub verified_by_model: bool,
}

impl ExtractionCandidate {
    pub fn is_valid(&self) -> bool {
        self.fields.total > Decimal::ZERO || !self.fields.items.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.fields.items.len()
    }
}

/// 兩個萃取器各自的結果；失敗的一方視為無效
#[derive(Debug)]
pub struct DualExtraction {
    pub vision: Result<ExtractionCandidate>,
    pub generative: Result<ExtractionCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Verified,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    TotalMismatch,
    MissingTotal,
    DuplicatesMerged,
    LowConfidence,
    SourceFailed,
    ItemSumDeviation,
    SuggestedCorrection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub message: String,
    pub severity: Severity,
}

impl Warning {
    pub fn new(kind: WarningKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity,
        }
    }
}

/// 建議的單一數字替換，只供參考，從不自動套用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub item_index: usize,
    pub original_price: Decimal,
    pub suggested_price: Decimal,
    pub improvement: f64,
    pub confidence: ConfidenceLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub calculated_subtotal: Decimal,
    pub calculated_total: Decimal,
    pub declared_consistent: bool,
    /// 超出容許範圍的差額；容許範圍內為 0
    pub total_difference: Decimal,
    /// 未套用容許範圍前的實際差額
    pub raw_difference: Decimal,
    pub difference_percent: f64,
    pub quality_score: f64,
    pub quality_level: QualityLevel,
    pub warnings: Vec<Warning>,
    pub corrections: Vec<Correction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationReason {
    OnlyValidSource,
    ZeroItems,
    CoherenceOutlier,
    CoherenceGap,
    ConfidenceGap,
    ItemCount,
    DefaultVision,
}

/// 仲裁紀錄，只用於日誌
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationDecision {
    pub winner: OcrSource,
    pub reason: ArbitrationReason,
    pub vision_gap: Option<f64>,
    pub generative_gap: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extracting,
    Scoring,
    Verifying,
    Reconciling,
    Deduplicating,
    Validating,
    Done,
    Failed,
}

/// 回傳給呼叫端的最終結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedReceipt {
    pub total: Decimal,
    pub subtotal: Decimal,
    pub tip: Decimal,
    pub currency: String,
    pub items: Vec<LineItem>,
    pub confidence_score: f64,
    pub quality_level: QualityLevel,
    pub total_difference: Decimal,
    pub warnings: Vec<Warning>,
    pub corrections: Vec<Correction>,
    pub ocr_source: OcrSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name_strips_trailing_punctuation() {
        assert_eq!(normalize_name("  Coca-Cola. "), "coca-cola");
        assert_eq!(normalize_name("Limonada!!"), "limonada");
        assert_eq!(normalize_name("Café"), "café");
    }

    #[test]
    fn test_line_item_guards_invariants() {
        let item = LineItem::new("Agua", Decimal::from(-50), Decimal::ZERO);
        assert_eq!(item.unit_price, Decimal::ZERO);
        assert_eq!(item.quantity, Decimal::ONE);
        assert_eq!(item.original_names, vec!["Agua".to_string()]);
    }

    #[test]
    fn test_parsed_receipt_json_shape() {
        let receipt = ParsedReceipt {
            total: Decimal::from(11000),
            subtotal: Decimal::from(10000),
            tip: Decimal::from(1000),
            currency: "COP".to_string(),
            items: vec![LineItem::new("Bandeja paisa", Decimal::from(10000), Decimal::ONE)],
            confidence_score: 100.0,
            quality_level: QualityLevel::Verified,
            total_difference: Decimal::ZERO,
            warnings: vec![Warning::new(
                WarningKind::DuplicatesMerged,
                Severity::Info,
                "merged",
            )],
            corrections: vec![],
            ocr_source: OcrSource::Vision,
        };

        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["quality_level"], "verified");
        assert_eq!(json["ocr_source"], "vision");
        assert_eq!(json["items"][0]["price"], 10000.0);
        assert!(json["items"][0].get("normalized_name").is_none());
        assert_eq!(json["warnings"][0]["type"], "duplicates_merged");
    }

    #[test]
    fn test_receipt_image_rejects_empty_and_non_images() {
        assert!(ReceiptImage::from_bytes(Vec::new()).is_err());
        assert!(ReceiptImage::from_bytes(b"%PDF-1.7 fake".to_vec()).is_err());

        let png_header = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let image = ReceiptImage::from_bytes(png_header).unwrap();
        assert_eq!(image.mime_type, "image/png");
    }
}
