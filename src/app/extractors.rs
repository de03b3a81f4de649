use crate::core::confidence;
use crate::core::fields::{detect_currency, extract_from_text};
use crate::core::generative::{parse_json_reply, read_structured, RECEIPT_PROMPT};
use crate::core::verifier::{needs_verification, verify};
use crate::core::{EngineSettings, GenerativeModel, ReceiptExtractor, TextDetector};
use crate::domain::model::{
    ExtractionCandidate, OcrSource, RawExtraction, RawPayload, ReceiptImage,
};
use crate::utils::error::{ReceiptError, Result};
use std::sync::Arc;

/// 文字偵測 → 啟發式欄位萃取 → 評分 → 必要時請模型複核
pub struct VisionExtractor<T: TextDetector, G: GenerativeModel> {
    detector: T,
    verifier: Option<Arc<G>>,
    settings: EngineSettings,
}

impl<T: TextDetector, G: GenerativeModel> VisionExtractor<T, G> {
    pub fn new(detector: T, settings: EngineSettings) -> Self {
        Self {
            detector,
            verifier: None,
            settings,
        }
    }

    pub fn with_verifier(mut self, model: Arc<G>) -> Self {
        self.verifier = Some(model);
        self
    }
}

#[async_trait::async_trait]
impl<T: TextDetector, G: GenerativeModel> ReceiptExtractor for VisionExtractor<T, G> {
    fn source(&self) -> OcrSource {
        OcrSource::Vision
    }

    async fn extract_raw(&self, image: &ReceiptImage) -> Result<RawExtraction> {
        let text = self.detector.detect_text(image).await?;
        tracing::debug!("🔍 Vision detected {} characters", text.len());
        Ok(RawExtraction::vision_text(text))
    }

    async fn interpret(&self, raw: RawExtraction) -> Result<ExtractionCandidate> {
        let RawPayload::VisionText(text) = raw.payload else {
            return Err(unexpected_payload(OcrSource::Vision));
        };

        let fields = extract_from_text(&text);
        let report = confidence::score(fields.total, fields.subtotal, fields.tip, &fields.items);
        tracing::info!(
            score = report.score,
            problems = ?report.problems,
            "📐 Vision parse scored"
        );

        let (fields, report, verified_by_model) = match &self.verifier {
            Some(model) if needs_verification(&report, self.settings.verify_below) => {
                tracing::info!(
                    "🤖 Confidence {:.0} below {:.0}, asking model to verify",
                    report.score,
                    self.settings.verify_below
                );
                let outcome = verify(model.as_ref(), &text, fields, report).await;
                let adopted = outcome.adopted_any();
                (outcome.fields, outcome.report, adopted)
            }
            _ => (fields, report, false),
        };

        Ok(ExtractionCandidate {
            source: OcrSource::Vision,
            currency: detect_currency(&text, &self.settings.currency),
            fields,
            confidence: report.score,
            problems: report.problems,
            verified_by_model,
        })
    }
}

/// 直接請生成式模型把影像讀成 JSON
pub struct GenerativeExtractor<G: GenerativeModel> {
    model: Arc<G>,
    settings: EngineSettings,
}

impl<G: GenerativeModel> GenerativeExtractor<G> {
    pub fn new(model: Arc<G>, settings: EngineSettings) -> Self {
        Self { model, settings }
    }
}

#[async_trait::async_trait]
impl<G: GenerativeModel> ReceiptExtractor for GenerativeExtractor<G> {
    fn source(&self) -> OcrSource {
        OcrSource::Generative
    }

    async fn extract_raw(&self, image: &ReceiptImage) -> Result<RawExtraction> {
        let reply = self.model.extract_structured(image, RECEIPT_PROMPT).await?;
        let value = parse_json_reply(&reply)?;
        Ok(RawExtraction::generative(value))
    }

    async fn interpret(&self, raw: RawExtraction) -> Result<ExtractionCandidate> {
        let RawPayload::GenerativeStructured(value) = raw.payload else {
            return Err(unexpected_payload(OcrSource::Generative));
        };

        let reading = read_structured(&value)?;
        let fields = reading.fields;
        let report = confidence::score(fields.total, fields.subtotal, fields.tip, &fields.items);

        // 模型沒有自評時用同一套啟發式分數
        let confidence = reading.confidence.unwrap_or(report.score);
        tracing::info!(
            confidence,
            items = fields.items.len(),
            "🤖 Generative reading parsed"
        );

        Ok(ExtractionCandidate {
            source: OcrSource::Generative,
            currency: reading
                .currency
                .unwrap_or_else(|| self.settings.currency.clone()),
            fields,
            confidence,
            problems: report.problems,
            verified_by_model: false,
        })
    }
}

fn unexpected_payload(source: OcrSource) -> ReceiptError {
    ReceiptError::ExtractorFailure {
        extractor: source.to_string(),
        message: "unexpected raw payload for this extractor".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    struct FixedText(&'static str);

    #[async_trait::async_trait]
    impl TextDetector for FixedText {
        async fn detect_text(&self, _image: &ReceiptImage) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct ScriptedModel {
        structured: &'static str,
        completion: &'static str,
        completions: Mutex<usize>,
    }

    impl ScriptedModel {
        fn new(structured: &'static str, completion: &'static str) -> Self {
            Self {
                structured,
                completion,
                completions: Mutex::new(0),
            }
        }

        fn completion_calls(&self) -> usize {
            *self.completions.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn extract_structured(&self, _image: &ReceiptImage, prompt: &str) -> Result<String> {
            assert!(prompt.contains("JSON"));
            Ok(self.structured.to_string())
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            *self.completions.lock().unwrap() += 1;
            Ok(self.completion.to_string())
        }
    }

    fn image() -> ReceiptImage {
        ReceiptImage {
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime_type: "image/jpeg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_confident_vision_parse_skips_verification() {
        let model = Arc::new(ScriptedModel::new("{}", "{}"));
        let extractor = VisionExtractor::new(
            FixedText(
                "Bandeja Paisa 32.000\n2 Limonada 12.000\nArepa con queso 8.500\n\
                 SUBTOTAL: $52.500\nPROPINA: $5.250\nTOTAL: $57.750",
            ),
            EngineSettings::default(),
        )
        .with_verifier(model.clone());

        let candidate = extractor.extract(&image()).await.unwrap();

        assert_eq!(candidate.source, OcrSource::Vision);
        assert_eq!(candidate.fields.total, Decimal::from(57750));
        assert_eq!(candidate.fields.items.len(), 3);
        assert_eq!(candidate.confidence, 100.0);
        assert!(!candidate.verified_by_model);
        assert_eq!(candidate.currency, "COP");
        assert_eq!(model.completion_calls(), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_vision_parse_is_verified() {
        let model = Arc::new(ScriptedModel::new(
            "{}",
            r#"{"total": 39600, "subtotal": 36000, "tip": 3600, "items": [
                {"name": "Bandeja Paisa", "price": 30000, "quantity": 1},
                {"name": "Jugo de mora", "price": 6000, "quantity": 1}]}"#,
        ));
        let extractor = VisionExtractor::new(
            FixedText("Bandeja Paisa 30.000\nSUBTOTAL 36.000\nTOTAL 36.000"),
            EngineSettings::default(),
        )
        .with_verifier(model.clone());

        let candidate = extractor.extract(&image()).await.unwrap();

        assert_eq!(model.completion_calls(), 1);
        assert!(candidate.verified_by_model);
        assert_eq!(candidate.fields.tip, Decimal::from(3600));
        assert_eq!(candidate.fields.items.len(), 2);
        assert_eq!(candidate.confidence, 100.0);
    }

    #[tokio::test]
    async fn test_vision_without_verifier_keeps_heuristic() {
        let extractor: VisionExtractor<FixedText, ScriptedModel> = VisionExtractor::new(
            FixedText("Bandeja Paisa 30.000\nSUBTOTAL 36.000\nTOTAL 36.000"),
            EngineSettings::default(),
        );

        let candidate = extractor.extract(&image()).await.unwrap();
        assert!(!candidate.verified_by_model);
        assert!(candidate.confidence < 80.0);
        assert!(!candidate.problems.is_empty());
    }

    #[tokio::test]
    async fn test_generative_extractor_maps_fenced_json() {
        let model = Arc::new(ScriptedModel::new(
            "```json\n{\"total\": \"57.750\", \"subtotal\": 52500, \"tip\": 5250,\
             \"currency\": \"COP\", \"confidence\": 0.9, \"items\": [\
             {\"name\": \"Bandeja Paisa\", \"price\": 32000},\
             {\"name\": \"Limonada\", \"price\": 6000, \"quantity\": 2},\
             {\"name\": \"Arepa con queso\", \"price\": 8500}]}\n```",
            "{}",
        ));
        let extractor = GenerativeExtractor::new(model, EngineSettings::default());

        let candidate = extractor.extract(&image()).await.unwrap();
        assert_eq!(candidate.source, OcrSource::Generative);
        assert_eq!(candidate.fields.total, Decimal::from(57750));
        assert_eq!(candidate.fields.items.len(), 3);
        assert_eq!(candidate.confidence, 90.0);
        assert!(candidate.is_valid());
    }

    #[tokio::test]
    async fn test_generative_malformed_json_is_parse_failure() {
        let model = Arc::new(ScriptedModel::new("sorry, I cannot read this", "{}"));
        let extractor = GenerativeExtractor::new(model, EngineSettings::default());

        assert!(matches!(
            extractor.extract(&image()).await,
            Err(ReceiptError::ParseFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_generative_without_self_reported_confidence_uses_score() {
        let model = Arc::new(ScriptedModel::new(
            r#"{"total": 36000, "subtotal": 36000, "items": [{"name": "Bandeja", "price": 36000}]}"#,
            "{}",
        ));
        let extractor = GenerativeExtractor::new(model, EngineSettings::default());

        let candidate = extractor.extract(&image()).await.unwrap();
        // 無小費 -20，總額等於小計 -25
        assert_eq!(candidate.confidence, 55.0);
        assert_eq!(candidate.currency, "COP");
    }
}
