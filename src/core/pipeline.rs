use crate::core::arbitration::reconcile;
use crate::core::dedup::deduplicate;
use crate::core::validator::validate;
use crate::core::{EngineSettings, Pipeline, ReceiptExtractor};
use crate::domain::model::{
    DualExtraction, ExtractionCandidate, OcrSource, ParsedReceipt, ReceiptImage, Severity,
    Warning, WarningKind,
};
use crate::utils::error::{ReceiptError, Result};
use rust_decimal::Decimal;
use std::time::Duration;

/// 同時呼叫兩個萃取器，再仲裁、去重、驗證
pub struct ReceiptPipeline<V: ReceiptExtractor, G: ReceiptExtractor> {
    vision: V,
    generative: G,
    settings: EngineSettings,
}

impl<V: ReceiptExtractor, G: ReceiptExtractor> ReceiptPipeline<V, G> {
    pub fn new(vision: V, generative: G, settings: EngineSettings) -> Self {
        Self {
            vision,
            generative,
            settings,
        }
    }
}

#[async_trait::async_trait]
impl<V: ReceiptExtractor, G: ReceiptExtractor> Pipeline for ReceiptPipeline<V, G> {
    async fn extract(&self, image: &ReceiptImage) -> Result<DualExtraction> {
        tracing::debug!(
            "Running extractors concurrently ({} bytes, {})",
            image.bytes.len(),
            image.mime_type
        );

        let (vision, generative) = tokio::join!(
            run_with_timeout(&self.vision, image, self.settings.vision_timeout),
            run_with_timeout(&self.generative, image, self.settings.generative_timeout),
        );

        Ok(DualExtraction { vision, generative })
    }

    async fn transform(&self, extraction: DualExtraction) -> Result<ParsedReceipt> {
        let mut warnings = Vec::new();

        let vision = side_candidate(extraction.vision, OcrSource::Vision, &mut warnings);
        let generative =
            side_candidate(extraction.generative, OcrSource::Generative, &mut warnings);

        let (vision, generative) = match (vision, generative) {
            (Err(v), Err(g)) => return Err(both_failed(v, g)),
            (v, g) => (v.ok(), g.ok()),
        };

        let decision = reconcile(vision.as_ref(), generative.as_ref())?;
        tracing::info!(
            winner = %decision.winner,
            reason = ?decision.reason,
            vision_gap = ?decision.vision_gap,
            generative_gap = ?decision.generative_gap,
            "⚖️ Arbitration decided"
        );

        let winner = match decision.winner {
            OcrSource::Vision => vision,
            OcrSource::Generative => generative,
        }
        .ok_or_else(|| ReceiptError::ExtractionFailed {
            vision: "arbitration picked a missing candidate".to_string(),
            generative: "arbitration picked a missing candidate".to_string(),
        })?;

        let ExtractionCandidate {
            source,
            fields,
            currency,
            confidence,
            ..
        } = winner;

        let items = deduplicate(&fields.items);
        let merged = fields.items.len() - items.len();
        if merged > 0 {
            tracing::info!("🧹 Merged {} duplicate line item(s)", merged);
            warnings.push(Warning::new(
                WarningKind::DuplicatesMerged,
                Severity::Info,
                format!("{} duplicate line item(s) merged", merged),
            ));
        }

        if confidence < self.settings.verify_below {
            warnings.push(Warning::new(
                WarningKind::LowConfidence,
                Severity::Warning,
                format!(
                    "parse confidence {:.0} below {:.0}",
                    confidence, self.settings.verify_below
                ),
            ));
        }

        let validation = validate(&items, fields.total, fields.subtotal, fields.tip, &currency);
        tracing::info!(
            quality = ?validation.quality_level,
            difference = %validation.total_difference,
            "✅ Validation finished"
        );
        warnings.extend(validation.warnings);

        for correction in &validation.corrections {
            if let Some(item) = items.get(correction.item_index) {
                warnings.push(Warning::new(
                    WarningKind::SuggestedCorrection,
                    Severity::Info,
                    format!(
                        "'{}' may be {} instead of {}",
                        item.name, correction.suggested_price, correction.original_price
                    ),
                ));
            }
        }

        // 沒有宣告小計時以品項加總代替
        let subtotal = if fields.subtotal > Decimal::ZERO {
            fields.subtotal
        } else {
            validation.calculated_subtotal
        };

        Ok(ParsedReceipt {
            total: fields.total,
            subtotal,
            tip: fields.tip,
            currency,
            items,
            confidence_score: confidence,
            quality_level: validation.quality_level,
            total_difference: validation.total_difference,
            warnings,
            corrections: validation.corrections,
            ocr_source: source,
        })
    }
}

async fn run_with_timeout<E: ReceiptExtractor>(
    extractor: &E,
    image: &ReceiptImage,
    limit: Duration,
) -> Result<ExtractionCandidate> {
    let source = extractor.source();
    match tokio::time::timeout(limit, extractor.extract(image)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("⏱️ {} extractor timed out after {:?}", source, limit);
            Err(ReceiptError::ExtractorTimeout {
                extractor: source.to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}

/// 失敗或無效的一方記一筆警告並轉成 Err
fn side_candidate(
    result: Result<ExtractionCandidate>,
    source: OcrSource,
    warnings: &mut Vec<Warning>,
) -> Result<ExtractionCandidate> {
    let outcome = match result {
        Ok(candidate) if candidate.is_valid() => return Ok(candidate),
        Ok(_) => Err(ReceiptError::ExtractorFailure {
            extractor: source.to_string(),
            message: "no total and no items found".to_string(),
        }),
        Err(e) => Err(e),
    };

    if let Err(e) = &outcome {
        tracing::warn!("⚠️ {} side invalid: {}", source, e);
        warnings.push(Warning::new(
            WarningKind::SourceFailed,
            Severity::Warning,
            format!("{} extraction unusable: {}", source, e),
        ));
    }
    outcome
}

/// 兩方皆失敗：未設定的萃取器優先回報，其餘合併成 ExtractionFailed
fn both_failed(vision: ReceiptError, generative: ReceiptError) -> ReceiptError {
    match (vision, generative) {
        (e @ ReceiptError::ExtractorUnavailable { .. }, _)
        | (_, e @ ReceiptError::ExtractorUnavailable { .. }) => e,
        (v, g) => ReceiptError::ExtractionFailed {
            vision: v.to_string(),
            generative: g.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{LineItem, QualityLevel, RawExtraction, ReceiptFields};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    enum Outcome {
        Candidate(ExtractionCandidate),
        Unavailable,
        Failure,
        Hang,
    }

    struct MockExtractor {
        source: OcrSource,
        outcome: Outcome,
        calls: Arc<Mutex<usize>>,
    }

    impl MockExtractor {
        fn new(source: OcrSource, outcome: Outcome) -> Self {
            Self {
                source,
                outcome,
                calls: Arc::new(Mutex::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl ReceiptExtractor for MockExtractor {
        fn source(&self) -> OcrSource {
            self.source
        }

        async fn extract_raw(&self, _image: &ReceiptImage) -> Result<RawExtraction> {
            unreachable!("mock overrides extract")
        }

        async fn interpret(&self, _raw: RawExtraction) -> Result<ExtractionCandidate> {
            unreachable!("mock overrides extract")
        }

        async fn extract(&self, _image: &ReceiptImage) -> Result<ExtractionCandidate> {
            *self.calls.lock().await += 1;
            match &self.outcome {
                Outcome::Candidate(candidate) => Ok(candidate.clone()),
                Outcome::Unavailable => Err(ReceiptError::ExtractorUnavailable {
                    extractor: self.source.to_string(),
                    reason: "no API key".to_string(),
                }),
                Outcome::Failure => Err(ReceiptError::ExtractorFailure {
                    extractor: self.source.to_string(),
                    message: "HTTP 500".to_string(),
                }),
                Outcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    unreachable!("timeout should fire first")
                }
            }
        }
    }

    fn image() -> ReceiptImage {
        ReceiptImage {
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime_type: "image/jpeg".to_string(),
        }
    }

    fn candidate(source: OcrSource, items: Vec<LineItem>, confidence: f64) -> ExtractionCandidate {
        ExtractionCandidate {
            source,
            fields: ReceiptFields {
                total: Decimal::from(39600),
                subtotal: Decimal::from(36000),
                tip: Decimal::from(3600),
                items,
            },
            currency: "COP".to_string(),
            confidence,
            problems: Vec::new(),
            verified_by_model: false,
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            vision_timeout: Duration::from_millis(100),
            generative_timeout: Duration::from_millis(100),
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_generative_wins_when_vision_has_no_items() {
        let vision = MockExtractor::new(
            OcrSource::Vision,
            Outcome::Candidate(candidate(OcrSource::Vision, Vec::new(), 95.0)),
        );
        let items = vec![
            LineItem::new("Bandeja paisa", Decimal::from(18000), Decimal::ONE),
            LineItem::new("Ajiaco", Decimal::from(12000), Decimal::ONE),
            LineItem::new("Limonada", Decimal::from(2000), Decimal::ONE),
            LineItem::new("Jugo de mora", Decimal::from(2000), Decimal::ONE),
            LineItem::new("Postre", Decimal::from(2000), Decimal::ONE),
        ];
        let generative = MockExtractor::new(
            OcrSource::Generative,
            Outcome::Candidate(candidate(OcrSource::Generative, items, 90.0)),
        );
        let pipeline = ReceiptPipeline::new(vision, generative, settings());

        let extraction = pipeline.extract(&image()).await.unwrap();
        let receipt = pipeline.transform(extraction).await.unwrap();

        assert_eq!(receipt.ocr_source, OcrSource::Generative);
        assert_eq!(receipt.items.len(), 5);
        assert_eq!(receipt.quality_level, QualityLevel::Verified);
        assert_eq!(receipt.total_difference, Decimal::ZERO);
        assert_eq!(receipt.confidence_score, 90.0);
    }

    #[tokio::test]
    async fn test_duplicates_are_merged_and_reported() {
        let items = vec![
            LineItem::new("Coca Cola", Decimal::from(3000), Decimal::ONE),
            LineItem::new("coca-cola.", Decimal::from(3050), Decimal::ONE),
            LineItem::new("Bandeja paisa", Decimal::from(30000), Decimal::ONE),
        ];
        let vision = MockExtractor::new(
            OcrSource::Vision,
            Outcome::Candidate(candidate(OcrSource::Vision, items, 85.0)),
        );
        let generative = MockExtractor::new(OcrSource::Generative, Outcome::Failure);
        let pipeline = ReceiptPipeline::new(vision, generative, settings());

        let extraction = pipeline.extract(&image()).await.unwrap();
        let receipt = pipeline.transform(extraction).await.unwrap();

        assert_eq!(receipt.ocr_source, OcrSource::Vision);
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.items[0].duplicates_found, 1);
        let kinds: Vec<_> = receipt.warnings.iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&WarningKind::SourceFailed));
        assert!(kinds.contains(&WarningKind::DuplicatesMerged));
    }

    #[tokio::test]
    async fn test_timeout_invalidates_only_that_side() {
        let vision = MockExtractor::new(OcrSource::Vision, Outcome::Hang);
        let items = vec![LineItem::new("Bandeja paisa", Decimal::from(36000), Decimal::ONE)];
        let generative = MockExtractor::new(
            OcrSource::Generative,
            Outcome::Candidate(candidate(OcrSource::Generative, items, 70.0)),
        );
        let pipeline = ReceiptPipeline::new(vision, generative, settings());

        let extraction = pipeline.extract(&image()).await.unwrap();
        assert!(matches!(
            extraction.vision,
            Err(ReceiptError::ExtractorTimeout { .. })
        ));

        let receipt = pipeline.transform(extraction).await.unwrap();
        assert_eq!(receipt.ocr_source, OcrSource::Generative);
        assert!(receipt
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::LowConfidence));
    }

    #[tokio::test]
    async fn test_both_sides_failing_is_fatal() {
        let mut empty = candidate(OcrSource::Generative, Vec::new(), 0.0);
        empty.fields = ReceiptFields::default();
        let vision = MockExtractor::new(OcrSource::Vision, Outcome::Failure);
        let generative = MockExtractor::new(OcrSource::Generative, Outcome::Candidate(empty));
        let pipeline = ReceiptPipeline::new(vision, generative, settings());

        let extraction = pipeline.extract(&image()).await.unwrap();
        let err = pipeline.transform(extraction).await.unwrap_err();
        assert!(matches!(err, ReceiptError::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_extractor_is_surfaced() {
        let vision = MockExtractor::new(OcrSource::Vision, Outcome::Unavailable);
        let generative = MockExtractor::new(OcrSource::Generative, Outcome::Failure);
        let calls = generative.calls.clone();
        let pipeline = ReceiptPipeline::new(vision, generative, settings());

        let extraction = pipeline.extract(&image()).await.unwrap();
        let err = pipeline.transform(extraction).await.unwrap_err();
        assert!(matches!(err, ReceiptError::ExtractorUnavailable { .. }));
        assert_eq!(*calls.lock().await, 1);
    }
}
