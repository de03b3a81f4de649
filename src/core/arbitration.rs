//! Deterministic choice between the vision and generative candidates.

use crate::core::amount::ratio;
use crate::domain::model::{ArbitrationDecision, ArbitrationReason, ExtractionCandidate, OcrSource};
use crate::utils::error::{ReceiptError, Result};
use rust_decimal::Decimal;

/// 一方超過此缺口、另一方低於 COHERENT_GAP 時直接選自洽的一方
pub const OUTLIER_GAP: f64 = 0.50;
pub const COHERENT_GAP: f64 = 0.30;
/// 兩方缺口相差超過此值時選缺口較小者
pub const GAP_MARGIN: f64 = 0.20;

/// |total − (subtotal + tip)| / total；沒有總額時視為完全不自洽
pub fn coherence_gap(candidate: &ExtractionCandidate) -> f64 {
    let fields = &candidate.fields;
    if fields.total <= Decimal::ZERO {
        return 1.0;
    }
    ratio((fields.total - (fields.subtotal + fields.tip)).abs(), fields.total).unwrap_or(1.0)
}

/// 依固定優先順序決定採用哪一方；無效或失敗的一方傳 None
pub fn reconcile(
    vision: Option<&ExtractionCandidate>,
    generative: Option<&ExtractionCandidate>,
) -> Result<ArbitrationDecision> {
    let vision = vision.filter(|c| c.is_valid());
    let generative = generative.filter(|c| c.is_valid());

    let (v, g) = match (vision, generative) {
        (Some(v), Some(g)) => (v, g),
        (Some(_), None) => return Ok(only_valid(OcrSource::Vision)),
        (None, Some(_)) => return Ok(only_valid(OcrSource::Generative)),
        (None, None) => {
            return Err(ReceiptError::ExtractionFailed {
                vision: "no valid result".to_string(),
                generative: "no valid result".to_string(),
            })
        }
    };

    let (v_gap, g_gap) = (coherence_gap(v), coherence_gap(g));
    let pick = |winner, reason| decision(winner, reason, Some(v_gap), Some(g_gap));

    match (v.item_count(), g.item_count()) {
        (0, n) if n > 0 => return Ok(pick(OcrSource::Generative, ArbitrationReason::ZeroItems)),
        (n, 0) if n > 0 => return Ok(pick(OcrSource::Vision, ArbitrationReason::ZeroItems)),
        _ => {}
    }

    if v_gap > OUTLIER_GAP && g_gap < COHERENT_GAP {
        return Ok(pick(OcrSource::Generative, ArbitrationReason::CoherenceOutlier));
    }
    if g_gap > OUTLIER_GAP && v_gap < COHERENT_GAP {
        return Ok(pick(OcrSource::Vision, ArbitrationReason::CoherenceOutlier));
    }

    if (v_gap - g_gap).abs() > GAP_MARGIN {
        let winner = if v_gap < g_gap {
            OcrSource::Vision
        } else {
            OcrSource::Generative
        };
        return Ok(pick(winner, ArbitrationReason::CoherenceGap));
    }

    if v.confidence != g.confidence {
        let winner = if v.confidence > g.confidence {
            OcrSource::Vision
        } else {
            OcrSource::Generative
        };
        return Ok(pick(winner, ArbitrationReason::ConfidenceGap));
    }

    if g.item_count() > v.item_count() {
        return Ok(pick(OcrSource::Generative, ArbitrationReason::ItemCount));
    }
    if v.item_count() > g.item_count() {
        return Ok(pick(OcrSource::Vision, ArbitrationReason::ItemCount));
    }

    Ok(pick(OcrSource::Vision, ArbitrationReason::DefaultVision))
}

fn only_valid(winner: OcrSource) -> ArbitrationDecision {
    decision(winner, ArbitrationReason::OnlyValidSource, None, None)
}

fn decision(
    winner: OcrSource,
    reason: ArbitrationReason,
    vision_gap: Option<f64>,
    generative_gap: Option<f64>,
) -> ArbitrationDecision {
    ArbitrationDecision {
        winner,
        reason,
        vision_gap,
        generative_gap,
    }
}
