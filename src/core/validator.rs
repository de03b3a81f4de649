//! Total-consistency validation and advisory OCR digit corrections.

use crate::core::amount::ratio;
use crate::domain::model::{
    items_sum, ConfidenceLevel, Correction, LineItem, QualityLevel, Severity, ValidationResult,
    Warning, WarningKind,
};
use rust_decimal::Decimal;
use std::str::FromStr;

/// 宣告的小計＋小費與總額相差在此比例內即視為自洽
pub const CONSISTENCY_TOLERANCE: f64 = 0.01;
pub const RELATIVE_TOLERANCE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);
/// 差距超過此百分比才搜尋修正
pub const CORRECTION_TRIGGER_PERCENT: f64 = 5.0;
/// 單價高於此值的品項不參與數字替換
pub const CORRECTION_PRICE_CEILING: Decimal = Decimal::from_parts(50_000, 0, 0, false, 0);
pub const MIN_IMPROVEMENT: f64 = 0.20;
pub const HIGH_IMPROVEMENT: f64 = 0.50;

/// OCR 常見的混淆數字；目前只處理 0 與 8
const DIGIT_CONFUSIONS: &[(char, char)] = &[('0', '8'), ('8', '0')];

/// 差額容許的絕對下限，依幣別面額而定
pub fn min_absolute_tolerance(currency: &str) -> Decimal {
    match currency.trim().to_uppercase().as_str() {
        // 面額大、不找零頭的幣別
        "COP" | "CLP" => Decimal::from(1000),
        _ => Decimal::ONE,
    }
}

pub fn validate(
    items: &[LineItem],
    declared_total: Decimal,
    declared_subtotal: Decimal,
    declared_tip: Decimal,
    currency: &str,
) -> ValidationResult {
    let calculated_subtotal = items_sum(items);
    let calculated_total = calculated_subtotal + declared_tip;
    let mut warnings = Vec::new();

    if declared_total <= Decimal::ZERO {
        warnings.push(Warning::new(
            WarningKind::MissingTotal,
            Severity::Error,
            "no declared total to validate against",
        ));
        return ValidationResult {
            is_valid: false,
            calculated_subtotal,
            calculated_total,
            declared_consistent: false,
            total_difference: calculated_total,
            raw_difference: calculated_total,
            difference_percent: 100.0,
            quality_score: 0.0,
            quality_level: QualityLevel::Review,
            warnings,
            corrections: Vec::new(),
        };
    }

    let declared_consistent = ratio(
        ((declared_subtotal + declared_tip) - declared_total).abs(),
        declared_total,
    )
    .is_some_and(|gap| gap < CONSISTENCY_TOLERANCE);
    let raw_difference = (calculated_total - declared_total).abs();

    if declared_consistent {
        // 宣告的總額彼此一致時，信任它們勝過雜訊較多的品項加總
        let deviation = (calculated_subtotal - declared_subtotal).abs();
        if !items.is_empty()
            && declared_subtotal > Decimal::ZERO
            && deviation > declared_subtotal * RELATIVE_TOLERANCE
        {
            warnings.push(Warning::new(
                WarningKind::ItemSumDeviation,
                Severity::Info,
                format!(
                    "item sum {} differs {:.1}% from declared subtotal {}",
                    calculated_subtotal,
                    percent_of(deviation, declared_subtotal),
                    declared_subtotal
                ),
            ));
        }

        return verified(calculated_subtotal, calculated_total, true, raw_difference, warnings);
    }

    let tolerance = (declared_total * RELATIVE_TOLERANCE).max(min_absolute_tolerance(currency));
    if raw_difference <= tolerance {
        return verified(calculated_subtotal, calculated_total, false, raw_difference, warnings);
    }

    let difference_percent = percent_of(raw_difference, declared_total);
    let quality_score = (100.0 - difference_percent).max(0.0);
    warnings.push(Warning::new(
        WarningKind::TotalMismatch,
        if difference_percent > 10.0 {
            Severity::Error
        } else {
            Severity::Warning
        },
        format!(
            "calculated total {} differs from declared {} by {:.1}%",
            calculated_total, declared_total, difference_percent
        ),
    ));

    let corrections = if difference_percent > CORRECTION_TRIGGER_PERCENT {
        suggest_corrections(items, calculated_total, declared_total)
    } else {
        Vec::new()
    };

    ValidationResult {
        is_valid: false,
        calculated_subtotal,
        calculated_total,
        declared_consistent,
        total_difference: raw_difference,
        raw_difference,
        difference_percent,
        quality_score,
        quality_level: QualityLevel::Review,
        warnings,
        corrections,
    }
}

fn percent_of(part: Decimal, whole: Decimal) -> f64 {
    part.checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|scaled| ratio(scaled, whole))
        .unwrap_or(100.0)
}

fn verified(
    calculated_subtotal: Decimal,
    calculated_total: Decimal,
    declared_consistent: bool,
    raw_difference: Decimal,
    warnings: Vec<Warning>,
) -> ValidationResult {
    ValidationResult {
        is_valid: true,
        calculated_subtotal,
        calculated_total,
        declared_consistent,
        total_difference: Decimal::ZERO,
        raw_difference,
        difference_percent: 0.0,
        quality_score: 100.0,
        quality_level: QualityLevel::Verified,
        warnings,
        corrections: Vec::new(),
    }
}

/// 對每個品項嘗試單一數字替換，保留改善最多的候選
pub fn suggest_corrections(
    items: &[LineItem],
    calculated_total: Decimal,
    declared_total: Decimal,
) -> Vec<Correction> {
    let difference = (calculated_total - declared_total).abs();
    if difference.is_zero() {
        return Vec::new();
    }

    let mut corrections: Vec<Correction> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.unit_price < CORRECTION_PRICE_CEILING)
        .filter_map(|(index, item)| {
            digit_substitutions(item.unit_price)
                .into_iter()
                .filter_map(|candidate| {
                    let adjusted = calculated_total + (candidate - item.unit_price) * item.quantity;
                    let remaining = (adjusted - declared_total).abs();
                    let improvement = ratio(difference - remaining, difference)?;
                    Some((candidate, improvement))
                })
                .filter(|(_, improvement)| *improvement > MIN_IMPROVEMENT)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(candidate, improvement)| Correction {
                    item_index: index,
                    original_price: item.unit_price,
                    suggested_price: candidate,
                    improvement,
                    confidence: if improvement > HIGH_IMPROVEMENT {
                        ConfidenceLevel::High
                    } else {
                        ConfidenceLevel::Medium
                    },
                })
        })
        .collect();

    corrections.sort_by(|a, b| b.improvement.total_cmp(&a.improvement));
    if !corrections.is_empty() {
        tracing::debug!("Found {} candidate digit corrections", corrections.len());
    }
    corrections
}

/// 在價格的十進位表示上逐位替換混淆數字
fn digit_substitutions(price: Decimal) -> Vec<Decimal> {
    let chars: Vec<char> = price.normalize().to_string().chars().collect();

    let mut candidates = Vec::new();
    for (pos, c) in chars.iter().enumerate() {
        for &(from, to) in DIGIT_CONFUSIONS {
            if *c != from {
                continue;
            }
            let mut swapped = chars.clone();
            swapped[pos] = to;
            let candidate: String = swapped.into_iter().collect();
            if let Ok(value) = Decimal::from_str(&candidate) {
                if value > Decimal::ZERO && value != price {
                    candidates.push(value.normalize());
                }
            }
        }
    }
    candidates
}
