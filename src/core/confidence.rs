//! Parse-quality score for heuristically extracted receipts.

use crate::core::amount::ratio;
use crate::domain::model::{items_sum, normalize_name, LineItem};
use rust_decimal::Decimal;
use std::collections::HashMap;

const NO_TIP_PENALTY: f64 = 20.0;
const TOTAL_EQUALS_SUBTOTAL_PENALTY: f64 = 25.0;
const TOTAL_EQUALS_SUBTOTAL_TOLERANCE: Decimal = Decimal::ONE;
const ITEM_SUM_DEVIATION_THRESHOLD: f64 = 0.10;
const MAX_ITEM_SUM_PENALTY: f64 = 25.0;
const DUPLICATE_PRICE_PENALTY: f64 = 10.0;
/// 同名品項價差超過此比例才算「明顯不同」
const DUPLICATE_PRICE_TOLERANCE: f64 = 0.05;
const FEW_ITEMS_PENALTY: f64 = 15.0;
const FEW_ITEMS_MIN: usize = 3;
pub const HIGH_VALUE_TOTAL: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);
const SHORT_NAME_PENALTY: f64 = 5.0;
const MAX_SHORT_NAME_PENALTY: f64 = 10.0;
const MIN_NAME_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceReport {
    pub score: f64,
    pub problems: Vec<String>,
}

pub fn score(total: Decimal, subtotal: Decimal, tip: Decimal, items: &[LineItem]) -> ConfidenceReport {
    let mut score = 100.0;
    let mut problems = Vec::new();

    if tip <= Decimal::ZERO {
        score -= NO_TIP_PENALTY;
        problems.push("no gratuity detected".to_string());
    }

    if total > Decimal::ZERO && (total - subtotal).abs() < TOTAL_EQUALS_SUBTOTAL_TOLERANCE {
        score -= TOTAL_EQUALS_SUBTOTAL_PENALTY;
        problems.push("total equals subtotal".to_string());
    }

    if let Some(deviation) = ratio((items_sum(items) - subtotal).abs(), subtotal) {
        if deviation > ITEM_SUM_DEVIATION_THRESHOLD {
            let penalty = (deviation * 100.0).min(MAX_ITEM_SUM_PENALTY);
            score -= penalty;
            problems.push(format!(
                "item sum deviates {:.1}% from subtotal",
                deviation * 100.0
            ));
        }
    }

    let conflicts = conflicting_duplicates(items);
    if conflicts > 0 {
        score -= DUPLICATE_PRICE_PENALTY * conflicts as f64;
        problems.push(format!("{} duplicate item(s) with different prices", conflicts));
    }

    if items.len() < FEW_ITEMS_MIN && total > HIGH_VALUE_TOTAL {
        score -= FEW_ITEMS_PENALTY;
        problems.push(format!("only {} item(s) for a total of {}", items.len(), total));
    }

    let short_names = items
        .iter()
        .filter(|item| item.name.trim().chars().count() < MIN_NAME_CHARS)
        .count();
    if short_names > 0 {
        score -= (SHORT_NAME_PENALTY * short_names as f64).min(MAX_SHORT_NAME_PENALTY);
        problems.push(format!("{} item name(s) too short", short_names));
    }

    ConfidenceReport {
        score: score.clamp(0.0, 100.0),
        problems,
    }
}

/// 同名品項中，價格與第一次出現時明顯不同的次數
fn conflicting_duplicates(items: &[LineItem]) -> usize {
    let mut first_price: HashMap<String, Decimal> = HashMap::new();
    let mut conflicts = 0;

    for item in items {
        let key = normalize_name(&item.name);
        match first_price.get(&key) {
            Some(&price) => {
                let larger = price.max(item.unit_price);
                let gap = ratio((price - item.unit_price).abs(), larger).unwrap_or(0.0);
                if gap > DUPLICATE_PRICE_TOLERANCE {
                    conflicts += 1;
                }
            }
            None => {
                first_price.insert(key, item.unit_price);
            }
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn items(entries: &[(&str, i64)]) -> Vec<LineItem> {
        entries
            .iter()
            .map(|(name, price)| LineItem::new(*name, d(*price), Decimal::ONE))
            .collect()
    }

    #[test]
    fn test_clean_receipt_scores_full() {
        let items = items(&[("Bandeja", 30000), ("Jugo", 6000), ("Postre", 9000)]);
        let report = score(d(49500), d(45000), d(4500), &items);
        assert_eq!(report.score, 100.0);
        assert!(report.problems.is_empty());
    }

    #[test]
    fn test_missing_tip_and_total_equal_subtotal() {
        let items = items(&[("Bandeja", 30000), ("Jugo", 6000), ("Postre", 9000)]);
        let report = score(d(45000), d(45000), d(0), &items);
        assert_eq!(report.score, 55.0);
        assert_eq!(report.problems.len(), 2);
    }

    #[test]
    fn test_item_sum_deviation_is_proportional_and_capped() {
        let three = items(&[("Bandeja", 30000), ("Jugo", 6000), ("Postre", 9000)]);
        // 45000 vs 50000 -> 10% exactly, not penalized
        assert_eq!(score(d(55000), d(50000), d(5000), &three).score, 100.0);
        // 45000 vs 60000 -> 25%
        assert_eq!(score(d(66000), d(60000), d(6000), &three).score, 75.0);
        // 45000 vs 90000 -> 50%, capped at 25
        assert_eq!(score(d(99000), d(90000), d(9000), &three).score, 75.0);
    }

    #[test]
    fn test_duplicate_names_with_different_prices() {
        let items = items(&[("Cerveza", 7000), ("cerveza.", 9000), ("Cerveza", 7100)]);
        let report = score(d(25410), d(23100), d(2310), &items);
        assert_eq!(report.score, 90.0);
    }

    #[test]
    fn test_few_items_on_high_value_total_and_short_names() {
        let items = items(&[("Ab", 60000), ("X", 50000)]);
        let report = score(d(121000), d(110000), d(11000), &items);
        // -15 few items, -10 short names (capped)
        assert_eq!(report.score, 75.0);
    }

    #[test]
    fn test_score_is_clamped_at_zero() {
        let items = items(&[("A", 100), ("B", 100), ("a", 900), ("b", 900)]);
        let report = score(d(500000), d(500000), d(0), &items);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn test_zero_tip_never_increases_score() {
        let items = items(&[("Bandeja", 30000), ("Jugo", 6000)]);
        let with_tip = score(d(39600), d(36000), d(3600), &items).score;
        let without_tip = score(d(39600), d(36000), d(0), &items).score;
        assert!(without_tip <= with_tip);
    }
}
