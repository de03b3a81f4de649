//! Second opinion from the generative model on low-confidence text parses.

use crate::core::confidence::{self, ConfidenceReport};
use crate::core::fields::MAX_TIP_RATIO;
use crate::core::generative::{parse_json_reply, read_structured, verification_prompt};
use crate::domain::model::{items_sum, ReceiptFields};
use crate::domain::ports::GenerativeModel;
use crate::utils::error::Result;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub fields: ReceiptFields,
    pub report: ConfidenceReport,
    pub adopted_totals: bool,
    pub adopted_items: bool,
}

impl VerificationOutcome {
    fn unchanged(fields: ReceiptFields, report: ConfidenceReport) -> Self {
        Self {
            fields,
            report,
            adopted_totals: false,
            adopted_items: false,
        }
    }

    pub fn adopted_any(&self) -> bool {
        self.adopted_totals || self.adopted_items
    }
}

pub fn needs_verification(report: &ConfidenceReport, verify_below: f64) -> bool {
    report.score < verify_below
}

/// 把原始文字交給模型重新解讀，按面向（總額、品項）各自決定是否採用
pub async fn verify<G>(
    model: &G,
    raw_text: &str,
    heuristic: ReceiptFields,
    report: ConfidenceReport,
) -> VerificationOutcome
where
    G: GenerativeModel + ?Sized,
{
    let second = match ask_model(model, raw_text).await {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!("⚠️ Verification skipped, keeping heuristic parse: {}", e);
            return VerificationOutcome::unchanged(heuristic, report);
        }
    };

    let mut fields = heuristic;
    let adopted_totals = should_adopt_totals(&fields, &second);
    if adopted_totals {
        tracing::info!(
            "🔁 Adopting verifier totals: total {} subtotal {} tip {}",
            second.total,
            second.subtotal,
            second.tip
        );
        // 模型沒讀到的總額或小計（0）不覆蓋已有的值
        if !second.total.is_zero() {
            fields.total = second.total;
        }
        if !second.subtotal.is_zero() {
            fields.subtotal = second.subtotal;
        }
        fields.tip = second.tip;
    }

    // 品項比較以（可能已更新的）宣告小計為準
    let adopted_items = should_adopt_items(&fields, &second);
    if adopted_items {
        tracing::info!(
            "🔁 Adopting verifier items: {} -> {}",
            fields.items.len(),
            second.items.len()
        );
        fields.items = second.items;
    }

    if !adopted_totals && !adopted_items {
        tracing::debug!("Verifier agreed with heuristic parse");
        return VerificationOutcome::unchanged(fields, report);
    }

    let report = confidence::score(fields.total, fields.subtotal, fields.tip, &fields.items);
    VerificationOutcome {
        fields,
        report,
        adopted_totals,
        adopted_items,
    }
}

async fn ask_model<G>(model: &G, raw_text: &str) -> Result<ReceiptFields>
where
    G: GenerativeModel + ?Sized,
{
    let reply = model.complete(&verification_prompt(raw_text)).await?;
    let value = parse_json_reply(&reply)?;
    Ok(read_structured(&value)?.fields)
}

fn should_adopt_totals(heuristic: &ReceiptFields, second: &ReceiptFields) -> bool {
    if second.tip > Decimal::ZERO && heuristic.tip <= Decimal::ZERO {
        return true;
    }
    plausible_tip_gap(second) && !plausible_tip_gap(heuristic)
}

/// total − subtotal 落在 (0, 0.3·subtotal) 之間
fn plausible_tip_gap(fields: &ReceiptFields) -> bool {
    let gap = fields.total - fields.subtotal;
    fields.subtotal > Decimal::ZERO
        && gap > Decimal::ZERO
        && gap < MAX_TIP_RATIO * fields.subtotal
}

fn should_adopt_items(current: &ReceiptFields, second: &ReceiptFields) -> bool {
    if second.items.len() > current.items.len() {
        return true;
    }
    if second.items.is_empty() || current.subtotal <= Decimal::ZERO {
        return false;
    }
    let ours = (items_sum(&current.items) - current.subtotal).abs();
    let theirs = (items_sum(&second.items) - current.subtotal).abs();
    theirs < ours
}
