//! Prompts for the generative model and lenient decoding of its JSON replies.

use crate::core::amount::{amount_from_f64, parse_amount};
use crate::domain::model::{LineItem, ReceiptFields};
use crate::utils::error::{ReceiptError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;

pub const RECEIPT_PROMPT: &str = r#"You are reading a photo of a restaurant or retail receipt.
Return ONLY a JSON object with this exact shape, no commentary:
{"total": number, "subtotal": number, "tip": number, "currency": "ISO code",
 "items": [{"name": string, "price": number, "quantity": number}],
 "confidence": number between 0 and 100}
Rules:
- "price" is the unit price; "quantity" defaults to 1.
- Amounts are plain numbers without thousands separators (35.650 on the receipt is 35650).
- "tip" is the gratuity/propina/servicio amount; use 0 when there is none.
- Do not list totals, taxes or payment lines as items."#;

pub fn verification_prompt(raw_text: &str) -> String {
    format!(
        "The following text was read by OCR from a receipt. Re-derive the totals and items.\n\
         Return ONLY a JSON object: {{\"total\": number, \"subtotal\": number, \"tip\": number, \
         \"items\": [{{\"name\": string, \"price\": number, \"quantity\": number}}]}}.\n\
         Amounts are plain numbers without thousands separators; use 0 when a value is absent.\n\
         \n---\n{}\n---",
        raw_text
    )
}

/// 生成式模型的解讀結果
#[derive(Debug, Clone, PartialEq)]
pub struct GenerativeReading {
    pub fields: ReceiptFields,
    pub currency: Option<String>,
    pub confidence: Option<f64>,
}

/// 去除 markdown 程式碼區塊；外圍有說明文字時只取第一個 `{` 到最後一個 `}`
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map_or("", |(_, body)| body);
            body.trim_end().strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    };

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

pub fn parse_json_reply(text: &str) -> Result<Value> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|e| ReceiptError::ParseFailure {
        input: truncate(body, 80),
        reason: format!("malformed JSON: {}", e),
    })?;

    if !value.is_object() {
        return Err(ReceiptError::ParseFailure {
            input: truncate(body, 80),
            reason: "expected a JSON object".to_string(),
        });
    }
    Ok(value)
}

pub fn read_structured(value: &Value) -> Result<GenerativeReading> {
    let object = value.as_object().ok_or_else(|| ReceiptError::ParseFailure {
        input: truncate(&value.to_string(), 80),
        reason: "expected a JSON object".to_string(),
    })?;

    let items = object
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(read_item).collect())
        .unwrap_or_default();

    let fields = ReceiptFields {
        total: amount_of(object.get("total")),
        subtotal: amount_of(object.get("subtotal")),
        tip: amount_of(object.get("tip").or_else(|| object.get("gratuity"))),
        items,
    };

    let currency = object
        .get("currency")
        .and_then(Value::as_str)
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty());

    let confidence = object
        .get("confidence")
        .and_then(number_of)
        .map(normalize_confidence);

    Ok(GenerativeReading {
        fields,
        currency,
        confidence,
    })
}

fn read_item(value: &Value) -> Option<LineItem> {
    let name = value.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let quantity = Some(amount_of(value.get("quantity")))
        .filter(|q| *q > Decimal::ZERO)
        .unwrap_or(Decimal::ONE);

    let unit_price = match value.get("price").or_else(|| value.get("unit_price")) {
        Some(price) => amount_of(Some(price)),
        None => (amount_of(value.get("total")) / quantity)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    };
    if unit_price.is_zero() {
        tracing::debug!("Dropping generative item '{}' without a price", name);
        return None;
    }

    Some(LineItem::new(name, unit_price, quantity))
}

/// 數字直接使用；字串交給在地化金額解析
fn amount_of(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(whole) if whole > 0 => Decimal::from(whole),
            Some(_) => Decimal::ZERO,
            None => n.as_f64().map(amount_from_f64).unwrap_or(Decimal::ZERO),
        },
        Some(Value::String(s)) => parse_amount(s),
        _ => Decimal::ZERO,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

/// 0–1 的比例換成 0–100
fn normalize_confidence(raw: f64) -> f64 {
    let scaled = if raw <= 1.0 { raw * 100.0 } else { raw };
    scaled.clamp(0.0, 100.0)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
