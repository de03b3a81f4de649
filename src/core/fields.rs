//! Heuristic field extraction from raw OCR lines.
//!
//! Totals are found with label-anchored rules tried in priority order, the
//! gratuity with a three-tier fallback, and line items with two positional
//! patterns (`name ... price` on one line, or a name line followed by a
//! price-only line).

use crate::core::amount::parse_amount;
use crate::domain::model::{LineItem, ReceiptFields};
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashSet;
use std::sync::LazyLock;

/// 單品單價的合理範圍（COP）
pub const MIN_UNIT_PRICE: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(200_000, 0, 0, false, 0);
/// 小費不得超過小計的比例
pub const MAX_TIP_RATIO: Decimal = Decimal::from_parts(30, 0, 0, false, 2);
const MIN_NAME_CHARS: usize = 3;

/// 已知的雜訊品項
const NOISE_PHRASES: &[&str] = &[
    "free water glass",
    "vaso de agua",
    "agua de cortesia",
    "agua de cortesía",
    "cortesia",
    "cortesía",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Total,
    Subtotal,
    Tip,
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static receipt pattern must compile")
}

/// 依優先順序排列；每個欄位第一個命中的規則勝出
static FIELD_RULES: LazyLock<Vec<(Field, Regex)>> = LazyLock::new(|| {
    vec![
        (Field::Subtotal, regex(r"(?i)^\s*sub\s*-?\s*total\b")),
        (Field::Subtotal, regex(r"(?i)^\s*(?:valor\s+neto|neto|base)\b")),
        (
            Field::Total,
            regex(r"(?i)^\s*(?:total\s+a\s+pagar|gran\s+total|valor\s+total|total\s+factura)\b"),
        ),
        (Field::Total, regex(r"(?i)^\s*total\b")),
        (
            Field::Tip,
            regex(r"(?i)^\s*(?:propina|servicio|tip|gratuity|service)\b"),
        ),
    ]
});

static TIP_PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?i)(?:propina|servicio|tip|gratuity|service)\b[^%\n]*?(\d{1,2}(?:[.,]\d+)?)\s*%")
});

static PERCENT_TOKEN: LazyLock<Regex> = LazyLock::new(|| regex(r"\d{1,3}(?:[.,]\d+)?\s*%"));

static AMOUNT_TOKEN: LazyLock<Regex> = LazyLock::new(|| regex(r"\d[\d.,]*\d|\d"));

static ITEM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^\s*(?:(\d{1,2})\s*[xX]?\s+)?(\D.*?)\s+\$?\s*(\d{1,3}(?:[.,]\d{3})+|\d{4,})\s*$")
});

static NAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"^\s*(?:(\d{1,2})\s*[xX]?\s+)?([^\d$].*?)\s*$"));

static PRICE_ONLY: LazyLock<Regex> =
    LazyLock::new(|| regex(r"^\s*\$?\s*(\d{1,3}(?:[.,]\d{3})+|\d{4,})\s*$"));

static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r"(?i)\b(?:sub\s*-?\s*total|total|propina|servicio|tip|gratuity|iva|impuesto|impoconsumo|cambio|efectivo|tarjeta|nit|factura|fecha|mesa|mesero|gracias|descuento|base|neto|saldo|pago|pagad[oa]|visa|mastercard|dian|resoluci[oó]n|cufe)\b",
    )
});

pub fn extract_from_text(text: &str) -> ReceiptFields {
    let lines: Vec<&str> = text.lines().collect();
    extract_fields(&lines)
}

pub fn extract_fields(lines: &[&str]) -> ReceiptFields {
    let mut total = find_field(lines, Field::Total);
    let subtotal = find_field(lines, Field::Subtotal).unwrap_or(Decimal::ZERO);

    if total.is_none() {
        total = largest_amount(lines);
        if let Some(fallback) = total {
            tracing::debug!("No explicit total, using largest amount {}", fallback);
        }
    }
    let total = total.unwrap_or(Decimal::ZERO);

    let tip = resolve_tip(lines, total, subtotal);
    let items = extract_items(lines);

    tracing::debug!(
        "Extracted fields: total={}, subtotal={}, tip={}, items={}",
        total,
        subtotal,
        tip,
        items.len()
    );

    ReceiptFields {
        total,
        subtotal,
        tip,
        items,
    }
}

fn find_field(lines: &[&str], field: Field) -> Option<Decimal> {
    FIELD_RULES
        .iter()
        .filter(|(f, _)| *f == field)
        .find_map(|(_, rule)| {
            lines.iter().enumerate().find_map(|(i, line)| {
                let label = rule.find(line)?;
                labeled_amount(lines, i, &line[label.end()..])
            })
        })
}

/// 標籤後的最後一個金額；同一行沒有金額時看下一行是否只有價格
fn labeled_amount(lines: &[&str], index: usize, rest: &str) -> Option<Decimal> {
    let without_percent = PERCENT_TOKEN.replace_all(rest, "");
    let on_line = AMOUNT_TOKEN
        .find_iter(&without_percent)
        .last()
        .map(|m| parse_amount(m.as_str()))
        .filter(|v| !v.is_zero());

    on_line.or_else(|| {
        let next = lines.get(index + 1)?;
        let caps = PRICE_ONLY.captures(next)?;
        Some(parse_amount(&caps[1])).filter(|v| !v.is_zero())
    })
}

/// 找不到明確總額時的後備：全文最大的金額
fn largest_amount(lines: &[&str]) -> Option<Decimal> {
    lines
        .iter()
        .flat_map(|line| {
            let without_percent = PERCENT_TOKEN.replace_all(line, "").into_owned();
            AMOUNT_TOKEN
                .find_iter(&without_percent)
                .map(|m| parse_amount(m.as_str()))
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_zero())
        .max()
}

fn resolve_tip(lines: &[&str], total: Decimal, subtotal: Decimal) -> Decimal {
    // 三種來源都以小計為基準；沒有小計就無法判斷小費是否合理
    if subtotal <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    // 1. 百分比標籤乘以小計
    let percent = lines
        .iter()
        .find_map(|line| TIP_PERCENT.captures(line))
        .map(|caps| parse_amount(&caps[1].replace(',', ".")));
    if let Some(percent) = percent.filter(|p| *p > Decimal::ZERO && *p <= Decimal::ONE_HUNDRED) {
        let tip = (subtotal * percent / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .normalize();
        tracing::debug!("Tip from {}% of subtotal: {}", percent, tip);
        return tip;
    }

    // 2. 明確金額，不得超過小計的 30%
    let ceiling = subtotal * MAX_TIP_RATIO;
    if let Some(amount) = find_field(lines, Field::Tip) {
        if amount <= ceiling {
            return amount;
        }
        tracing::debug!("Ignoring implausible tip amount {} (subtotal {})", amount, subtotal);
    }

    // 3. 由總額與小計推算
    let inferred = total - subtotal;
    if inferred > Decimal::ZERO && inferred <= ceiling {
        return inferred;
    }

    Decimal::ZERO
}

fn extract_items(lines: &[&str]) -> Vec<LineItem> {
    let mut items = Vec::new();
    let mut used: HashSet<usize> = HashSet::new();

    for (i, line) in lines.iter().enumerate() {
        if used.contains(&i) || SUMMARY_LINE.is_match(line) {
            continue;
        }

        if let Some(caps) = ITEM_LINE.captures(line) {
            used.insert(i);
            let quantity = caps.get(1).map(|m| m.as_str());
            if let Some(item) = build_item(&caps[2], quantity, &caps[3]) {
                items.push(item);
            }
            continue;
        }

        let Some(next) = lines.get(i + 1) else {
            continue;
        };
        if used.contains(&(i + 1)) {
            continue;
        }
        let captures = (NAME_LINE.captures(line), PRICE_ONLY.captures(next));
        if let (Some(name_caps), Some(price_caps)) = captures {
            if !has_letters(&name_caps[2]) {
                continue;
            }
            used.insert(i);
            used.insert(i + 1);
            let quantity = name_caps.get(1).map(|m| m.as_str());
            if let Some(item) = build_item(&name_caps[2], quantity, &price_caps[1]) {
                items.push(item);
            }
        }
    }

    items
}

fn build_item(raw_name: &str, raw_quantity: Option<&str>, raw_price: &str) -> Option<LineItem> {
    let name = raw_name
        .trim()
        .trim_end_matches(|c: char| c == '$' || c == ':' || c.is_whitespace());
    if name.chars().count() < MIN_NAME_CHARS || !has_letters(name) {
        return None;
    }

    let lowered = name.to_lowercase();
    if NOISE_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        tracing::debug!("Skipping noise item '{}'", name);
        return None;
    }

    let quantity: u32 = raw_quantity.and_then(|q| q.parse().ok()).unwrap_or(1).max(1);
    let line_price = parse_amount(raw_price);
    // 以分為單位捨入，避免 10.000 / 3 這類無限小數
    let unit_price = (line_price / Decimal::from(quantity))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    if !(MIN_UNIT_PRICE..=MAX_UNIT_PRICE).contains(&unit_price) {
        tracing::debug!("Skipping '{}' with implausible unit price {}", name, unit_price);
        return None;
    }

    Some(LineItem::new(name, unit_price, Decimal::from(quantity)))
}

fn has_letters(text: &str) -> bool {
    text.chars().filter(|c| c.is_alphabetic()).count() >= 2
}

/// 依文字中的幣別標記判斷幣別
pub fn detect_currency(text: &str, default: &str) -> String {
    let upper = text.to_uppercase();
    if upper.contains("COP") {
        "COP".to_string()
    } else if upper.contains("USD") || upper.contains("US$") {
        "USD".to_string()
    } else if upper.contains("EUR") || text.contains('€') {
        "EUR".to_string()
    } else {
        default.to_string()
    }
}
