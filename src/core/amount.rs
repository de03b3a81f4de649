//! Locale-aware amount parsing.
//!
//! Receipts mix two conventions: `35.650` (dot as thousands separator) and
//! `35.65` (dot as decimal point). A `.`-separated token whose trailing groups
//! are all exactly three digits is read as a thousands grouping. This makes a
//! bare `123.456` ambiguous; it is always read as 123456.

use crate::utils::error::{ReceiptError, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

/// 超過此值的金額視為讀取錯誤，也讓後續乘法不會溢位
const MAX_AMOUNT: i64 = 1_000_000_000_000_000;

/// 解析金額；格式錯誤時記錄警告並回傳 0
pub fn parse_amount(token: &str) -> Decimal {
    match try_parse_amount(token) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("⚠️ {}", e);
            Decimal::ZERO
        }
    }
}

pub fn try_parse_amount(token: &str) -> Result<Decimal> {
    let fail = |reason: &str| ReceiptError::ParseFailure {
        input: token.to_string(),
        reason: reason.to_string(),
    };

    // 去除貨幣符號、字母與空白，只留數字與分隔符號
    let cleaned: String = token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');

    if cleaned.is_empty() {
        return Err(fail("no digits"));
    }

    let canonical = match (cleaned.contains('.'), cleaned.contains(',')) {
        (true, true) => {
            // 最右邊的分隔符號是小數點
            let last_dot = cleaned.rfind('.').unwrap_or(0);
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let (thousands, decimal) = if last_dot > last_comma {
                (',', '.')
            } else {
                ('.', ',')
            };
            if cleaned.matches(decimal).count() > 1 {
                return Err(fail("repeated decimal separator"));
            }
            cleaned.replace(thousands, "").replace(decimal, ".")
        }
        (true, false) => {
            resolve_single_separator(cleaned, '.').ok_or_else(|| fail("ambiguous dots"))?
        }
        (false, true) => {
            resolve_single_separator(cleaned, ',').ok_or_else(|| fail("ambiguous commas"))?
        }
        (false, false) => cleaned.to_string(),
    };

    let value = Decimal::from_str(&canonical).map_err(|_| fail("not a number"))?;
    if value > Decimal::from(MAX_AMOUNT) {
        return Err(fail("amount out of range"));
    }
    Ok(value.abs().normalize())
}

/// JSON 數值轉金額；負數、非有限值或超出範圍時回傳 0
pub fn amount_from_f64(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .filter(|v| *v > Decimal::ZERO && *v <= Decimal::from(MAX_AMOUNT))
        .map(|v| v.normalize())
        .unwrap_or(Decimal::ZERO)
}

/// 只有一種分隔符號時：三位數分組視為千分位，否則視為小數點
fn resolve_single_separator(token: &str, separator: char) -> Option<String> {
    let groups: Vec<&str> = token.split(separator).collect();
    if is_thousands_grouping(&groups) {
        return Some(groups.concat());
    }
    if groups.len() == 2 {
        return Some(format!("{}.{}", groups[0], groups[1]));
    }
    None
}

fn is_thousands_grouping(groups: &[&str]) -> bool {
    groups.len() > 1
        && !groups[0].is_empty()
        && groups[1..].iter().all(|g| g.len() == 3)
}

/// 兩金額的比值，用於百分比與門檻比較；分母為 0 時回傳 None
pub fn ratio(numerator: Decimal, denominator: Decimal) -> Option<f64> {
    numerator.checked_div(denominator)?.to_f64()
}

/// 以點作為千分位格式化整數金額（收據慣用格式）
pub fn format_thousands(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}
