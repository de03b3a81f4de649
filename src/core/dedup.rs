//! Fuzzy consolidation of repeated line items.
//!
//! OCR often reads the same product twice with slightly different spelling or
//! price (`Coca Cola 3.000` / `coca-cola. 3.050`). Items are grouped pairwise,
//! which is quadratic but fine at receipt scale.
//!
//! A merged item carries a new name and price, which can make it match an item
//! that none of its members matched. Grouping therefore repeats over the merged
//! items until a pass merges nothing, so the output is stable under another
//! `deduplicate` call.

use crate::core::amount::ratio;
use crate::domain::model::{normalize_name, ConfidenceLevel, LineItem};
use rust_decimal::Decimal;
use std::borrow::Cow;

pub const NAME_SIMILARITY_THRESHOLD: f64 = 0.85;
pub const PRICE_TOLERANCE: f64 = 0.05;

pub fn deduplicate(items: &[LineItem]) -> Vec<LineItem> {
    let mut current = merge_pass(items);
    // 每次合併都讓數量變少，最多 n 輪
    loop {
        let next = merge_pass(&current);
        if next.len() == current.len() {
            return current;
        }
        tracing::debug!("Merged items matched again ({} -> {})", current.len(), next.len());
        current = next;
    }
}

/// 單輪分組合併；沒有任何合併時輸出與輸入相同
fn merge_pass(items: &[LineItem]) -> Vec<LineItem> {
    let n = items.len();
    let mut parent: Vec<usize> = (0..n).collect();

    for i in 0..n {
        for j in (i + 1)..n {
            if is_duplicate(&items[i], &items[j]) {
                union(&mut parent, i, j);
            }
        }
    }

    // 依第一個成員的位置排序群組，保持收據原本的順序
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_root: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        let root = find(&mut parent, i);
        match group_of_root[root] {
            Some(g) => groups[g].push(i),
            None => {
                group_of_root[root] = Some(groups.len());
                groups.push(vec![i]);
            }
        }
    }

    groups
        .iter()
        .map(|members| {
            let group: Vec<&LineItem> = members.iter().map(|&i| &items[i]).collect();
            merge_group(&group)
        })
        .collect()
}

pub fn is_duplicate(a: &LineItem, b: &LineItem) -> bool {
    let (name_a, name_b) = (name_key(a), name_key(b));
    if name_a == name_b {
        return true;
    }
    similarity_ratio(&name_a, &name_b) >= NAME_SIMILARITY_THRESHOLD
        && prices_close(a.unit_price, b.unit_price)
}

fn name_key(item: &LineItem) -> Cow<'_, str> {
    if item.normalized_name.is_empty() {
        Cow::Owned(normalize_name(&item.name))
    } else {
        Cow::Borrowed(item.normalized_name.as_str())
    }
}

fn prices_close(a: Decimal, b: Decimal) -> bool {
    ratio((a - b).abs(), a.max(b)).map_or(true, |gap| gap < PRICE_TOLERANCE)
}

fn merge_group(group: &[&LineItem]) -> LineItem {
    if let [single] = group {
        let mut item = (*single).clone();
        item.confidence = if item.duplicates_found > 0 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::High
        };
        return item;
    }

    // 句點最少、最短的名稱通常是最乾淨的 OCR 結果
    let name = group
        .iter()
        .map(|item| item.name.as_str())
        .min_by_key(|name| (name.matches('.').count(), name.chars().count()))
        .unwrap_or_default()
        .to_string();

    let quantity: Decimal = group.iter().map(|item| item.quantity).sum();
    let unit_price = mode_price(group);
    let duplicates_found = group
        .iter()
        .map(|item| item.duplicates_found + 1)
        .sum::<u32>()
        - 1;
    let original_names = group
        .iter()
        .flat_map(|item| {
            if item.original_names.is_empty() {
                vec![item.name.clone()]
            } else {
                item.original_names.clone()
            }
        })
        .collect();

    tracing::debug!(
        "Merged {} items into '{}' (qty {}, price {})",
        group.len(),
        name,
        quantity,
        unit_price
    );

    LineItem {
        normalized_name: normalize_name(&name),
        name,
        unit_price,
        quantity,
        confidence: ConfidenceLevel::Medium,
        duplicates_found,
        original_names,
    }
}

/// 出現最多次的單價；已合併的品項以其成員數計票，同票時取最先出現者
fn mode_price(group: &[&LineItem]) -> Decimal {
    let mut counts: Vec<(Decimal, u32)> = Vec::new();
    for item in group {
        let votes = item.duplicates_found + 1;
        match counts.iter_mut().find(|(price, _)| *price == item.unit_price) {
            Some((_, count)) => *count += votes,
            None => counts.push((item.unit_price, votes)),
        }
    }

    let mut best = counts.first().copied().unwrap_or((Decimal::ZERO, 0));
    for &(price, count) in &counts {
        if count > best.1 {
            best = (price, count);
        }
    }
    best.0
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut node = i;
    while parent[node] != root {
        let next = parent[node];
        parent[node] = root;
        node = next;
    }
    root
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        // 較小的索引當根
        let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[high] = low;
    }
}

/// 字元序列比對比率 2·M / (|a| + |b|)，M 為遞迴最長共同子字串的總長度
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, size) = longest_common_block(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + size..], &b[j + size..])
}

/// 最長共同子字串；同長度時取 a 中最早、再取 b 中最早者
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        for j in 0..b.len() {
            curr[j + 1] = if a[i] == b[j] { prev[j] + 1 } else { 0 };
            let len = curr[j + 1];
            if len > best.2 {
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    best
}
