//! Stable multi-key sorting with per-field direction and comparators.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Comparison function applied to one field's values.
pub type CompareFn = fn(&str, &str) -> Ordering;

pub fn compare_direct(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

pub fn compare_case_insensitive(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// One parsed `order_by` entry: a field name plus its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    /// Parse an `order_by` entry; a leading `-` means descending.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                descending: true,
            },
            None => Self {
                field: spec.to_string(),
                descending: false,
            },
        }
    }
}

/// Sort `items` by the given `order_by` specs, stably.
///
/// Each field uses its comparator from `rules` (default: direct comparison),
/// and a descending spec reverses only that field's contribution, so mixed
/// directions compose correctly. Ties keep their input order.
pub fn multi_key_sort<T, F>(
    items: &mut [T],
    order_by: &[String],
    rules: &BTreeMap<&str, CompareFn>,
    field_value: F,
) where
    F: Fn(&T, &str) -> String,
{
    let keys: Vec<SortKey> = order_by.iter().map(|spec| SortKey::parse(spec)).collect();

    items.sort_by(|a, b| {
        for key in &keys {
            let compare = rules
                .get(key.field.as_str())
                .copied()
                .unwrap_or(compare_direct as CompareFn);
            let ordering = compare(&field_value(a, &key.field), &field_value(b, &key.field));
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
