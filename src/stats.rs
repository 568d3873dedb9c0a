//! Small statistics kernels shared by the in-memory paths.
//!
//! Quantiles here use nearest-rank indexing (`sorted[floor(n * p)]`), which
//! differs from the runtime's linear interpolation for most sample sizes.

use crate::table::{Value, ValueKey};
use std::collections::HashMap;

/// Finite numbers parsed from the non-missing values, in row order.
pub fn parse_numbers<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<f64> {
    values
        .into_iter()
        .filter(|v| !v.is_missing())
        .filter_map(Value::parse_number)
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (denominator `n - 1`); `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out
}

pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted.get(idx).copied()
}

pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let mut it = values.iter().copied();
    let first = it.next()?;
    Some(it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}

/// Counts of non-missing values in first-appearance order.
pub fn frequencies<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<(Value, usize)> {
    let mut index: HashMap<ValueKey, usize> = HashMap::new();
    let mut out: Vec<(Value, usize)> = Vec::new();
    for v in values {
        if v.is_missing() {
            continue;
        }
        let Some(key) = v.key() else { continue };
        match index.get(&key) {
            Some(&pos) => {
                if let Some(entry) = out.get_mut(pos) {
                    entry.1 += 1;
                }
            }
            None => {
                index.insert(key, out.len());
                out.push((v.clone(), 1));
            }
        }
    }
    out
}

/// Highest counts first; equal counts keep first-appearance order.
pub fn top_n(freqs: &[(Value, usize)], n: usize) -> Vec<(Value, usize)> {
    let mut ranked = freqs.to_vec();
    // sort_by is stable
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);
    ranked
}

pub fn mode(freqs: &[(Value, usize)]) -> Option<Value> {
    top_n(freqs, 1).into_iter().next().map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_rank_indexing() {
        let s = sorted(&[35.0, 25.0, 30.0]);
        assert_eq!(nearest_rank(&s, 0.25), Some(25.0));
        assert_eq!(nearest_rank(&s, 0.5), Some(30.0));
        assert_eq!(nearest_rank(&s, 0.75), Some(35.0));
        assert_eq!(nearest_rank(&[], 0.5), None);
        // floor(4 * 0.5) = 2
        assert_eq!(nearest_rank(&[1.0, 2.0, 3.0, 4.0], 0.5), Some(3.0));
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[1.0]), None);
        let s = sample_std(&[25.0, 30.0, 35.0]).expect("std");
        assert!((s - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_frequencies_first_seen_and_ties() {
        let values = vec![
            Value::from("b"),
            Value::from("a"),
            Value::Null,
            Value::from("a"),
            Value::from("b"),
            Value::from("c"),
        ];
        let freqs = frequencies(&values);
        assert_eq!(
            freqs,
            vec![(Value::from("b"), 2), (Value::from("a"), 2), (Value::from("c"), 1)]
        );
        assert_eq!(mode(&freqs), Some(Value::from("b")));
        assert_eq!(top_n(&freqs, 2).len(), 2);
    }

    #[test]
    fn test_parse_numbers_skips_blank_and_text() {
        let values = vec![Value::from(" 1 "), Value::from(""), Value::from("x"), Value::from(2.5)];
        assert_eq!(parse_numbers(&values), vec![1.0, 2.5]);
    }
}
