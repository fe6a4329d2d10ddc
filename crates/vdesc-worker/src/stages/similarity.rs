//! Smoothed sentence-BLEU used to group near-duplicate captions.
//!
//! The score is the average of the cumulative 1- to 4-gram BLEU scores
//! with add-epsilon smoothing for zero precisions, matching the usual
//! smoothing-method-1 behavior closely enough for grouping.

use std::collections::HashMap;

const SMOOTHING_EPSILON: f64 = 0.1;

/// Average of cumulative BLEU-1..BLEU-4 of `candidate` against the
/// references. Symmetric callers take the max of both directions.
pub fn sentence_bleu(candidate: &str, references: &[&str]) -> f64 {
    let cand: Vec<&str> = candidate.split_whitespace().collect();
    let refs: Vec<Vec<&str>> = references
        .iter()
        .map(|r| r.split_whitespace().collect())
        .collect();

    if cand.is_empty() || refs.iter().all(|r| r.is_empty()) {
        return 0.0;
    }

    let bp = brevity_penalty(&cand, &refs);
    let precisions: Vec<f64> = (1..=4).map(|n| modified_precision(&cand, &refs, n)).collect();

    let cumulative = |n: usize| -> f64 {
        let log_sum: f64 = precisions[..n]
            .iter()
            .map(|p| if *p > 0.0 { p.ln() } else { f64::NEG_INFINITY })
            .sum::<f64>()
            / n as f64;
        if log_sum.is_finite() {
            bp * log_sum.exp()
        } else {
            0.0
        }
    };

    (cumulative(1) + cumulative(2) + cumulative(3) + cumulative(4)) / 4.0
}

/// Pairwise caption similarity: max of BLEU in both directions.
pub fn caption_similarity(a: &str, b: &str) -> f64 {
    sentence_bleu(a, &[b]).max(sentence_bleu(b, &[a]))
}

fn ngrams<'a>(tokens: &[&'a str], n: usize) -> HashMap<Vec<&'a str>, usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window.to_vec()).or_insert(0) += 1;
        }
    }
    counts
}

/// Modified n-gram precision: candidate n-gram counts clipped by the
/// maximum reference count, smoothed when no n-gram matches.
fn modified_precision(cand: &[&str], refs: &[Vec<&str>], n: usize) -> f64 {
    let cand_counts = ngrams(cand, n);
    let total: usize = cand_counts.values().sum();
    if total == 0 {
        return 0.0;
    }

    let mut matched = 0usize;
    for (gram, count) in &cand_counts {
        let max_ref = refs
            .iter()
            .map(|r| ngrams(r, n).get(gram).copied().unwrap_or(0))
            .max()
            .unwrap_or(0);
        matched += (*count).min(max_ref);
    }

    if matched == 0 {
        SMOOTHING_EPSILON / total as f64
    } else {
        matched as f64 / total as f64
    }
}

fn brevity_penalty(cand: &[&str], refs: &[Vec<&str>]) -> f64 {
    let c = cand.len() as f64;
    // Closest reference length
    let r = refs
        .iter()
        .map(|r| r.len())
        .min_by_key(|len| (*len as i64 - cand.len() as i64).abs())
        .unwrap_or(0) as f64;

    if c >= r || c == 0.0 {
        1.0
    } else {
        (1.0 - r / c).exp()
    }
}
