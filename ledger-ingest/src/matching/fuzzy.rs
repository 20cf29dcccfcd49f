//! Weighted-ratio similarity for the approximate-match tier
//!
//! Combines plain, partial and token-based ratios the way the usual
//! "WRatio" scorer does, on top of an Indel (insert/delete only) similarity.
//! A transposition costs two edits but keeps all but one character in the
//! common subsequence. Scores are on a 0-100 scale.

use std::collections::BTreeSet;

const UNBASE_SCALE: f64 = 0.95;

/// Length of the longest common subsequence, by chars
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut diagonal = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Plain similarity, `2 * LCS / (len_a + len_b)` scaled to 0-100
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    2.0 * lcs_len(&a, &b) as f64 / total as f64 * 100.0
}

/// Best [`ratio`] of the shorter string against every equal-length window
/// of the longer one
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = shorter.chars().count();
    if short_len == 0 {
        return 0.0;
    }
    let long_chars: Vec<char> = longer.chars().collect();
    if short_len == long_chars.len() {
        return ratio(shorter, longer);
    }

    let mut best: f64 = 0.0;
    for window in long_chars.windows(short_len) {
        let candidate: String = window.iter().collect();
        best = best.max(ratio(shorter, &candidate));
        if best >= 100.0 {
            break;
        }
    }
    best
}

fn tokens(text: &str) -> BTreeSet<&str> {
    text.split_whitespace().collect()
}

fn sorted_tokens(text: &str) -> String {
    let mut words: Vec<&str> = text.split_whitespace().collect();
    words.sort_unstable();
    words.join(" ")
}

/// [`ratio`] after sorting whitespace tokens
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Ratio over the shared token set and each side's remainder
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    let shared: Vec<&str> = ta.intersection(&tb).copied().collect();
    let only_a: Vec<&str> = ta.difference(&tb).copied().collect();
    let only_b: Vec<&str> = tb.difference(&ta).copied().collect();

    if !shared.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let base = shared.join(" ");
    let join = |rest: &[&str]| {
        if base.is_empty() {
            rest.join(" ")
        } else if rest.is_empty() {
            base.clone()
        } else {
            format!("{} {}", base, rest.join(" "))
        }
    };
    let with_a = join(&only_a);
    let with_b = join(&only_b);

    ratio(&base, &with_a)
        .max(ratio(&base, &with_b))
        .max(ratio(&with_a, &with_b))
}

fn partial_token_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.intersection(&tb).next().is_some() {
        return 100.0;
    }
    partial_ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Weighted ratio: picks the strategy by the length ratio of the inputs
pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    let len_ratio = len_a.max(len_b) as f64 / len_a.min(len_b) as f64;
    let plain = ratio(a, b);

    if len_ratio < 1.5 {
        let token = token_sort_ratio(a, b).max(token_set_ratio(a, b));
        return plain.max(token * UNBASE_SCALE);
    }

    let partial_scale = if len_ratio < 8.0 { 0.9 } else { 0.6 };
    plain
        .max(partial_ratio(a, b) * partial_scale)
        .max(partial_token_ratio(a, b) * UNBASE_SCALE * partial_scale)
}

/// Index and score of the best choice scoring at least `cutoff`
///
/// Ties keep the earliest choice.
pub fn best_match<'a, I>(query: &str, choices: I, cutoff: f64) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, f64)> = None;
    for (index, choice) in choices.into_iter().enumerate() {
        let score = weighted_ratio(query, choice);
        if score < cutoff {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best
}
