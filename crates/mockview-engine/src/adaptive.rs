//! Adaptive difficulty hint.
//!
//! Summarizes the candidate's recent evaluation scores into a short
//! directive appended to the system prompt.

use std::collections::BTreeMap;
use std::fmt::Write;

/// Evaluated questions required before any hint is produced.
const MIN_EVALUATED: usize = 2;

/// Most recent scores considered per summary.
const RECENT_WINDOW: usize = 5;

const STRONG_AVERAGE: f32 = 8.0;
const WEAK_AVERAGE: f32 = 4.0;

/// Builds the hint from `(category, score)` pairs, oldest first.
///
/// Returns an empty string when fewer than two questions have been evaluated.
#[must_use]
pub fn difficulty_hint(scores: &[(&str, f32)]) -> String {
    if scores.len() < MIN_EVALUATED {
        return String::new();
    }

    let recent: Vec<f32> = scores
        .iter()
        .rev()
        .take(RECENT_WINDOW)
        .map(|(_, s)| *s)
        .collect();
    let overall = mean(&recent);

    let mut hint = format!("Recent answers average {overall:.1}/10. ");
    hint.push_str(if overall >= STRONG_AVERAGE {
        "The candidate is doing well: raise the difficulty of the next question."
    } else if overall <= WEAK_AVERAGE {
        "The candidate is struggling: ease the difficulty and probe fundamentals."
    } else {
        "Keep the current difficulty."
    });

    let mut by_category: BTreeMap<&str, Vec<f32>> = BTreeMap::new();
    for (category, score) in scores {
        by_category.entry(*category).or_default().push(*score);
    }

    for (category, values) in by_category {
        if values.len() < MIN_EVALUATED {
            continue;
        }
        let window = &values[values.len().saturating_sub(RECENT_WINDOW)..];
        let average = mean(window);
        let trend = if average >= STRONG_AVERAGE {
            "strong"
        } else if average <= WEAK_AVERAGE {
            "weak"
        } else {
            "steady"
        };
        let _ = write!(hint, "\n- {category}: {trend} ({average:.1}/10)");
    }

    hint
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_evaluations_give_no_hint() {
        assert_eq!(difficulty_hint(&[]), "");
        assert_eq!(difficulty_hint(&[("rust", 9.0)]), "");
    }

    #[test]
    fn high_scores_raise_difficulty() {
        let hint = difficulty_hint(&[("rust", 9.0), ("rust", 8.0)]);
        assert!(hint.contains("raise the difficulty"));
        assert!(hint.contains("- rust: strong (8.5/10)"));
    }

    #[test]
    fn low_scores_ease_difficulty() {
        let hint = difficulty_hint(&[("sql", 2.0), ("react", 3.0)]);
        assert!(hint.contains("ease the difficulty"));
        // Single-sample categories are not summarized.
        assert!(!hint.contains("- sql"));
    }

    #[test]
    fn only_recent_scores_count() {
        let mut scores = vec![("go", 1.0); 5];
        scores.extend(vec![("go", 9.0); 5]);
        let hint = difficulty_hint(&scores);
        assert!(hint.contains("average 9.0/10"));
        assert!(hint.contains("- go: strong (9.0/10)"));
    }

    #[test]
    fn middling_scores_keep_difficulty() {
        let hint = difficulty_hint(&[("rust", 6.0), ("sql", 6.0), ("rust", 5.0)]);
        assert!(hint.contains("Keep the current difficulty"));
        assert!(hint.contains("- rust: steady (5.5/10)"));
    }
}
