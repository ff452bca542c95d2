//! Ordered question sequence construction.
//!
//! Merges the job-specific (primary) prompts with an optional secondary set
//! so the secondary prompts are spread evenly through the interview instead
//! of being bunched at either end.

use crate::models::question::{Question, QuestionSource};

/// Merge `primary` and `secondary` into one ordered sequence.
///
/// Secondary item `j` (zero-based) is placed right after the
/// `floor((j + 1) * P / S)`-th primary item, so the number of primary items
/// between two consecutive secondary items is always `floor(P/S)` or
/// `ceil(P/S)`. When `S <= P` no two secondary items are adjacent. Primary
/// order is preserved and the function is pure.
#[must_use]
pub fn merge(primary: &[String], secondary: &[String]) -> Vec<Question> {
    let p = primary.len();
    let s = secondary.len();
    let mut merged = Vec::with_capacity(p + s);

    if s == 0 {
        push_all(&mut merged, primary, QuestionSource::Primary);
        return merged;
    }
    if p == 0 {
        push_all(&mut merged, secondary, QuestionSource::Secondary);
        return merged;
    }

    let mut pending = secondary.iter().enumerate().peekable();
    for placed in 0..=p {
        if placed > 0 {
            push(&mut merged, &primary[placed - 1], QuestionSource::Primary);
        }
        while let Some((_, text)) = pending.next_if(|(j, _)| anchor(*j, p, s) == placed) {
            push(&mut merged, text, QuestionSource::Secondary);
        }
    }

    merged
}

/// Number of primary items that precede secondary item `j`.
fn anchor(j: usize, p: usize, s: usize) -> usize {
    (j + 1) * p / s
}

fn push_all(merged: &mut Vec<Question>, texts: &[String], source_set: QuestionSource) {
    for text in texts {
        push(merged, text, source_set);
    }
}

fn push(merged: &mut Vec<Question>, text: &str, source_set: QuestionSource) {
    let sequence_index = u32::try_from(merged.len()).unwrap_or(u32::MAX);
    merged.push(Question {
        text: text.to_owned(),
        sequence_index,
        source_set,
    });
}
