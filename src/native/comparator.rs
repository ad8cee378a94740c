use std::borrow::Cow;

use itertools::Itertools;

use crate::core::{
    domain::ComparisonConfig,
    traits::comparator::{Comparator, ComparatorError, Comparison},
};

/// Edit distance is only computed over this many bytes of each side once
/// common leading and trailing bytes are set aside.
pub const SIMILARITY_WINDOW_BYTES: usize = 4096;

/// Byte-level comparator. Similarity is one minus the Levenshtein distance
/// over the longer output's length. Past [`SIMILARITY_WINDOW_BYTES`] of
/// differing bytes the distance is an upper bound, so similarity only ever
/// errs low.
#[derive(Clone, Debug, Default)]
pub struct DiffComparator;

#[async_trait::async_trait]
impl Comparator for DiffComparator {
    async fn compare(
        &self,
        first: &[u8],
        second: &[u8],
        config: &ComparisonConfig,
    ) -> Result<Comparison, ComparatorError> {
        let first = normalize(first, config);
        let second = normalize(second, config);

        if first == second {
            return Ok(Comparison {
                outputs_differ: false,
                similarity: 1.0,
            });
        }

        // Quadratic in the window, keep it off the async workers.
        let (first, second) = (first.into_owned(), second.into_owned());
        let similarity = tokio::task::spawn_blocking(move || similarity(&first, &second))
            .await
            .map_err(|e| ComparatorError {
                reason: e.to_string(),
            })?;

        Ok(Comparison {
            outputs_differ: true,
            similarity,
        })
    }
}

fn normalize<'a>(output: &'a [u8], config: &ComparisonConfig) -> Cow<'a, [u8]> {
    if config.is_exact() {
        return Cow::Borrowed(output);
    }

    let text = String::from_utf8_lossy(output);
    let normalized = text
        .lines()
        .map(|line| {
            if config.ignore_trailing_whitespace {
                line.trim_end()
            } else {
                line
            }
        })
        .filter(|line| !(config.ignore_blank_lines && line.trim().is_empty()))
        .map(|line| {
            if config.ignore_case {
                Cow::Owned(line.to_lowercase())
            } else {
                Cow::Borrowed(line)
            }
        })
        .join("\n");

    Cow::Owned(normalized.into_bytes())
}

fn similarity(first: &[u8], second: &[u8]) -> f64 {
    let longest = first.len().max(second.len());
    if longest == 0 {
        return 1.0;
    }
    (1.0 - edit_distance(first, second) as f64 / longest as f64).clamp(0.0, 1.0)
}

/// Exact Levenshtein distance while the differing middles fit in the window.
/// Beyond it, whatever follows the windows is charged as fully rewritten.
fn edit_distance(first: &[u8], second: &[u8]) -> usize {
    let prefix = first
        .iter()
        .zip(second)
        .take_while(|(a, b)| a == b)
        .count();
    let (first, second) = (&first[prefix..], &second[prefix..]);
    let suffix = first
        .iter()
        .rev()
        .zip(second.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let first = &first[..first.len() - suffix];
    let second = &second[..second.len() - suffix];

    let first_window = &first[..first.len().min(SIMILARITY_WINDOW_BYTES)];
    let second_window = &second[..second.len().min(SIMILARITY_WINDOW_BYTES)];
    let rest = (first.len() - first_window.len()).max(second.len() - second_window.len());

    triple_accel::levenshtein(first_window, second_window) as usize + rest
}
