//! Pure operations over ordered text lines.

use crate::data_structures::{Row, SplitPolicy};
use crate::error::{FileBotError, Result};
use std::collections::HashSet;

/// Trims every line, drops the blank ones and removes duplicates, keeping
/// the first occurrence of each line in place.
pub fn normalize<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .iter()
        .map(|line| line.as_ref().trim())
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

/// Trims and drops blank lines without deduplicating.
pub fn compact<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line.as_ref().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn split<S: AsRef<str>>(lines: &[S], policy: SplitPolicy) -> Result<Vec<Vec<String>>> {
    if policy.size() == 0 {
        return Err(FileBotError::InvalidSplitPolicy(0));
    }

    let lines = non_empty(normalize(lines))?;

    let groups = match policy {
        SplitPolicy::ByCount(n) => split_evenly(lines, n),
        SplitPolicy::ByLines(k) => lines.chunks(k).map(<[String]>::to_vec).collect(),
    };
    Ok(groups)
}

// More parts than lines would leave empty parts, so the count is capped.
fn split_evenly(lines: Vec<String>, parts: usize) -> Vec<Vec<String>> {
    let parts = parts.min(lines.len());
    let base = lines.len() / parts;
    let remainder = lines.len() % parts;

    let mut groups = Vec::with_capacity(parts);
    let mut iter = lines.into_iter();
    for index in 0..parts {
        let size = if index < remainder { base + 1 } else { base };
        groups.push(iter.by_ref().take(size).collect());
    }
    groups
}

/// Concatenates the inputs in the order given, then normalizes.
pub fn merge(inputs: &[Vec<String>]) -> Result<Vec<String>> {
    let combined: Vec<&str> = inputs.iter().flatten().map(String::as_str).collect();
    non_empty(normalize(&combined))
}

pub fn tabularize<S: AsRef<str>>(lines: &[S]) -> Vec<Row> {
    lines
        .iter()
        .map(|line| vec![line.as_ref().to_string()])
        .collect()
}

/// Reads the first column. A row without cells reads as an empty line.
pub fn detabularize(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|row| row.first().cloned().unwrap_or_default())
        .collect()
}

/// Packs lines into messages of at most `limit` characters, one line per
/// row. A single line longer than the limit is cut across messages.
pub fn pack_messages<S: AsRef<str>>(lines: &[S], limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut messages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in lines {
        let line = line.as_ref();
        let line_len = line.chars().count();

        if line_len > limit {
            if !current.is_empty() {
                messages.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                messages.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + needed > limit {
            messages.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        messages.push(current);
    }
    messages
}

fn non_empty(lines: Vec<String>) -> Result<Vec<String>> {
    if lines.is_empty() {
        Err(FileBotError::EmptyInput)
    } else {
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_keeps_first_occurrence() {
        assert_eq!(normalize(&["b", "a", "b", "c", "a"]), strings(&["b", "a", "c"]));
    }

    #[test]
    fn test_normalize_trims_and_drops_blank() {
        assert_eq!(normalize(&["  a ", "", "   ", "a", "b\t"]), strings(&["a", "b"]));
    }

    #[test]
    fn test_split_by_count_distributes_remainder_first() {
        let lines = strings(&["1", "2", "3", "4", "5", "6", "7"]);
        let groups = split(&lines, SplitPolicy::ByCount(3)).unwrap();
        assert_eq!(
            groups,
            vec![strings(&["1", "2", "3"]), strings(&["4", "5"]), strings(&["6", "7"])]
        );
    }

    #[test]
    fn test_split_by_count_caps_at_line_count() {
        let groups = split(&["a", "b"], SplitPolicy::ByCount(5)).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_split_by_lines() {
        let groups = split(&["a", "b", "c", "d", "e"], SplitPolicy::ByLines(2)).unwrap();
        assert_eq!(
            groups,
            vec![strings(&["a", "b"]), strings(&["c", "d"]), strings(&["e"])]
        );
    }

    #[test]
    fn test_split_rejects_zero_and_empty() {
        assert_eq!(
            split(&["a"], SplitPolicy::ByLines(0)),
            Err(FileBotError::InvalidSplitPolicy(0))
        );
        assert_eq!(
            split(&["", "  "], SplitPolicy::ByCount(2)),
            Err(FileBotError::EmptyInput)
        );
    }

    #[test]
    fn test_merge_keeps_input_order() {
        let merged = merge(&[strings(&["x", "y"]), strings(&["y", "a", "x", "b"])]).unwrap();
        assert_eq!(merged, strings(&["x", "y", "a", "b"]));

        let reversed = merge(&[strings(&["y", "a", "x", "b"]), strings(&["x", "y"])]).unwrap();
        assert_eq!(reversed, strings(&["y", "a", "x", "b"]));
    }

    #[test]
    fn test_merge_of_blank_inputs_is_empty_error() {
        assert_eq!(merge(&[strings(&[""]), vec![]]), Err(FileBotError::EmptyInput));
    }

    #[test]
    fn test_detabularize_reads_first_column() {
        let rows = vec![strings(&["a", "ignored"]), vec![], strings(&["c"])];
        assert_eq!(detabularize(&rows), strings(&["a", "", "c"]));
    }

    #[test]
    fn test_pack_messages_respects_limit() {
        let messages = pack_messages(&["aaaa", "bbbb", "cc"], 9);
        assert_eq!(messages, strings(&["aaaa\nbbbb", "cc"]));

        let cut = pack_messages(&["abcdefg"], 3);
        assert_eq!(cut, strings(&["abc", "def", "g"]));
        assert!(pack_messages::<&str>(&[], 10).is_empty());
    }

    #[test]
    fn test_compact_keeps_duplicates() {
        assert_eq!(compact(&[" a", "", "a"]), strings(&["a", "a"]));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(lines in prop::collection::vec("[ab ]{0,3}", 0..24)) {
            let once = normalize(&lines);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn split_by_count_reassembles(lines in prop::collection::vec("[a-e]{1,2}", 1..40), n in 1usize..8) {
            let normalized = normalize(&lines);
            let n = n.min(normalized.len());
            let groups = split(&lines, SplitPolicy::ByCount(n)).unwrap();
            prop_assert_eq!(groups.len(), n);
            let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
            prop_assert!(sizes.windows(2).all(|w| w[0] >= w[1] && w[0] - w[1] <= 1));
            prop_assert_eq!(groups.concat(), normalized);
        }

        #[test]
        fn split_by_lines_bounds_group_size(lines in prop::collection::vec("[a-z]{1,3}", 1..40), k in 1usize..10) {
            let groups = split(&lines, SplitPolicy::ByLines(k)).unwrap();
            prop_assert!(groups.iter().all(|g| !g.is_empty() && g.len() <= k));
            prop_assert_eq!(groups.concat(), normalize(&lines));
        }

        #[test]
        fn merge_equals_normalized_concat(
            first in prop::collection::vec("[a-d ]{0,2}", 0..12),
            second in prop::collection::vec("[a-d ]{0,2}", 0..12),
        ) {
            let expected = normalize(&[first.clone(), second.clone()].concat());
            match merge(&[first, second]) {
                Ok(merged) => prop_assert_eq!(merged, expected),
                Err(err) => {
                    prop_assert_eq!(err, FileBotError::EmptyInput);
                    prop_assert!(expected.is_empty());
                }
            }
        }

        #[test]
        fn tabularize_round_trips(lines in prop::collection::vec("[^\n]{0,8}", 0..16)) {
            prop_assert_eq!(detabularize(&tabularize(&lines)), lines);
        }

        #[test]
        fn packed_messages_fit_and_preserve_text(lines in prop::collection::vec("[a-z]{1,12}", 0..30), limit in 12usize..40) {
            let messages = pack_messages(&lines, limit);
            prop_assert!(messages.iter().all(|m| m.chars().count() <= limit));
            prop_assert_eq!(messages.join("\n"), lines.join("\n"));
        }
    }
}
