//! Picks the harvested address that best matches the subject's name.

use crate::models::EmailCandidateSet;

/// Lowercases and drops every character outside `[a-z0-9]`.
pub(crate) fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Levenshtein distance with unit costs for insert, delete and substitute.
pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    // Single rolling row of the classic dp table.
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            let next = (row[j + 1] + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

/// Returns the candidate whose normalized local-part is closest to the
/// normalized identifier, or an empty string when there are no candidates.
///
/// There is no distance cutoff. Ties go to the lexicographically smallest
/// address, which is the first one the ordered set yields.
pub(crate) fn select_best(identifier: &str, candidates: &EmailCandidateSet) -> String {
    let target = normalize(identifier);
    let mut best: Option<(usize, &String)> = None;

    for email in candidates {
        let local_part = email.split('@').next().unwrap_or("");
        let distance = edit_distance(&target, &normalize(local_part));
        tracing::debug!(target: "select_task", "Candidate {} scored distance {}", email, distance);
        if best.is_none_or(|(best_distance, _)| distance < best_distance) {
            best = Some((distance, email));
        }
    }

    best.map(|(_, email)| email.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> EmailCandidateSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_idempotent() {
        for s in ["Jane Doe + MIT", "Ünïcode Näme", "j.doe-42", "", "ALLCAPS"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
        assert_eq!(normalize("Jane Doe + MIT"), "janedoemit");
    }

    #[test]
    fn test_edit_distance_basics() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("abc", ""), 3);
        assert_eq!(edit_distance("janedoe", "janedoe"), 0);
        assert_eq!(edit_distance("flaw", "lawn"), 2);
    }

    #[test]
    fn test_edit_distance_symmetric() {
        let words = ["janedoe", "jdoe", "doej", "", "x", "jane.doe"];
        for a in words {
            for b in words {
                assert_eq!(edit_distance(a, b), edit_distance(b, a), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_select_prefers_closest_local_part() {
        let candidates = set(&["jane.doe@x.com", "jdoe@x.com"]);
        assert_eq!(select_best("Jane Doe", &candidates), "jane.doe@x.com");
    }

    #[test]
    fn test_select_empty_candidates() {
        assert_eq!(select_best("Jane Doe", &EmailCandidateSet::new()), "");
    }

    #[test]
    fn test_select_without_threshold() {
        let candidates = set(&["office@lab.org"]);
        assert_eq!(select_best("Jane Doe", &candidates), "office@lab.org");
    }

    #[test]
    fn test_select_tie_goes_to_lexicographically_smallest() {
        // "janedoe" vs "janedoa" and "janedoz": both distance 1.
        let candidates = set(&["jane.doz@b.org", "jane.doa@a.org"]);
        assert_eq!(select_best("Jane Doe", &candidates), "jane.doa@a.org");
    }
}
