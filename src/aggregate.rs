//! Merge per-domain search results into one bounded, ordered list.
//!
//! A message reachable through two domain queries (e.g. rakuten.co.jp
//! and rakuten.com) must appear once. Pure transformation over
//! already-fetched data; no network access.

use std::collections::HashSet;

use crate::google::gmail::EmailMessage;

/// Flatten, dedupe by message id (first-seen copy wins), sort newest
/// first with id as the deterministic tie-break, and truncate to `cap`.
pub fn aggregate(per_domain: Vec<Vec<EmailMessage>>, cap: usize) -> Vec<EmailMessage> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<EmailMessage> = Vec::new();

    for batch in per_domain {
        for message in batch {
            if seen.insert(message.id.clone()) {
                merged.push(message);
            }
        }
    }

    merged.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.truncate(cap);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, timestamp: i64) -> EmailMessage {
        EmailMessage {
            id: id.to_string(),
            thread_id: format!("t-{id}"),
            subject: String::new(),
            from: String::new(),
            date: String::new(),
            snippet: String::new(),
            is_unread: false,
            timestamp,
        }
    }

    #[test]
    fn test_dedupes_across_domain_batches() {
        let out = aggregate(
            vec![
                vec![msg("m1", 100), msg("m2", 200)],
                vec![msg("m1", 100), msg("m3", 300)],
            ],
            50,
        );
        let ids: Vec<&str> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.iter().filter(|id| **id == "m1").count(), 1);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_first_seen_copy_wins() {
        let mut first = msg("m1", 100);
        first.subject = "first".to_string();
        let mut second = msg("m1", 100);
        second.subject = "second".to_string();

        let out = aggregate(vec![vec![first], vec![second]], 50);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].subject, "first");
    }

    #[test]
    fn test_sorted_newest_first() {
        let out = aggregate(vec![vec![msg("a", 100), msg("b", 300), msg("c", 200)]], 50);
        let stamps: Vec<i64> = out.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
    }

    #[test]
    fn test_timestamp_ties_break_by_id_ascending() {
        let out = aggregate(vec![vec![msg("z", 100), msg("a", 100), msg("m", 100)]], 50);
        let ids: Vec<&str> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_truncates_to_cap() {
        let batch: Vec<EmailMessage> = (0..60).map(|i| msg(&format!("m{i:02}"), i)).collect();
        let out = aggregate(vec![batch], 50);
        assert_eq!(out.len(), 50);
        // The 50 newest survive
        assert_eq!(out[0].timestamp, 59);
        assert_eq!(out[49].timestamp, 10);
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(vec![], 50).is_empty());
        assert!(aggregate(vec![vec![], vec![]], 50).is_empty());
    }
}
