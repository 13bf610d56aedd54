//! "Is this message from that company?" classification.
//!
//! Three independent signals, any one of which is enough:
//!   - sender address carries a resolved company domain
//!   - sender address contains the normalized company name
//!   - subject carries a reply marker
//!
//! The reply-marker catch-all is deliberate: recruiters answer from ATS
//! vendors and personal aliases that match no heuristic domain, and a
//! reply in an existing thread is still actionable.

use crate::google::gmail::EmailMessage;

/// Reply markers recognized in subjects. "re:" is matched
/// case-insensitively; the Japanese markers are matched verbatim.
const REPLY_MARKERS_JA: &[&str] = &["返信", "回答"];

/// Decide whether a fetched message belongs to the company's
/// correspondence. Pure; operates on already-fetched data only.
pub fn is_relevant(message: &EmailMessage, company_name: &str, domains: &[String]) -> bool {
    if from_matches_domain(&message.from, domains) {
        return true;
    }
    if from_contains_company(&message.from, company_name) {
        return true;
    }
    subject_is_reply(&message.subject)
}

fn from_matches_domain(from: &str, domains: &[String]) -> bool {
    domains
        .iter()
        .any(|domain| from.contains(&format!("@{domain}")))
}

fn from_contains_company(from: &str, company_name: &str) -> bool {
    let company = normalize(company_name);
    if company.is_empty() {
        return false;
    }
    normalize(from).contains(&company)
}

fn subject_is_reply(subject: &str) -> bool {
    if subject.to_lowercase().contains("re:") {
        return true;
    }
    REPLY_MARKERS_JA.iter().any(|m| subject.contains(m))
}

/// Lowercase and strip all whitespace.
fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str, subject: &str) -> EmailMessage {
        EmailMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            subject: subject.to_string(),
            from: from.to_string(),
            date: String::new(),
            snippet: String::new(),
            is_unread: true,
            timestamp: 0,
        }
    }

    #[test]
    fn test_domain_match_regardless_of_subject() {
        let msg = message("採用担当 <no-reply@cyberagent.co.jp>", "選考結果のお知らせ");
        let domains = vec!["cyberagent.co.jp".to_string(), "ca-base.jp".to_string()];
        assert!(is_relevant(&msg, "サイバーエージェント", &domains));
    }

    #[test]
    fn test_reply_marker_regardless_of_sender_domain() {
        let msg = message("someone@random-ats.example", "Re: Interview");
        assert!(is_relevant(&msg, "サイバーエージェント", &[]));
    }

    #[test]
    fn test_reply_marker_case_insensitive() {
        let msg = message("x@y.example", "RE: 面接日程について");
        assert!(is_relevant(&msg, "どこか", &[]));
    }

    #[test]
    fn test_japanese_reply_markers() {
        for subject in ["【返信】日程調整の件", "ご質問への回答"] {
            let msg = message("x@y.example", subject);
            assert!(is_relevant(&msg, "どこか", &[]), "subject: {subject}");
        }
    }

    #[test]
    fn test_company_name_in_from_address() {
        let msg = message("Mercari Recruiting <jobs@hire-platform.example>", "ご案内");
        assert!(is_relevant(&msg, "Mercari", &[]));
    }

    #[test]
    fn test_company_name_normalized_before_match() {
        // Whitespace in the configured name must not defeat the match.
        let msg = message("acmecorp-hr@mail.example", "説明会のご案内");
        assert!(is_relevant(&msg, "Acme Corp", &[]));
    }

    #[test]
    fn test_unrelated_message_is_not_relevant() {
        let msg = message("newsletter@shopping.example", "今週のセール");
        let domains = vec!["cyberagent.co.jp".to_string()];
        assert!(!is_relevant(&msg, "サイバーエージェント", &domains));
    }

    #[test]
    fn test_empty_company_name_does_not_match_everything() {
        let msg = message("anyone@anywhere.example", "お知らせ");
        assert!(!is_relevant(&msg, "", &[]));
    }
}
