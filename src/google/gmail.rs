//! Gmail API v1 — company mail search.
//!
//! Query clauses follow Gmail search syntax: `after:<YYYY/MM/DD>`,
//! `from:` (a domain gets an `@` prefix, a full address is used as-is),
//! a quoted company-name term, and optionally `is:unread`, joined with
//! spaces (AND semantics). The list call returns message ids; one
//! follow-up fetch per id retrieves headers, snippet and labels.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{send_with_retry, RetryPolicy};
use crate::error::EngineError;

/// Page size for the message list call.
pub const MAX_RESULTS: u32 = 50;

const MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    result_size_estimate: u64,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    label_ids: Vec<String>,
    /// Milliseconds since epoch, as a string.
    #[serde(default)]
    internal_date: String,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

// ============================================================================
// Public types
// ============================================================================

/// One mailbox message, as consumed by the classifier and aggregator.
/// `id` is unique per mailbox and is the dedup key across overlapping
/// domain queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub snippet: String,
    pub is_unread: bool,
    /// Seconds since epoch.
    pub timestamp: i64,
}

/// A Gmail search filter. `from` may be a bare domain or a full address.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub after: NaiveDate,
    pub from: Option<String>,
    pub company_name: Option<String>,
    pub only_unread: bool,
}

impl SearchQuery {
    /// Render the query string Gmail expects.
    pub fn to_query_string(&self) -> String {
        let mut parts = vec![format!("after:{}", self.after.format("%Y/%m/%d"))];

        if let Some(from) = &self.from {
            if from.contains('@') {
                parts.push(format!("from:{from}"));
            } else {
                parts.push(format!("from:@{from}"));
            }
        }

        if let Some(name) = &self.company_name {
            if !name.is_empty() {
                parts.push(format!("\"{name}\""));
            }
        }

        if self.only_unread {
            parts.push("is:unread".to_string());
        }

        parts.join(" ")
    }
}

// ============================================================================
// Gmail API
// ============================================================================

/// Search the mailbox and fetch each matching message.
///
/// Individual message fetch failures are logged and skipped; the caller
/// gets a partial result rather than an error.
pub async fn search_messages(
    access_token: &str,
    query: &SearchQuery,
) -> Result<Vec<EmailMessage>, EngineError> {
    let client = super::http_client()?;

    let resp = send_with_retry(
        client
            .get(MESSAGES_URL)
            .bearer_auth(access_token)
            .query(&[
                ("q", query.to_query_string().as_str()),
                ("maxResults", &MAX_RESULTS.to_string()),
            ]),
        &RetryPolicy::default(),
    )
    .await?;

    let list: MessageListResponse = check_response(resp).await?.json().await?;

    let mut messages = Vec::with_capacity(list.messages.len());
    for stub in &list.messages {
        match fetch_message(&client, access_token, &stub.id).await {
            Ok(message) => messages.push(message),
            Err(e) => {
                log::debug!("Skipping message {}: {}", stub.id, e);
                continue;
            }
        }
    }

    Ok(messages)
}

/// Fetch one message and parse it into an `EmailMessage`.
async fn fetch_message(
    client: &reqwest::Client,
    access_token: &str,
    message_id: &str,
) -> Result<EmailMessage, EngineError> {
    let url = format!("{MESSAGES_URL}/{message_id}");
    let resp = send_with_retry(
        client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("format", "full")]),
        &RetryPolicy::default(),
    )
    .await?;

    let detail: MessageDetail = check_response(resp).await?.json().await?;
    Ok(parse_message(detail))
}

fn parse_message(detail: MessageDetail) -> EmailMessage {
    let headers = detail
        .payload
        .as_ref()
        .map(|p| &p.headers[..])
        .unwrap_or(&[]);

    let get_header = |name: &str| -> String {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };

    EmailMessage {
        subject: get_header("Subject"),
        from: get_header("From"),
        date: get_header("Date"),
        is_unread: detail.label_ids.iter().any(|l| l == "UNREAD"),
        // internalDate is milliseconds since epoch
        timestamp: detail.internal_date.parse::<i64>().unwrap_or(0) / 1000,
        id: detail.id,
        thread_id: detail.thread_id,
        snippet: detail.snippet,
    }
}

/// Count unread messages matching the filter (resultSizeEstimate).
pub async fn unread_count(
    access_token: &str,
    from: Option<&str>,
    company_name: Option<&str>,
) -> Result<u64, EngineError> {
    let mut parts = vec!["is:unread".to_string()];
    if let Some(from) = from {
        if from.contains('@') {
            parts.push(format!("from:{from}"));
        } else {
            parts.push(format!("from:@{from}"));
        }
    }
    if let Some(name) = company_name {
        if !name.is_empty() {
            parts.push(format!("\"{name}\""));
        }
    }

    let client = super::http_client()?;
    let resp = send_with_retry(
        client
            .get(MESSAGES_URL)
            .bearer_auth(access_token)
            .query(&[("q", parts.join(" ").as_str())]),
        &RetryPolicy::default(),
    )
    .await?;

    let list: MessageListResponse = check_response(resp).await?.json().await?;
    Ok(list.result_size_estimate)
}

/// Remove the UNREAD label from one message.
pub async fn mark_as_read(access_token: &str, message_id: &str) -> Result<(), EngineError> {
    let client = super::http_client()?;
    let body = serde_json::json!({ "removeLabelIds": ["UNREAD"] });
    let resp = send_with_retry(
        client
            .post(format!("{MESSAGES_URL}/{message_id}/modify"))
            .bearer_auth(access_token)
            .json(&body),
        &RetryPolicy::default(),
    )
    .await?;

    check_response(resp).await?;
    Ok(())
}

/// Map a non-success response to the engine's error taxonomy.
/// 401 means the token was revoked out from under us.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(EngineError::Disconnected);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(EngineError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(from: Option<&str>, company: Option<&str>, unread: bool) -> SearchQuery {
        SearchQuery {
            after: NaiveDate::from_ymd_opt(2026, 7, 24).unwrap(),
            from: from.map(String::from),
            company_name: company.map(String::from),
            only_unread: unread,
        }
    }

    #[test]
    fn test_query_domain_gets_at_prefix() {
        let q = query(Some("cyberagent.co.jp"), None, false);
        assert_eq!(q.to_query_string(), "after:2026/07/24 from:@cyberagent.co.jp");
    }

    #[test]
    fn test_query_full_address_used_verbatim() {
        let q = query(Some("recruit@cyberagent.co.jp"), None, false);
        assert_eq!(
            q.to_query_string(),
            "after:2026/07/24 from:recruit@cyberagent.co.jp"
        );
    }

    #[test]
    fn test_query_company_name_is_quoted() {
        let q = query(None, Some("サイバーエージェント"), false);
        assert_eq!(
            q.to_query_string(),
            "after:2026/07/24 \"サイバーエージェント\""
        );
    }

    #[test]
    fn test_query_all_clauses_joined_with_spaces() {
        let q = query(Some("mercari.com"), Some("メルカリ"), true);
        assert_eq!(
            q.to_query_string(),
            "after:2026/07/24 from:@mercari.com \"メルカリ\" is:unread"
        );
    }

    #[test]
    fn test_query_empty_company_name_omitted() {
        let q = query(Some("mercari.com"), Some(""), false);
        assert_eq!(q.to_query_string(), "after:2026/07/24 from:@mercari.com");
    }

    #[test]
    fn test_message_list_deserialization() {
        let json = r#"{
            "messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t2"}],
            "resultSizeEstimate": 2
        }"#;
        let resp: MessageListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.messages.len(), 2);
        assert_eq!(resp.messages[0].id, "m1");
        assert_eq!(resp.result_size_estimate, 2);
    }

    #[test]
    fn test_message_list_empty() {
        let json = r#"{"resultSizeEstimate": 0}"#;
        let resp: MessageListResponse = serde_json::from_str(json).unwrap();
        assert!(resp.messages.is_empty());
    }

    #[test]
    fn test_parse_message_extracts_fields() {
        let json = r#"{
            "id": "m1",
            "threadId": "t1",
            "snippet": "面接のご案内です",
            "labelIds": ["INBOX", "UNREAD"],
            "internalDate": "1756000000000",
            "payload": {
                "headers": [
                    {"name": "Subject", "value": "Re: 一次面接について"},
                    {"name": "From", "value": "採用担当 <recruit@cyberagent.co.jp>"},
                    {"name": "Date", "value": "Mon, 24 Aug 2026 09:00:00 +0900"}
                ]
            }
        }"#;
        let detail: MessageDetail = serde_json::from_str(json).unwrap();
        let message = parse_message(detail);

        assert_eq!(message.id, "m1");
        assert_eq!(message.subject, "Re: 一次面接について");
        assert!(message.from.contains("cyberagent.co.jp"));
        assert!(message.is_unread);
        // internalDate milliseconds are converted to seconds
        assert_eq!(message.timestamp, 1_756_000_000);
    }

    #[test]
    fn test_parse_message_without_payload() {
        let json = r#"{"id": "m2", "threadId": "t2", "snippet": ""}"#;
        let detail: MessageDetail = serde_json::from_str(json).unwrap();
        let message = parse_message(detail);
        assert_eq!(message.subject, "");
        assert_eq!(message.timestamp, 0);
        assert!(!message.is_unread);
    }
}
