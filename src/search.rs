//! Company mail search orchestration.
//!
//! Token → one Gmail query per candidate domain → relevance filter →
//! merged, deduplicated, bounded result. A failed domain query is
//! logged and skipped so the caller gets a partial list; a missing or
//! dead credential propagates as Disconnected so widgets can degrade
//! to "not connected" instead of erroring.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::aggregate::aggregate;
use crate::classify::is_relevant;
use crate::domains;
use crate::error::EngineError;
use crate::google::gmail::{self, EmailMessage, SearchQuery};
use crate::google::token::TokenLifecycleManager;

/// Bound on the merged result list.
pub const RESULT_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct CompanySearchRequest {
    pub company_name: String,
    /// User-entered address or domain; when present it replaces the
    /// resolver-derived domain fan-out.
    pub company_email: Option<String>,
    pub days_back: u32,
    pub only_unread: bool,
}

impl CompanySearchRequest {
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            company_email: None,
            days_back: 30,
            only_unread: false,
        }
    }
}

pub struct MailSearchService {
    tokens: Arc<TokenLifecycleManager>,
}

impl MailSearchService {
    pub fn new(tokens: Arc<TokenLifecycleManager>) -> Self {
        Self { tokens }
    }

    /// Search the user's mailbox for messages from one company.
    pub async fn search_company_mail(
        &self,
        user_id: &str,
        request: &CompanySearchRequest,
    ) -> Result<Vec<EmailMessage>, EngineError> {
        let access_token = self.tokens.get_valid_token(user_id).await?;

        let resolved = domains::resolve(&request.company_name);
        let from_filters: Vec<String> = match &request.company_email {
            Some(address) if !address.is_empty() => vec![address.clone()],
            _ => dedup_preserving_order(&resolved),
        };

        let after = (Utc::now() - Duration::days(request.days_back as i64)).date_naive();

        let mut batches: Vec<Vec<EmailMessage>> = Vec::with_capacity(from_filters.len());
        for from in &from_filters {
            let query = SearchQuery {
                after,
                from: Some(from.clone()),
                company_name: Some(request.company_name.clone()),
                only_unread: request.only_unread,
            };
            match gmail::search_messages(&access_token, &query).await {
                Ok(batch) => batches.push(batch),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    log::warn!("Mail search for domain {from} failed: {e}");
                    continue;
                }
            }
        }

        Ok(filter_and_rank(
            batches,
            &request.company_name,
            &resolved,
            RESULT_CAP,
        ))
    }

    /// Unread count for one company, or the whole mailbox when no
    /// filter is given.
    pub async fn unread_count(
        &self,
        user_id: &str,
        company_name: Option<&str>,
        company_email: Option<&str>,
    ) -> Result<u64, EngineError> {
        let access_token = self.tokens.get_valid_token(user_id).await?;
        gmail::unread_count(&access_token, company_email, company_name).await
    }

    pub async fn mark_as_read(&self, user_id: &str, message_id: &str) -> Result<(), EngineError> {
        let access_token = self.tokens.get_valid_token(user_id).await?;
        gmail::mark_as_read(&access_token, message_id).await
    }
}

/// Pure tail of the pipeline: relevance filter, then merge/dedupe/rank.
fn filter_and_rank(
    batches: Vec<Vec<EmailMessage>>,
    company_name: &str,
    resolved_domains: &[String],
    cap: usize,
) -> Vec<EmailMessage> {
    let filtered: Vec<Vec<EmailMessage>> = batches
        .into_iter()
        .map(|batch| {
            batch
                .into_iter()
                .filter(|m| is_relevant(m, company_name, resolved_domains))
                .collect()
        })
        .collect();
    aggregate(filtered, cap)
}

fn dedup_preserving_order(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|d| seen.insert(d.as_str()))
        .cloned()
        .collect()
}
