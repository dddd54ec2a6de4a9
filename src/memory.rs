//! In-memory backend
//!
//! Implements every collaborator trait over plain collections, with switches
//! to make individual operations fail. Used by the test suites and handy for
//! dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

use expiry_countdown_push::{BatchResponse, MulticastMessage, PushError, SendError, SendResponse};
use expiry_countdown_store::{ItemRecord, NotificationDocument};

use crate::dispatch::PushTransport;
use crate::error::{Error, Result};
use crate::membership::MemberDirectory;
use crate::notifications::NotificationRecords;
use crate::scanner::ItemSource;
use crate::tokens::TokenStore;

#[derive(Debug, Default)]
struct Failures {
    range_query: bool,
    fallback_query: bool,
    member_lookups: HashSet<String>,
    token_deletes: bool,
    notification_writes: bool,
    notification_writes_to: HashSet<String>,
    push: bool,
    push_after: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    items: Vec<ItemRecord>,
    members: BTreeMap<String, Vec<String>>,
    collection_tokens: BTreeMap<String, Vec<String>>,
    map_tokens: BTreeMap<String, Vec<String>>,
    notifications: BTreeMap<(String, String), NotificationDocument>,
    rejected_tokens: HashMap<String, String>,
    sent: Vec<MulticastMessage>,
    member_lookups: usize,
    failures: Failures,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_item(&self, item: ItemRecord) {
        self.state.lock().await.items.push(item);
    }

    pub async fn add_member(&self, family_id: &str, user_id: &str) {
        self.state
            .lock()
            .await
            .members
            .entry(family_id.to_string())
            .or_default()
            .push(user_id.to_string());
    }

    pub async fn add_collection_token(&self, user_id: &str, token: &str) {
        push_unique(&mut self.state.lock().await.collection_tokens, user_id, token);
    }

    pub async fn add_map_token(&self, user_id: &str, token: &str) {
        push_unique(&mut self.state.lock().await.map_tokens, user_id, token);
    }

    /// Make every send to `token` fail with the admin-style `code`
    pub async fn reject_token(&self, token: &str, code: &str) {
        self.state
            .lock()
            .await
            .rejected_tokens
            .insert(token.to_string(), code.to_string());
    }

    pub async fn fail_range_query(&self, fail: bool) {
        self.state.lock().await.failures.range_query = fail;
    }

    pub async fn fail_fallback_query(&self, fail: bool) {
        self.state.lock().await.failures.fallback_query = fail;
    }

    pub async fn fail_members_of(&self, family_id: &str) {
        self.state
            .lock()
            .await
            .failures
            .member_lookups
            .insert(family_id.to_string());
    }

    pub async fn fail_token_deletes(&self, fail: bool) {
        self.state.lock().await.failures.token_deletes = fail;
    }

    pub async fn fail_notification_writes(&self, fail: bool) {
        self.state.lock().await.failures.notification_writes = fail;
    }

    /// Fail only the writes addressed to `user_id`
    pub async fn fail_notification_writes_to(&self, user_id: &str) {
        self.state
            .lock()
            .await
            .failures
            .notification_writes_to
            .insert(user_id.to_string());
    }

    pub async fn fail_push(&self, fail: bool) {
        self.state.lock().await.failures.push = fail;
    }

    /// Accept `batches` multicasts, then fail every later one
    pub async fn fail_push_after(&self, batches: usize) {
        self.state.lock().await.failures.push_after = Some(batches);
    }

    /// What the app does when a user opens a notification
    pub async fn mark_read(&self, family_id: &str, id: &str) {
        let key = (family_id.to_string(), id.to_string());
        if let Some(document) = self.state.lock().await.notifications.get_mut(&key) {
            document.read = Some(true);
        }
    }

    pub async fn notification(&self, family_id: &str, id: &str) -> Option<NotificationDocument> {
        let key = (family_id.to_string(), id.to_string());
        self.state.lock().await.notifications.get(&key).cloned()
    }

    /// All records, ordered by household then id
    pub async fn notifications(&self) -> Vec<NotificationDocument> {
        self.state.lock().await.notifications.values().cloned().collect()
    }

    pub async fn notification_count(&self) -> usize {
        self.state.lock().await.notifications.len()
    }

    /// Multicasts accepted by the transport, in send order
    pub async fn sent_messages(&self) -> Vec<MulticastMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn collection_tokens_of(&self, user_id: &str) -> Vec<String> {
        tokens_of(&self.state.lock().await.collection_tokens, user_id)
    }

    pub async fn map_tokens_of(&self, user_id: &str) -> Vec<String> {
        tokens_of(&self.state.lock().await.map_tokens, user_id)
    }

    /// Directory queries served so far
    pub async fn member_lookups(&self) -> usize {
        self.state.lock().await.member_lookups
    }
}

fn push_unique(tokens: &mut BTreeMap<String, Vec<String>>, user_id: &str, token: &str) {
    let entry = tokens.entry(user_id.to_string()).or_default();
    if !entry.iter().any(|t| t == token) {
        entry.push(token.to_string());
    }
}

fn tokens_of(tokens: &BTreeMap<String, Vec<String>>, user_id: &str) -> Vec<String> {
    tokens.get(user_id).cloned().unwrap_or_default()
}

fn remove_token(tokens: &mut BTreeMap<String, Vec<String>>, user_id: &str, token: &str) {
    if let Some(entry) = tokens.get_mut(user_id) {
        entry.retain(|t| t != token);
    }
}

#[async_trait]
impl ItemSource for MemoryBackend {
    async fn items_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ItemRecord>> {
        let state = self.state.lock().await;
        if state.failures.range_query {
            return Err(Error::backend("range query unavailable"));
        }
        Ok(state
            .items
            .iter()
            .filter(|item| item.expiry_ts.map_or(false, |ts| ts >= start && ts <= end))
            .cloned()
            .collect())
    }

    async fn recent_items(&self, limit: usize) -> Result<Vec<ItemRecord>> {
        let state = self.state.lock().await;
        if state.failures.fallback_query {
            return Err(Error::backend("fallback query unavailable"));
        }
        let mut legacy: Vec<ItemRecord> = state
            .items
            .iter()
            .filter(|item| item.expiry_ts.is_none())
            .cloned()
            .collect();
        // Newest first, undated rows last
        legacy.sort_by_key(|item| (item.created_at.is_none(), Reverse(item.created_at)));
        legacy.truncate(limit);
        Ok(legacy)
    }
}

#[async_trait]
impl MemberDirectory for MemoryBackend {
    async fn member_ids(&self, family_id: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.member_lookups += 1;
        if state.failures.member_lookups.contains(family_id) {
            return Err(Error::backend(format!("members of {} unavailable", family_id)));
        }
        Ok(state.members.get(family_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TokenStore for MemoryBackend {
    async fn collection_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(tokens_of(&self.state.lock().await.collection_tokens, user_id))
    }

    async fn map_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(tokens_of(&self.state.lock().await.map_tokens, user_id))
    }

    async fn delete_collection_token(&self, user_id: &str, token: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failures.token_deletes {
            return Err(Error::backend("token delete rejected"));
        }
        remove_token(&mut state.collection_tokens, user_id, token);
        Ok(())
    }

    async fn delete_map_token(&self, user_id: &str, token: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failures.token_deletes {
            return Err(Error::backend("token delete rejected"));
        }
        remove_token(&mut state.map_tokens, user_id, token);
        Ok(())
    }
}

#[async_trait]
impl NotificationRecords for MemoryBackend {
    async fn get(&self, family_id: &str, id: &str) -> Result<Option<NotificationDocument>> {
        Ok(self.notification(family_id, id).await)
    }

    async fn merge(&self, document: &NotificationDocument) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failures.notification_writes
            || state.failures.notification_writes_to.contains(&document.to_uid)
        {
            return Err(Error::backend(format!("write of {} rejected", document.id)));
        }

        let key = (document.family_id.clone(), document.id.clone());
        let mut merged = document.clone();
        if let Some(existing) = state.notifications.get(&key) {
            merged.created_at = document.created_at.or(existing.created_at);
            merged.read = document.read.or(existing.read);
        }
        state.notifications.insert(key, merged);
        Ok(())
    }
}

#[async_trait]
impl PushTransport for MemoryBackend {
    async fn send_each_for_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse> {
        let mut state = self.state.lock().await;
        let exhausted = state
            .failures
            .push_after
            .map_or(false, |batches| state.sent.len() >= batches);
        if state.failures.push || exhausted {
            return Err(Error::backend("push transport unavailable"));
        }
        if message.tokens.is_empty() {
            return Err(PushError::InvalidMessage("multicast requires at least one token".to_string()).into());
        }

        let responses: Vec<SendResponse> = message
            .tokens
            .iter()
            .enumerate()
            .map(|(i, token)| match state.rejected_tokens.get(token) {
                Some(code) => SendResponse {
                    success: false,
                    message_id: None,
                    error: Some(SendError {
                        code: code.clone(),
                        message: format!("rejected {}", token),
                    }),
                },
                None => SendResponse {
                    success: true,
                    message_id: Some(format!("memory/{}/{}", state.sent.len(), i)),
                    error: None,
                },
            })
            .collect();
        state.sent.push(message.clone());
        Ok(BatchResponse::from_responses(responses))
    }
}
