//! Collaborator wiring
//!
//! The core only sees the traits below. Production runs use the PostgREST
//! and FCM clients; tests use [`crate::memory::MemoryBackend`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::Arc;

use expiry_countdown_push::{BatchResponse, FcmClient, MulticastMessage};
use expiry_countdown_store::{ItemRecord, NotificationDocument, StoreClient};

use crate::config::BackendConfig;
use crate::dispatch::PushTransport;
use crate::error::Result;
use crate::membership::MemberDirectory;
use crate::notifications::NotificationRecords;
use crate::scanner::ItemSource;
use crate::tokens::TokenStore;

/// Every collaborator a run needs
#[derive(Clone)]
pub struct Backend {
    pub items: Arc<dyn ItemSource>,
    pub members: Arc<dyn MemberDirectory>,
    pub tokens: Arc<dyn TokenStore>,
    pub records: Arc<dyn NotificationRecords>,
    pub push: Arc<dyn PushTransport>,
}

impl Backend {
    /// Supabase REST for data, FCM HTTP v1 for push
    pub fn rest(config: &BackendConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let store = Arc::new(StoreClient::new(
            &config.supabase_url,
            &config.supabase_key,
            http_client.clone(),
        )?
        .with_page_size(config.page_size));
        let push = Arc::new(FcmClient::new(
            &config.fcm_endpoint,
            &config.fcm_project_id,
            &config.fcm_access_token,
            http_client,
        ));

        Ok(Self {
            items: store.clone(),
            members: store.clone(),
            tokens: store.clone(),
            records: store,
            push,
        })
    }

    /// One value serving every collaborator
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: ItemSource + MemberDirectory + TokenStore + NotificationRecords + PushTransport + 'static,
    {
        Self {
            items: backend.clone(),
            members: backend.clone(),
            tokens: backend.clone(),
            records: backend.clone(),
            push: backend,
        }
    }
}

#[async_trait]
impl ItemSource for StoreClient {
    async fn items_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ItemRecord>> {
        Ok(StoreClient::items_expiring_between(self, start, end).await?)
    }

    async fn recent_items(&self, limit: usize) -> Result<Vec<ItemRecord>> {
        Ok(self.recent_legacy_items(limit).await?)
    }
}

#[async_trait]
impl MemberDirectory for StoreClient {
    async fn member_ids(&self, family_id: &str) -> Result<Vec<String>> {
        Ok(self.family_member_ids(family_id).await?)
    }
}

#[async_trait]
impl TokenStore for StoreClient {
    async fn collection_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(StoreClient::collection_tokens(self, user_id).await?)
    }

    async fn map_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(StoreClient::map_tokens(self, user_id).await?)
    }

    async fn delete_collection_token(&self, user_id: &str, token: &str) -> Result<()> {
        Ok(StoreClient::delete_collection_token(self, user_id, token).await?)
    }

    async fn delete_map_token(&self, user_id: &str, token: &str) -> Result<()> {
        Ok(StoreClient::delete_map_token(self, user_id, token).await?)
    }
}

#[async_trait]
impl NotificationRecords for StoreClient {
    async fn get(&self, family_id: &str, id: &str) -> Result<Option<NotificationDocument>> {
        Ok(self.get_notification(family_id, id).await?)
    }

    async fn merge(&self, document: &NotificationDocument) -> Result<()> {
        Ok(self.merge_notification(document).await?)
    }
}

#[async_trait]
impl PushTransport for FcmClient {
    async fn send_each_for_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse> {
        Ok(FcmClient::send_each_for_multicast(self, message).await?)
    }
}
