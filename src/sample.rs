//! On-demand sample notification
//!
//! Lets a signed-in household member push a countdown alert for a made-up
//! item to everyone in their household, so the app's notification flow can be
//! checked without waiting for a real item to near its expiry.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::backend::Backend;
use crate::config::ServiceConfig;
use crate::dispatch::PushDispatcher;
use crate::expiry::is_alert_day;
use crate::membership::{MemberDirectory, MembershipCache};
use crate::notifications::{ExpiryNotice, NotificationStore};
use crate::tokens::TokenRegistry;

/// Days left used when the request has none or an unusable one
pub const DEFAULT_SAMPLE_DAYS: i64 = 2;

/// Errors surfaced to the caller of a sample push
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("Sign-in required")]
    Unauthenticated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::error::Error> for SampleError {
    fn from(err: crate::error::Error) -> Self {
        SampleError::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRequest {
    #[serde(default)]
    pub family_id: Option<String>,
    /// A number or a numeric string
    #[serde(default)]
    pub days_left: Option<Value>,
    #[serde(default)]
    pub item_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleResponse {
    pub ok: bool,
    pub family_id: String,
    pub days_left: i64,
    pub recipients: usize,
}

/// 1, 2 or 3 when `raw` is one of them, otherwise the default
pub fn sample_days_left(raw: Option<&Value>) -> i64 {
    let days = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    days.filter(|d| d.is_finite() && d.fract() == 0.0)
        .map(|d| d as i64)
        .filter(|d| is_alert_day(*d))
        .unwrap_or(DEFAULT_SAMPLE_DAYS)
}

pub struct SampleInvocation {
    directory: Arc<dyn MemberDirectory>,
    store: NotificationStore,
    sample_item_name: String,
}

impl SampleInvocation {
    pub fn new(backend: &Backend, config: &ServiceConfig) -> Self {
        let dispatcher = PushDispatcher::new(
            TokenRegistry::new(backend.tokens.clone()),
            backend.push.clone(),
            config.push_hints.clone(),
        );
        Self {
            directory: backend.members.clone(),
            store: NotificationStore::new(
                backend.records.clone(),
                dispatcher,
                config.messages.clone(),
                config.utc_offset,
            ),
            sample_item_name: config.messages.sample_item_name.clone(),
        }
    }

    /// Notify every member of the caller's household about a sample item
    pub async fn push_sample(
        &self,
        caller: Option<&str>,
        request: &SampleRequest,
        now: DateTime<Utc>,
    ) -> Result<SampleResponse, SampleError> {
        let caller = caller
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .ok_or(SampleError::Unauthenticated)?;

        let family_id = request
            .family_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SampleError::InvalidArgument("familyId is required".to_string()))?;

        let members = MembershipCache::new(self.directory.clone())
            .resolve(family_id)
            .await?;
        if !members.iter().any(|uid| uid == caller) {
            return Err(SampleError::PermissionDenied(format!(
                "{} is not a member of household {}",
                caller, family_id
            )));
        }

        let days_left = sample_days_left(request.days_left.as_ref());
        let item_name = request
            .item_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.sample_item_name.as_str())
            .to_string();
        let ref_path = format!("families/{}/samples/{}", family_id, now.timestamp_millis());
        let expires_on = now + Duration::days(days_left);

        let notices: Vec<ExpiryNotice> = members
            .iter()
            .map(|uid| ExpiryNotice {
                to_uid: uid.clone(),
                family_id: family_id.to_string(),
                ref_path: ref_path.clone(),
                item_name: item_name.clone(),
                days_left,
                expires_on,
            })
            .collect();
        for outcome in join_all(notices.iter().map(|notice| self.store.upsert(notice, now))).await {
            outcome?;
        }

        info!(
            "Sample countdown D{} sent to {} member(s) of {}",
            days_left,
            members.len(),
            family_id
        );
        Ok(SampleResponse {
            ok: true,
            family_id: family_id.to_string(),
            days_left,
            recipients: members.len(),
        })
    }
}
