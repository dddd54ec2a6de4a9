//! Push dispatch to every device of a user

use async_trait::async_trait;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use expiry_countdown_push::{
    AndroidConfig, ApnsConfig, ApnsPayload, Aps, BatchResponse, MulticastMessage, Notification,
    INVALID_ARGUMENT, MAX_MULTICAST_TOKENS, REGISTRATION_TOKEN_NOT_REGISTERED,
};

use crate::config::PlatformHints;
use crate::error::Result;
use crate::tokens::{TokenOrigin, TokenRegistry};

/// Error codes that mean the token will never work again
pub const PRUNABLE_ERROR_CODES: [&str; 2] = [REGISTRATION_TOKEN_NOT_REGISTERED, INVALID_ARGUMENT];

pub fn is_token_dead(code: &str) -> bool {
    PRUNABLE_ERROR_CODES.contains(&code)
}

/// Multi-recipient push delivery
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send_each_for_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse>;
}

/// The machine-readable part of an expiry push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushData {
    pub kind: String,
    pub days_left: i64,
    pub ref_path: String,
    pub family_id: String,
    pub notification_id: String,
}

impl PushData {
    /// String-encoded payload under the keys the app reads
    pub fn to_data_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_string(), self.kind.clone()),
            ("daysLeft".to_string(), self.days_left.to_string()),
            ("refPath".to_string(), self.ref_path.clone()),
            ("familyId".to_string(), self.family_id.clone()),
            ("notificationId".to_string(), self.notification_id.clone()),
        ])
    }
}

/// Delivery outcome for one user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub pruned: Vec<String>,
}

impl DispatchReport {
    fn absorb(&mut self, tokens: &[String], batch: &BatchResponse) {
        self.attempted += tokens.len();
        self.delivered += batch.success_count;
        self.failed += batch.failure_count;
    }
}

#[derive(Clone)]
pub struct PushDispatcher {
    registry: TokenRegistry,
    transport: Arc<dyn PushTransport>,
    hints: PlatformHints,
}

impl PushDispatcher {
    pub fn new(registry: TokenRegistry, transport: Arc<dyn PushTransport>, hints: PlatformHints) -> Self {
        Self {
            registry,
            transport,
            hints,
        }
    }

    fn message(&self, tokens: Vec<String>, title: &str, body: &str, data: &PushData) -> MulticastMessage {
        let hints = &self.hints;
        MulticastMessage {
            tokens,
            notification: Notification {
                title: title.to_string(),
                body: body.to_string(),
            },
            data: data.to_data_map(),
            android: Some(AndroidConfig {
                priority: hints.android_priority,
                ttl: hints.android_ttl,
            }),
            apns: Some(ApnsConfig {
                headers: BTreeMap::from([("apns-priority".to_string(), hints.apns_priority.clone())]),
                payload: ApnsPayload {
                    aps: Aps {
                        sound: Some(hints.sound.clone()),
                        content_available: hints.content_available.then_some(1),
                    },
                },
            }),
        }
    }

    /// Push to every token of `user_id` and prune the dead ones.
    ///
    /// A user without tokens is not an error. Failed sends are not retried.
    pub async fn send(&self, user_id: &str, title: &str, body: &str, data: &PushData) -> Result<DispatchReport> {
        let tokens = self.registry.collect(user_id).await?;
        let mut report = DispatchReport::default();
        if tokens.is_empty() {
            debug!("User {} has no device tokens", user_id);
            return Ok(report);
        }

        let mut dead: Vec<(String, TokenOrigin)> = Vec::new();
        let mut outcome = Ok(());
        for chunk in tokens.tokens().chunks(MAX_MULTICAST_TOKENS) {
            let message = self.message(chunk.to_vec(), title, body, data);
            let batch = match self.transport.send_each_for_multicast(&message).await {
                Ok(batch) => batch,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            report.absorb(chunk, &batch);

            for (token, response) in chunk.iter().zip(&batch.responses) {
                if let Some(code) = response.error_code() {
                    if is_token_dead(code) {
                        if let Some(origin) = tokens.origin(token) {
                            dead.push((token.clone(), origin));
                        }
                    } else {
                        debug!("Push to a device of user {} failed: {}", user_id, code);
                    }
                }
            }
        }

        // Dead tokens from delivered chunks are pruned even if a later chunk failed
        if !dead.is_empty() {
            let outcomes = self.registry.prune_all(user_id, &dead).await;
            let unclean = outcomes.iter().filter(|o| !o.is_clean()).count();
            if unclean > 0 {
                warn!(
                    "{} of {} dead token(s) of user {} could not be fully pruned",
                    unclean,
                    outcomes.len(),
                    user_id
                );
            }
            report.pruned = outcomes
                .into_iter()
                .filter(|o| o.removed > 0)
                .map(|o| o.token)
                .collect();
        }

        outcome?;
        Ok(report)
    }
}
