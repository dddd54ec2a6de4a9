//! Multicast message types

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Maximum number of addresses in one multicast
pub const MAX_MULTICAST_TOKENS: usize = 500;

/// One message addressed to several device tokens
#[derive(Debug, Clone, PartialEq)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub notification: Notification,
    /// Data payload. FCM only accepts string values.
    pub data: BTreeMap<String, String>,
    pub android: Option<AndroidConfig>,
    pub apns: Option<ApnsConfig>,
}

/// Human-visible part of a push
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AndroidPriority {
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AndroidConfig {
    pub priority: AndroidPriority,
    #[serde(serialize_with = "serialize_ttl")]
    pub ttl: Duration,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApnsConfig {
    pub headers: BTreeMap<String, String>,
    pub payload: ApnsPayload,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApnsPayload {
    pub aps: Aps,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Aps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    pub content_available: Option<u8>,
}

/// FCM v1 expects durations as `"<seconds>s"`
fn serialize_ttl<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{}s", ttl.as_secs()))
}

/// Body of one `messages:send` call
#[derive(Debug, Serialize)]
pub(crate) struct SendRequest<'a> {
    pub message: TokenMessage<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenMessage<'a> {
    pub token: &'a str,
    pub notification: &'a Notification,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<&'a AndroidConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<&'a ApnsConfig>,
}

impl MulticastMessage {
    pub(crate) fn for_token<'a>(&'a self, token: &'a str) -> SendRequest<'a> {
        SendRequest {
            message: TokenMessage {
                token,
                notification: &self.notification,
                data: &self.data,
                android: self.android.as_ref(),
                apns: self.apns.as_ref(),
            },
        }
    }
}
