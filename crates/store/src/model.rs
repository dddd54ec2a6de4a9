//! Row types for the inventory, user and notification tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// An inventory item row.
///
/// `path` is the stable identity of the item
/// (`users/{uid}/raw_materials/{itemId}`). Items written by older app
/// versions carry only the `expiry_date` string and no `expiry_ts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    pub path: String,
    #[serde(default)]
    pub family_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub expiry_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Accepts a JSON number or a numeric string; anything else reads as absent.
/// A blank string counts as zero.
fn lenient_quantity<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok().filter(|q| q.is_finite())
            }
        }
        _ => None,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserIdRow {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenRow {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenMapRow {
    #[serde(default)]
    pub fcm_tokens: Option<Map<String, Value>>,
}

/// A per-user expiry notification.
///
/// `created_at` and `read` are only sent on the first write so a merge never
/// resets them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationDocument {
    pub id: String,
    pub family_id: String,
    pub to_uid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub body: String,
    pub level: String,
    pub days_left: i64,
    pub ref_path: String,
    pub expires_on: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
}
