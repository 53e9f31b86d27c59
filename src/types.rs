use std::collections::BTreeSet;
use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Filter spec that subscribes a hook to every message type.
pub const FILTER_SPEC_ALL: &str = "*";

/// Message type carrying a transaction update.
pub const MESSAGE_TYPE_TRANSACTION: &str = "transaction";

/// Message type announcing that the provider holds undelivered messages.
pub const MESSAGE_TYPE_UNDELIVERABLE_ALERT: &str = "undeliverable_alert";

/// Token endpoint response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

/// Error body returned by the provider on non-2xx responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(rename = "error", default)]
    pub code: String,
    #[serde(rename = "error_description", default)]
    pub description: String,
}

/// HMAC key shared with the provider.
///
/// The secret is stored base64-encoded; [`Key::secret_bytes`] yields the raw
/// HMAC key and [`Key::secret_hex`] the form the provider expects when a hook
/// is registered. The [`Debug`] impl redacts the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: String,
    pub secret: String,
}

impl Key {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }

    pub fn secret_bytes(&self) -> Result<Vec<u8>> {
        BASE64.decode(&self.secret).map_err(|e| {
            Error::configuration(format!("secret for key {} is not valid base64: {e}", self.id))
        })
    }

    pub fn secret_hex(&self) -> Result<String> {
        Ok(hex::encode(self.secret_bytes()?))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// What the provider does with messages it could not deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityMode {
    /// Keep them in the hook's undeliverable backlog.
    StoreUndeliverable,
    /// Drop them.
    None,
}

/// Provider-side webhook subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub scope: Vec<i64>,
    #[serde(default)]
    pub filter_spec: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub reliability_mode: String,
    /// Id of the newest undeliverable message, empty when the backlog is clear.
    #[serde(rename = "last_undeliverable", default)]
    pub last_undeliverable_id: String,
    #[serde(default)]
    pub last_undeliverable_timestamp: String,
    #[serde(default)]
    pub hmac_key_id: String,
}

impl Hook {
    /// Whether this hook belongs to the deployment identified by `key_id` and `uri`.
    pub fn is_owned_by(&self, key_id: &str, uri: &str) -> bool {
        self.hmac_key_id == key_id && self.uri == uri
    }

    pub fn has_backlog(&self) -> bool {
        !self.last_undeliverable_id.is_empty()
    }

    /// Scope in its canonical wire form.
    pub fn normalized_scope(&self) -> Vec<i64> {
        normalize_scope(self.scope.iter().copied())
    }
}

/// Sorts ascending and removes duplicates.
pub fn normalize_scope<I>(ids: I) -> Vec<i64>
where
    I: IntoIterator<Item = i64>,
{
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Create or patch body for a hook. Absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_spec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliability_mode: Option<ReliabilityMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac_key_id: Option<String>,
    /// 256-bit secret as exactly 64 hex characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac_key_secret: Option<String>,
}

impl HookRequest {
    /// Registration body for a brand-new hook signed with `key`.
    pub fn register(uri: impl Into<String>, scope: Vec<i64>, key: &Key) -> Result<Self> {
        Ok(Self {
            uri: Some(uri.into()),
            scope: Some(scope),
            filter_spec: Some(FILTER_SPEC_ALL.to_string()),
            enabled: Some(true),
            reliability_mode: Some(ReliabilityMode::StoreUndeliverable),
            hmac_key_id: Some(key.id.clone()),
            hmac_key_secret: Some(key.secret_hex()?),
        })
    }

    pub fn scope_update(scope: Vec<i64>) -> Self {
        Self {
            scope: Some(scope),
            ..Default::default()
        }
    }
}

/// One page of the hook listing.
#[derive(Debug, Clone, Default)]
pub struct HookPage {
    pub items: Vec<Hook>,
    pub page_size: u32,
    pub total_items: u32,
    pub more: bool,
}

/// Notification pushed (or stored) by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub hook_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hook_management_uri: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    /// Payload, passed to handlers untouched.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Message {
    /// Backlog tail announced by an undeliverable alert.
    pub fn last_undeliverable_id(&self) -> Option<&str> {
        self.data
            .get("last_undeliverable")
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// One page of a hook's undeliverable backlog.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub items: Vec<Message>,
    pub page_size: u32,
    pub more: bool,
}

/// `{id}` body used for acknowledgements and create responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdModel {
    pub id: String,
}

impl IdModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Batch dismissal body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageIdsRequest {
    pub message_ids: Vec<String>,
}
