use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::signing::Keyring;
use crate::types::{normalize_scope, Key};

/// Connection settings for the provider's REST API.
///
/// The [`Debug`] impl redacts the client secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://api.issuer.example.com`.
    pub host_url: String,

    /// Client id for the client-credentials grant.
    pub rest_id: String,

    /// Client secret for the client-credentials grant.
    pub rest_secret: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Log response bodies of failed calls.
    #[serde(default)]
    pub debug: bool,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ClientConfig {
    pub fn new(
        host_url: impl Into<String>,
        rest_id: impl Into<String>,
        rest_secret: impl Into<String>,
    ) -> Self {
        Self {
            host_url: host_url.into(),
            rest_id: rest_id.into(),
            rest_secret: rest_secret.into(),
            request_timeout_secs: default_request_timeout_secs(),
            debug: false,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host_url", &self.host_url)
            .field("rest_id", &self.rest_id)
            .field("rest_secret", &"[REDACTED]")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("debug", &self.debug)
            .finish()
    }
}

/// A company whose accounts this deployment issues cards for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductCompany {
    pub company_id: String,
    #[serde(default)]
    pub is_plastic: bool,
    #[serde(default)]
    pub is_reloadable: bool,
}

impl ProductCompany {
    pub fn new(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            ..Default::default()
        }
    }
}

/// Webhook identity and scope for this deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    /// Where the provider pushes deliveries.
    pub hook_uri: String,

    /// Key id our subscriptions are registered under.
    pub signing_key_id: String,

    /// Id of the subscription inbound deliveries must be addressed to.
    #[serde(default)]
    pub notification_hook_id: String,

    #[serde(default)]
    pub product_companies: Vec<ProductCompany>,

    #[serde(default)]
    pub disbursement_company_id: String,

    /// Keys accepted on inbound deliveries.
    #[serde(default)]
    pub hmac_keys: Vec<Key>,
}

impl HookConfig {
    pub fn new(hook_uri: impl Into<String>, signing_key_id: impl Into<String>) -> Self {
        Self {
            hook_uri: hook_uri.into(),
            signing_key_id: signing_key_id.into(),
            ..Default::default()
        }
    }

    pub fn with_notification_hook_id(mut self, hook_id: impl Into<String>) -> Self {
        self.notification_hook_id = hook_id.into();
        self
    }

    pub fn with_product_company(mut self, company: ProductCompany) -> Self {
        self.product_companies.push(company);
        self
    }

    pub fn with_disbursement_company_id(mut self, company_id: impl Into<String>) -> Self {
        self.disbursement_company_id = company_id.into();
        self
    }

    pub fn with_hmac_key(mut self, key: Key) -> Self {
        self.hmac_keys.push(key);
        self
    }

    pub fn keyring(&self) -> Keyring {
        Keyring::new(self.hmac_keys.clone())
    }

    /// Company ids a subscription must cover, sorted ascending.
    ///
    /// A malformed product company id is fatal; a malformed disbursement
    /// company id is logged and left out.
    pub fn required_scope(&self) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(self.product_companies.len() + 1);
        for company in &self.product_companies {
            let id = company.company_id.trim().parse::<i64>().map_err(|e| {
                Error::configuration(format!(
                    "product company id {:?} is not numeric: {e}",
                    company.company_id
                ))
            })?;
            ids.push(id);
        }

        let disbursement = self.disbursement_company_id.trim();
        if !disbursement.is_empty() {
            match disbursement.parse::<i64>() {
                Ok(id) => ids.push(id),
                Err(e) => warn!(
                    company_id = disbursement,
                    error = %e,
                    "ignoring malformed disbursement company id"
                ),
            }
        }

        Ok(normalize_scope(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn required_scope_merges_and_sorts_companies() {
        let config = HookConfig::new("https://hooks.example.com/n", "kid")
            .with_product_company(ProductCompany::new("67890"))
            .with_product_company(ProductCompany::new("24680"))
            .with_product_company(ProductCompany::new("67890"))
            .with_disbursement_company_id("12345");

        assert_eq!(config.required_scope().unwrap(), vec![12345, 24680, 67890]);
    }

    #[test]
    fn malformed_disbursement_id_is_excluded() {
        let config = HookConfig::new("https://hooks.example.com/n", "kid")
            .with_product_company(ProductCompany::new("2"))
            .with_disbursement_company_id("disb-1");

        assert_eq!(config.required_scope().unwrap(), vec![2]);
    }

    #[test]
    fn malformed_product_id_is_fatal() {
        let config = HookConfig::new("https://hooks.example.com/n", "kid")
            .with_product_company(ProductCompany::new("abc"));

        let err = config.required_scope().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn client_config_debug_redacts_secret() {
        let config = ClientConfig::new("https://api.example.com", "client", "hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn client_config_deserializes_with_defaults() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "host_url": "https://api.example.com",
            "rest_id": "client",
            "rest_secret": "secret",
        }))
        .unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert!(!config.debug);
    }
}
