//! Subscription reconciliation.
//!
//! Converges the provider-side hooks for this deployment onto exactly one
//! subscription that covers every configured company. Safe to run on every
//! startup.

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::config::HookConfig;
use crate::drain::{DrainPipeline, DrainReport, MessageHandler};
use crate::error::{Error, Result, ResultExt};
use crate::store::HookStore;
use crate::telemetry::metric_inc;
use crate::types::{normalize_scope, Hook, HookRequest, Key};

/// Page size used when listing existing hooks.
pub const HOOK_LIST_PAGE_SIZE: u32 = 50;

/// Length of a generated signing secret.
pub const SIGNING_KEY_BYTES: usize = 32;

const KEY_ID_BYTES: usize = 12;

/// What [`Reconciler::ensure_subscription`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// No hook existed; one was registered with a freshly generated key.
    ///
    /// The caller must add `key` to the keyring used for inbound verification.
    Created {
        hook_id: String,
        key: Key,
        scope: Vec<i64>,
    },
    /// An existing hook was kept as the canonical subscription.
    Reconciled {
        hook_id: String,
        scope: Vec<i64>,
        scope_updated: bool,
        /// Duplicates that were deleted or were already gone.
        removed: Vec<String>,
        /// Present when a pending backlog was drained first.
        drained: Option<DrainReport>,
    },
}

impl Reconciliation {
    pub fn hook_id(&self) -> &str {
        match self {
            Reconciliation::Created { hook_id, .. } => hook_id,
            Reconciliation::Reconciled { hook_id, .. } => hook_id,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn HookStore>,
    pipeline: DrainPipeline,
}

impl Reconciler {
    pub fn new(store: Arc<dyn HookStore>, handler: Arc<dyn MessageHandler>) -> Self {
        let pipeline = DrainPipeline::new(store.clone(), handler);
        Self { store, pipeline }
    }

    /// Use a preconfigured pipeline for backlog drains.
    pub fn with_pipeline(mut self, pipeline: DrainPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub async fn ensure_subscription(&self, config: &HookConfig) -> Result<Reconciliation> {
        let required = config.required_scope()?;
        let hooks = self.list_all_hooks().await.context("listHooks")?;

        let matching: Vec<&Hook> = hooks
            .iter()
            .filter(|hook| hook.is_owned_by(&config.signing_key_id, &config.hook_uri))
            .collect();

        debug!(
            total = hooks.len(),
            matching = matching.len(),
            uri = %config.hook_uri,
            "listed notification hooks"
        );

        match matching.split_first() {
            None => self.create(config, required).await,
            Some((canonical, duplicates)) => {
                self.reconcile(canonical, duplicates, required).await
            }
        }
    }

    async fn list_all_hooks(&self) -> Result<Vec<Hook>> {
        let mut hooks = Vec::new();
        let mut page_number = 1;
        loop {
            let page = self
                .store
                .list_hooks(page_number, HOOK_LIST_PAGE_SIZE)
                .await?;
            let empty = page.items.is_empty();
            hooks.extend(page.items);
            if !page.more || empty {
                return Ok(hooks);
            }
            page_number += 1;
        }
    }

    async fn create(&self, config: &HookConfig, scope: Vec<i64>) -> Result<Reconciliation> {
        let key = generate_secure_key(SIGNING_KEY_BYTES)?;
        let request = HookRequest::register(config.hook_uri.clone(), scope.clone(), &key)?;
        let hook_id = self.store.add_hook(&request).await.context("addHook")?;

        metric_inc("issuer.hooks.created");
        info!(hook_id = %hook_id, key_id = %key.id, ?scope, "registered notification hook");

        Ok(Reconciliation::Created {
            hook_id,
            key,
            scope,
        })
    }

    async fn reconcile(
        &self,
        canonical: &Hook,
        duplicates: &[&Hook],
        required: Vec<i64>,
    ) -> Result<Reconciliation> {
        let drained = if canonical.has_backlog() {
            let report = self
                .pipeline
                .drain(&canonical.id, &canonical.last_undeliverable_id)
                .await
                .with_context(|| format!("drain undeliverable for hook {}", canonical.id))?;
            Some(report)
        } else {
            None
        };

        let scope = normalize_scope(
            std::iter::once(canonical)
                .chain(duplicates.iter().copied())
                .flat_map(|hook| hook.scope.iter().copied())
                .chain(required),
        );

        let scope_updated = scope != canonical.normalized_scope();
        if scope_updated {
            self.store
                .update_hook_scope(&canonical.id, &scope)
                .await
                .context("updateHookScope")?;
            metric_inc("issuer.hooks.scope_updated");
        }

        let mut removed = Vec::with_capacity(duplicates.len());
        for duplicate in duplicates {
            match self.store.delete_hook(&duplicate.id).await {
                Ok(()) => {
                    metric_inc("issuer.hooks.deleted");
                    removed.push(duplicate.id.clone());
                }
                Err(e) if e.is_not_found() => {
                    debug!(hook_id = %duplicate.id, "duplicate notification hook already gone");
                    removed.push(duplicate.id.clone());
                }
                Err(e) => warn!(
                    hook_id = %duplicate.id,
                    error = %e,
                    "failed to delete duplicate notification hook"
                ),
            }
        }

        info!(
            hook_id = %canonical.id,
            ?scope,
            scope_updated,
            removed = removed.len(),
            "reconciled notification hook"
        );

        Ok(Reconciliation::Reconciled {
            hook_id: canonical.id.clone(),
            scope,
            scope_updated,
            removed,
            drained,
        })
    }
}

/// Fresh signing key from the OS CSPRNG.
///
/// The secret is `num_bytes` random bytes, base64 encoded; the id is a
/// URL-safe random token.
pub fn generate_secure_key(num_bytes: usize) -> Result<Key> {
    let secret = random_bytes(num_bytes)?;
    Ok(Key::new(unique_id()?, STANDARD.encode(secret)))
}

fn unique_id() -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes(KEY_ID_BYTES)?))
}

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::configuration(format!("secure random source unavailable: {e}")))?;
    Ok(bytes)
}
