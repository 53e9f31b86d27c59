//! Bearer token lifecycle.
//!
//! Every outbound call asks the [`CredentialBroker`] for a bearer value:
//!
//! - token fresh (more than 10 minutes left): used as is
//! - token aging (between 1 and 10 minutes left): used as is, and one
//!   background refresh is started unless another is already in flight
//! - token missing or about to expire (under 1 minute): the call waits for a
//!   synchronous refresh and fails if that refresh fails
//!
//! The token is replaced as a whole behind an `Arc`, so readers always see
//! either the previous or the new token.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, ResultExt};
use crate::telemetry::metric_inc;
use crate::types::TokenResponse;

/// Remaining lifetime below which a refresh is wanted.
pub const SOFT_REFRESH_WINDOW_SECS: i64 = 10 * 60;

/// Remaining lifetime below which a token is no longer used.
pub const HARD_EXPIRY_WINDOW_SECS: i64 = 60;

/// An issued bearer token. Immutable once created.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Lifetimes too large to represent saturate at the latest instant.
    pub fn from_response(response: &TokenResponse, issued_at: DateTime<Utc>) -> Self {
        let expires_at = Duration::try_seconds(response.expires_in.max(0))
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(response.access_token.clone(), expires_at)
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn should_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now + Duration::seconds(SOFT_REFRESH_WINDOW_SECS)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + Duration::seconds(HARD_EXPIRY_WINDOW_SECS)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// True when no token has been acquired or it is inside the soft window.
pub fn should_refresh(token: Option<&Token>, now: DateTime<Utc>) -> bool {
    token.map_or(true, |t| t.should_refresh_at(now))
}

/// True when a token exists and is outside the hard window.
pub fn is_valid(token: Option<&Token>, now: DateTime<Utc>) -> bool {
    token.is_some_and(|t| t.is_valid_at(now))
}

/// Performs the token exchange.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<TokenResponse>;
}

/// Single-flight gate for background refreshes.
///
/// Acquiring never waits: a caller either gets the permit or learns that a
/// refresh is already running. The gate reopens when the permit is dropped.
#[derive(Debug, Default)]
pub struct RefreshGate {
    busy: AtomicBool,
}

impl RefreshGate {
    pub fn try_acquire(self: &Arc<Self>) -> Option<RefreshPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshPermit { gate: self.clone() })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one background refresh.
#[derive(Debug)]
pub struct RefreshPermit {
    gate: Arc<RefreshGate>,
}

impl Drop for RefreshPermit {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

struct BrokerInner {
    source: Arc<dyn TokenSource>,
    token: RwLock<Option<Arc<Token>>>,
    gate: Arc<RefreshGate>,
    last_refresh_error: Mutex<Option<String>>,
}

/// Owns the bearer token and decides when to refresh it.
///
/// Cheap to clone; clones share the same token.
#[derive(Clone)]
pub struct CredentialBroker {
    inner: Arc<BrokerInner>,
}

impl fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("refreshing", &self.inner.gate.is_busy())
            .finish_non_exhaustive()
    }
}

impl CredentialBroker {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                source,
                token: RwLock::new(None),
                gate: Arc::new(RefreshGate::default()),
                last_refresh_error: Mutex::new(None),
            }),
        }
    }

    /// The token currently held, if any.
    pub async fn current(&self) -> Option<Arc<Token>> {
        self.inner.token.read().await.clone()
    }

    pub async fn should_refresh(&self) -> bool {
        should_refresh(self.current().await.as_deref(), Utc::now())
    }

    pub async fn is_valid(&self) -> bool {
        is_valid(self.current().await.as_deref(), Utc::now())
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.gate.is_busy()
    }

    /// Error of the most recent failed background refresh.
    ///
    /// Informational only; cleared by the next successful refresh.
    pub async fn last_refresh_error(&self) -> Option<String> {
        self.inner.last_refresh_error.lock().await.clone()
    }

    /// A bearer value usable for the next outbound call.
    pub async fn bearer(&self) -> Result<String> {
        let now = Utc::now();
        let token = match self.current().await {
            Some(token) if !token.should_refresh_at(now) => token,
            Some(token) if token.is_valid_at(now) => {
                self.refresh_in_background();
                token
            }
            _ => self.refresh().await.context("refreshToken")?,
        };
        Ok(token.value().to_string())
    }

    /// Exchange credentials for a new token and store it.
    ///
    /// On failure the previously stored token is left untouched.
    pub async fn refresh(&self) -> Result<Arc<Token>> {
        info!("refreshing access token");
        let response = match self.inner.source.fetch_token().await {
            Ok(response) => response,
            Err(e) => {
                metric_inc("issuer.token.refresh.failure");
                warn!(error = %e, "access token refresh failed");
                return Err(e);
            }
        };

        let token = Arc::new(Token::from_response(&response, Utc::now()));
        *self.inner.token.write().await = Some(token.clone());
        *self.inner.last_refresh_error.lock().await = None;

        metric_inc("issuer.token.refresh.success");
        debug!(expires_at = %token.expires_at(), "access token updated");
        Ok(token)
    }

    /// Start a refresh without waiting for it.
    ///
    /// Returns `false` when a background refresh is already in flight.
    pub fn refresh_in_background(&self) -> bool {
        let Some(permit) = self.inner.gate.try_acquire() else {
            debug!("background token refresh already in flight");
            return false;
        };

        let broker = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = broker.refresh().await {
                *broker.inner.last_refresh_error.lock().await = Some(e.to_string());
            }
        });
        true
    }
}
