//! Client core for a card-issuing provider's REST and webhook APIs.
//!
//! This crate provides the **stateful plumbing** behind a provider
//! integration: short-lived bearer tokens, inbound webhook verification,
//! subscription reconciliation and recovery of undelivered notifications.
//!
//! ## Guarantees
//! - At most one background token refresh in flight
//! - Constant-time signature comparison, body read exactly once
//! - One subscription per deployment after reconciliation
//! - Handled backlog messages are dismissed even on partial failure
//!
//! ## Non-Guarantees
//! - Exactly-once handling (handlers must be idempotent)
//! - Retries of failed provider calls
//! - Token persistence across restarts
//! - An HTTP server for inbound deliveries
//!
//! Card, account and transfer endpoints are out of scope; callers plug their
//! own business logic in through [`MessageHandler`].

mod client;
mod config;
mod credentials;
mod drain;
mod error;
mod notification;
mod reconciler;
mod signing;
mod store;
mod telemetry;
mod types;

pub use client::{RestClient, PATH_TOKEN};
pub use config::{ClientConfig, HookConfig, ProductCompany};
pub use credentials::{
    is_valid, should_refresh, CredentialBroker, RefreshGate, RefreshPermit, Token, TokenSource,
    HARD_EXPIRY_WINDOW_SECS, SOFT_REFRESH_WINDOW_SECS,
};
pub use drain::{
    handler_fn, DrainPipeline, DrainReport, HandlerFn, MessageHandler, INITIAL_PAGE_SIZE,
};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use notification::{
    InboundDelivery, MessageSpec, NotificationProcessor, HEADER_AUTHORIZATION,
    HEADER_MESSAGE_SPECIFICATION,
};
pub use reconciler::{
    generate_secure_key, Reconciler, Reconciliation, HOOK_LIST_PAGE_SIZE, SIGNING_KEY_BYTES,
};
pub use signing::{
    compute_signature, parse_authorization, sign_authorization, verify, verify_reader, Keyring,
    ParsedSignature, VerificationError, HMAC_SHA256,
};
pub use store::HookStore;
pub use types::{
    normalize_scope, Hook, HookPage, HookRequest, IdModel, Key, Message, MessageIdsRequest,
    MessagePage, ProviderErrorBody, ReliabilityMode, TokenResponse, FILTER_SPEC_ALL,
    MESSAGE_TYPE_TRANSACTION, MESSAGE_TYPE_UNDELIVERABLE_ALERT,
};
