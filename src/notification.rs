//! Inbound delivery processing.
//!
//! A delivery is checked in a fixed order: message specification, version,
//! signature, message type, hook id. Only then is it dispatched to a handler
//! or, for undeliverable alerts, to the drain pipeline.

use std::io::Read;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::HookConfig;
use crate::drain::{DrainPipeline, MessageHandler};
use crate::error::{Error, Result, ResultExt};
use crate::signing::{verify_reader, Keyring};
use crate::store::HookStore;
use crate::telemetry::metric_inc;
use crate::types::{
    IdModel, Key, Message, MESSAGE_TYPE_TRANSACTION, MESSAGE_TYPE_UNDELIVERABLE_ALERT,
};

pub const HEADER_MESSAGE_SPECIFICATION: &str = "X-Message-Specification";
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Only this major version of the message format is understood.
pub const SUPPORTED_MAJOR_VERSION: &str = "1";

/// Parsed `X-Message-Specification: <type>@<version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpec {
    pub kind: String,
    pub version: String,
}

impl MessageSpec {
    pub fn parse(header: Option<&str>) -> Result<Self> {
        let invalid = || Error::BadRequest(format!("Invalid header {HEADER_MESSAGE_SPECIFICATION}"));
        let header = header.map(str::trim).ok_or_else(invalid)?;
        match header.split_once('@') {
            Some((kind, version)) if !kind.is_empty() && !version.is_empty() => Ok(Self {
                kind: kind.to_string(),
                version: version.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    pub fn major_version(&self) -> &str {
        self.version.split('.').next().unwrap_or_default()
    }

    pub fn is_supported(&self) -> bool {
        self.major_version() == SUPPORTED_MAJOR_VERSION
    }
}

/// Raw inbound request as handed over by the caller's HTTP layer.
#[derive(Debug)]
pub struct InboundDelivery<R> {
    pub specification: Option<String>,
    pub authorization: Option<String>,
    pub body: R,
}

impl InboundDelivery<std::io::Cursor<Vec<u8>>> {
    /// Delivery whose body is already in memory.
    pub fn from_bytes(
        specification: Option<String>,
        authorization: Option<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            specification,
            authorization,
            body: std::io::Cursor::new(body.into()),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
}

/// Verifies and dispatches inbound notifications.
pub struct NotificationProcessor {
    keyring: Keyring,
    notification_hook_id: String,
    handler: Arc<dyn MessageHandler>,
    alert_handler: Option<Arc<dyn MessageHandler>>,
    pipeline: DrainPipeline,
}

impl NotificationProcessor {
    pub fn new(
        config: &HookConfig,
        store: Arc<dyn HookStore>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            keyring: config.keyring(),
            notification_hook_id: config.notification_hook_id.clone(),
            pipeline: DrainPipeline::new(store, handler.clone()),
            handler,
            alert_handler: None,
        }
    }

    /// Route undeliverable alerts to `handler` instead of draining.
    pub fn with_alert_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.alert_handler = Some(handler);
        self
    }

    pub fn with_pipeline(mut self, pipeline: DrainPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Add a key, e.g. one returned by a fresh registration.
    pub fn add_key(&mut self, key: Key) {
        self.keyring.push(key);
    }

    /// Process one delivery and return the acknowledgement body.
    pub async fn process<R: Read + Send>(&self, delivery: InboundDelivery<R>) -> Result<IdModel> {
        let spec = MessageSpec::parse(delivery.specification.as_deref())?;
        if !spec.is_supported() {
            metric_inc("issuer.notifications.unsupported");
            return Err(Error::NotImplemented(format!(
                "message version {} of {}",
                spec.version, spec.kind
            )));
        }

        let body = verify_reader(
            &self.keyring,
            delivery.authorization.as_deref(),
            delivery.body,
        )?;

        if spec.kind != MESSAGE_TYPE_TRANSACTION && spec.kind != MESSAGE_TYPE_UNDELIVERABLE_ALERT {
            let envelope: Envelope = serde_json::from_slice(&body)?;
            debug!(kind = %spec.kind, message_id = %envelope.id, "acknowledging message");
            return Ok(IdModel::new(envelope.id));
        }

        let message: Message = serde_json::from_slice(&body)?;
        if !self.notification_hook_id.is_empty() && message.hook_id != self.notification_hook_id {
            debug!(
                hook_id = %message.hook_id,
                message_id = %message.id,
                "ignoring message for another hook"
            );
            return Ok(IdModel::new(message.id));
        }

        metric_inc("issuer.notifications.received");
        if spec.kind == MESSAGE_TYPE_UNDELIVERABLE_ALERT {
            self.on_undeliverable_alert(&message).await?;
        } else {
            self.handler.handle(&message).await?;
        }
        Ok(IdModel::new(message.id))
    }

    async fn on_undeliverable_alert(&self, alert: &Message) -> Result<()> {
        if let Some(handler) = &self.alert_handler {
            return handler.handle(alert).await;
        }

        let tail = alert.last_undeliverable_id().unwrap_or(&alert.id);
        info!(hook_id = %alert.hook_id, last_undeliverable = tail, "undeliverable alert received");
        self.pipeline
            .drain(&alert.hook_id, tail)
            .await
            .with_context(|| format!("drain undeliverable for hook {}", alert.hook_id))?;
        Ok(())
    }
}
