//! Backlog drain pipeline.
//!
//! Three stages joined by unbounded channels:
//!
//! ```text
//! producer (page fetch) --Message--> handler stage --id--> collector
//! ```
//!
//! Each stage owns its sender and drops it on every exit path, so the
//! downstream stage always observes end-of-stream. Once the stream is drained
//! every successfully handled id is dismissed in one batch call, including
//! after a fetch error, a cancellation or a panicking handler. A stage panic
//! is re-raised in the caller only after that dismissal.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, ResultExt};
use crate::store::HookStore;
use crate::telemetry::{metric_add, metric_inc};
use crate::types::Message;

/// Page size requested for the first backlog page.
pub const INITIAL_PAGE_SIZE: u32 = 20;

/// Caller-supplied processing for a single notification.
///
/// Backlog messages may be re-delivered after a crash between handling and
/// dismissal, so implementations must be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<()>;
}

/// [`MessageHandler`] backed by an async closure.
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<()> {
        (self.0)(message.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Outcome of a drain that reached the backlog tail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Ids acknowledged in the dismissal call, sorted.
    pub dismissed: Vec<String>,
    /// Messages whose handler failed; they stay in the backlog.
    pub skipped: usize,
    /// Pages fetched.
    pub pages: u32,
}

#[derive(Debug, Default)]
struct HandlerStats {
    skipped: usize,
}

#[derive(Debug, Default)]
struct Collected {
    ids: HashSet<String>,
    saw_tail: bool,
}

/// Fetches, handles and dismisses a hook's undeliverable backlog.
#[derive(Clone)]
pub struct DrainPipeline {
    store: Arc<dyn HookStore>,
    handler: Arc<dyn MessageHandler>,
    initial_page_size: u32,
}

impl DrainPipeline {
    pub fn new(store: Arc<dyn HookStore>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            store,
            handler,
            initial_page_size: INITIAL_PAGE_SIZE,
        }
    }

    pub fn with_initial_page_size(mut self, page_size: u32) -> Self {
        self.initial_page_size = page_size.max(1);
        self
    }

    /// Drain without an external cancellation signal.
    pub async fn drain(&self, hook_id: &str, last_undeliverable_id: &str) -> Result<DrainReport> {
        self.drain_with_cancel(hook_id, last_undeliverable_id, CancellationToken::new())
            .await
    }

    /// Drain the backlog of `hook_id`.
    ///
    /// Returns [`Error::IncompleteDrain`] when `last_undeliverable_id` was not
    /// handled successfully. Whatever was handled is dismissed first in every
    /// case.
    pub async fn drain_with_cancel(
        &self,
        hook_id: &str,
        last_undeliverable_id: &str,
        cancel: CancellationToken,
    ) -> Result<DrainReport> {
        info!(
            hook_id,
            last_undeliverable = last_undeliverable_id,
            "draining undeliverable messages"
        );

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (id_tx, id_rx) = mpsc::unbounded_channel();

        let producer = tokio::spawn(produce(
            self.store.clone(),
            hook_id.to_string(),
            self.initial_page_size,
            message_tx,
            cancel.clone(),
        ));
        let handler = tokio::spawn(handle_messages(
            self.handler.clone(),
            message_rx,
            id_tx,
            cancel.clone(),
        ));

        let collected = collect(id_rx, last_undeliverable_id).await;
        let fetched = producer.await;
        let stats = handler.await;

        let mut dismissed: Vec<String> = collected.ids.into_iter().collect();
        dismissed.sort();

        let dismissal = if dismissed.is_empty() {
            Ok(())
        } else {
            self.store
                .dismiss_undeliverable(hook_id, &dismissed)
                .await
                .context("dismissUndeliverable")
        };

        match &dismissal {
            Ok(()) if !dismissed.is_empty() => {
                metric_add("issuer.drain.dismissed", dismissed.len() as u64);
                info!(hook_id, count = dismissed.len(), "dismissed handled messages");
            }
            Ok(()) => {}
            Err(e) => warn!(hook_id, error = %e, "failed to dismiss handled messages"),
        }

        let fetched = finish_stage(fetched);
        let stats = finish_stage(stats);

        let pages = fetched??;
        dismissal?;
        let stats = stats?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !last_undeliverable_id.is_empty() && !collected.saw_tail {
            metric_inc("issuer.drain.incomplete");
            return Err(Error::IncompleteDrain {
                message_id: last_undeliverable_id.to_string(),
            });
        }

        Ok(DrainReport {
            dismissed,
            skipped: stats.skipped,
            pages,
        })
    }
}

/// Re-raise a stage panic in the caller; an aborted stage counts as cancelled.
fn finish_stage<T>(joined: std::result::Result<T, JoinError>) -> Result<T> {
    match joined {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(Error::Cancelled),
    }
}

/// Emit every backlog message in page order, then item order.
async fn produce(
    store: Arc<dyn HookStore>,
    hook_id: String,
    initial_page_size: u32,
    out: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
) -> Result<u32> {
    let mut page_size = initial_page_size;
    let mut page_number = 1u32;

    loop {
        let page = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(hook_id = %hook_id, page_number, "backlog fetch cancelled");
                return Ok(page_number - 1);
            }
            page = store.get_undeliverable(&hook_id, page_size, page_number) => {
                page.with_context(|| format!("getUndeliverable page {page_number}"))?
            }
        };

        debug!(
            hook_id = %hook_id,
            page_number,
            items = page.items.len(),
            more = page.more,
            "fetched undeliverable page"
        );

        for message in page.items {
            if cancel.is_cancelled() || out.send(message).is_err() {
                return Ok(page_number);
            }
        }

        if !page.more {
            return Ok(page_number);
        }
        if page.page_size > 0 {
            page_size = page.page_size;
        }
        page_number += 1;
    }
}

/// Run the handler on each message; forward the ids that succeeded.
async fn handle_messages(
    handler: Arc<dyn MessageHandler>,
    mut messages: mpsc::UnboundedReceiver<Message>,
    out: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) -> HandlerStats {
    let mut stats = HandlerStats::default();

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match handler.handle(&message).await {
            Ok(()) => {
                metric_inc("issuer.drain.handled");
                if out.send(message.id).is_err() {
                    break;
                }
            }
            Err(e) => {
                stats.skipped += 1;
                metric_inc("issuer.drain.skipped");
                warn!(message_id = %message.id, error = %e, "error handling undelivered message");
            }
        }
    }

    stats
}

/// Gather forwarded ids until the handler stage closes its sender.
async fn collect(mut ids: mpsc::UnboundedReceiver<String>, tail_id: &str) -> Collected {
    let mut collected = Collected::default();
    while let Some(id) = ids.recv().await {
        if id == tail_id {
            collected.saw_tail = true;
        }
        collected.ids.insert(id);
    }
    collected
}
