use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Hook, HookPage, HookRequest, MessagePage};

/// Provider operations the reconciler and the drain pipeline rely on.
///
/// [`RestClient`](crate::RestClient) is the production implementation.
#[async_trait]
pub trait HookStore: Send + Sync {
    async fn list_hooks(&self, page_number: u32, page_size: u32) -> Result<HookPage>;

    async fn get_hook(&self, hook_id: &str) -> Result<Hook>;

    /// Returns the id of the created hook.
    async fn add_hook(&self, request: &HookRequest) -> Result<String>;

    async fn update_hook_scope(&self, hook_id: &str, scope: &[i64]) -> Result<()>;

    async fn delete_hook(&self, hook_id: &str) -> Result<()>;

    async fn get_undeliverable(
        &self,
        hook_id: &str,
        page_size: u32,
        page_number: u32,
    ) -> Result<MessagePage>;

    async fn dismiss_undeliverable(&self, hook_id: &str, message_ids: &[String]) -> Result<()>;
}
