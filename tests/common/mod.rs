#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use issuer_hooks::{
    Error, Hook, HookPage, HookRequest, HookStore, Message, MessageHandler, MessagePage, Result,
};

/// In-memory provider with scripted pages and failures.
#[derive(Debug, Default)]
pub struct FakeState {
    /// `list_hooks` pages, by page number starting at 1.
    pub hook_pages: Vec<Vec<Hook>>,
    /// Backlog pages, by page number starting at 1.
    pub backlog_pages: Vec<Vec<Message>>,
    /// Page size reported back on backlog pages.
    pub backlog_page_size: u32,
    pub fail_backlog_page: Option<u32>,
    /// Backlog page whose fetch never completes.
    pub stall_backlog_page: Option<u32>,
    pub fail_dismiss: bool,
    pub fail_delete: HashSet<String>,
    /// Hooks whose delete answers 404.
    pub missing_hooks: HashSet<String>,
    pub next_hook_id: String,

    pub ops: Vec<String>,
    pub backlog_requests: Vec<(u32, u32)>,
    pub dismissed: Vec<Vec<String>>,
    pub created: Vec<HookRequest>,
    pub scope_updates: Vec<(String, Vec<i64>)>,
    pub deleted: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeStore {
    pub state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn new(state: FakeState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_hooks(hooks: Vec<Hook>) -> Self {
        Self::new(FakeState {
            hook_pages: vec![hooks],
            next_hook_id: "new-hook".to_string(),
            ..Default::default()
        })
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl HookStore for FakeStore {
    async fn list_hooks(&self, page_number: u32, _page_size: u32) -> Result<HookPage> {
        let mut state = self.state();
        state.ops.push(format!("listHooks:{page_number}"));
        let index = page_number as usize - 1;
        let items = state.hook_pages.get(index).cloned().unwrap_or_default();
        Ok(HookPage {
            total_items: state.hook_pages.iter().map(Vec::len).sum::<usize>() as u32,
            page_size: items.len() as u32,
            more: index + 1 < state.hook_pages.len(),
            items,
        })
    }

    async fn get_hook(&self, hook_id: &str) -> Result<Hook> {
        let state = self.state();
        state
            .hook_pages
            .iter()
            .flatten()
            .find(|hook| hook.id == hook_id)
            .cloned()
            .ok_or_else(|| Error::provider(404, "not_found", "Hook not found"))
    }

    async fn add_hook(&self, request: &HookRequest) -> Result<String> {
        let mut state = self.state();
        state.ops.push("addHook".to_string());
        state.created.push(request.clone());
        Ok(state.next_hook_id.clone())
    }

    async fn update_hook_scope(&self, hook_id: &str, scope: &[i64]) -> Result<()> {
        let mut state = self.state();
        state.ops.push(format!("updateHookScope:{hook_id}"));
        state.scope_updates.push((hook_id.to_string(), scope.to_vec()));
        Ok(())
    }

    async fn delete_hook(&self, hook_id: &str) -> Result<()> {
        let mut state = self.state();
        state.ops.push(format!("deleteHook:{hook_id}"));
        if state.fail_delete.contains(hook_id) {
            return Err(Error::provider(500, "server_error", "boom"));
        }
        if state.missing_hooks.contains(hook_id) {
            return Err(Error::provider(404, "not_found", "Hook not found"));
        }
        state.deleted.push(hook_id.to_string());
        Ok(())
    }

    async fn get_undeliverable(
        &self,
        _hook_id: &str,
        page_size: u32,
        page_number: u32,
    ) -> Result<MessagePage> {
        let stall = {
            let mut state = self.state();
            state.ops.push(format!("getUndeliverable:{page_number}"));
            state.backlog_requests.push((page_number, page_size));
            state.stall_backlog_page == Some(page_number)
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let state = self.state();
        if state.fail_backlog_page == Some(page_number) {
            return Err(Error::provider(500, "server_error", "backlog unavailable"));
        }
        let index = page_number as usize - 1;
        Ok(MessagePage {
            items: state.backlog_pages.get(index).cloned().unwrap_or_default(),
            page_size: state.backlog_page_size,
            more: index + 1 < state.backlog_pages.len(),
        })
    }

    async fn dismiss_undeliverable(&self, _hook_id: &str, message_ids: &[String]) -> Result<()> {
        let mut state = self.state();
        state.ops.push("dismissUndeliverable".to_string());
        if state.fail_dismiss {
            return Err(Error::provider(500, "server_error", "dismiss failed"));
        }
        state.dismissed.push(message_ids.to_vec());
        Ok(())
    }
}

/// Handler that records every message and fails on chosen ids.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub handled: Mutex<Vec<String>>,
    fail_on: HashSet<String>,
}

impl RecordingHandler {
    pub fn failing_on(ids: &[&str]) -> Self {
        Self {
            handled: Mutex::new(Vec::new()),
            fail_on: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> Result<()> {
        self.handled.lock().unwrap().push(message.id.clone());
        if self.fail_on.contains(&message.id) {
            return Err(Error::BadRequest(format!("cannot handle {}", message.id)));
        }
        Ok(())
    }
}

pub fn message(id: &str, hook_id: &str) -> Message {
    Message {
        id: id.to_string(),
        hook_id: hook_id.to_string(),
        kind: "transaction".to_string(),
        version: "1.0.0".to_string(),
        ..Default::default()
    }
}

pub fn hook(id: &str, uri: &str, key_id: &str, scope: &[i64]) -> Hook {
    Hook {
        id: id.to_string(),
        uri: uri.to_string(),
        scope: scope.to_vec(),
        filter_spec: "*".to_string(),
        enabled: true,
        reliability_mode: "store_undeliverable".to_string(),
        hmac_key_id: key_id.to_string(),
        ..Default::default()
    }
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
