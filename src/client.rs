//! reqwest-backed REST collaborator.
//!
//! The HTTP client is built lazily, once, on first use. Every call except the
//! token exchange carries a bearer token obtained from the
//! [`CredentialBroker`]; the token exchange authenticates with the static
//! client id and secret instead.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credentials::{CredentialBroker, TokenSource};
use crate::error::{Error, Result};
use crate::store::HookStore;
use crate::types::{
    Hook, HookPage, HookRequest, IdModel, Message, MessageIdsRequest, MessagePage,
    ProviderErrorBody, TokenResponse,
};

pub const PATH_TOKEN: &str = "/3.0/token";
const PATH_HOOKS: &str = "/3.0/hooks";

const CONTENT_TYPE_JSON: &str = "application/json";

const HEADER_PAGE_SIZE: &str = "X-PageSize";
const HEADER_TOTAL_PAGES: &str = "X-TotalPages";
const HEADER_TOTAL_ITEMS: &str = "X-Totalitems";

const QUERY_PAGE_NUMBER: &str = "page_number";
const QUERY_PAGE_SIZE: &str = "page_size";

/// Lazily-built HTTP client shared by the token endpoint and the API calls.
struct Transport {
    config: ClientConfig,
    http: OnceCell<reqwest::Client>,
}

impl Transport {
    async fn client(&self) -> Result<&reqwest::Client> {
        self.http
            .get_or_try_init(|| async {
                debug!(host = %self.config.host_url, "building HTTP client");
                let mut headers = HeaderMap::new();
                headers.insert(ACCEPT, HeaderValue::from_static(CONTENT_TYPE_JSON));
                reqwest::Client::builder()
                    .timeout(self.config.request_timeout())
                    .default_headers(headers)
                    .build()
                    .map_err(Error::from)
            })
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.host_url.trim_end_matches('/'), path)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let client = self.client().await?;
        let request = builder.build()?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "provider request");

        let started = Instant::now();
        let response = client.execute(request).await?;
        debug!(
            %method,
            %url,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "provider response"
        );
        check_status(response, self.config.debug).await
    }
}

/// Map non-2xx responses to [`Error::Provider`].
async fn check_status(response: Response, log_body: bool) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if log_body {
        warn!(status = status.as_u16(), body = %body, "provider error body");
    }
    let parsed: ProviderErrorBody = serde_json::from_str(&body).unwrap_or_default();
    Err(Error::provider(status.as_u16(), parsed.code, parsed.description))
}

fn header_u32(response: &Response, name: &str) -> u32 {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Client-credentials token exchange.
struct TokenEndpoint {
    transport: Arc<Transport>,
}

#[async_trait]
impl TokenSource for TokenEndpoint {
    async fn fetch_token(&self) -> Result<TokenResponse> {
        let client = self.transport.client().await?;
        let config = &self.transport.config;
        let builder = client
            .post(self.transport.url(PATH_TOKEN))
            .basic_auth(&config.rest_id, Some(&config.rest_secret))
            .form(&[("grant_type", "client_credentials")]);

        let response = self.transport.execute(builder).await?;
        Ok(response.json::<TokenResponse>().await?)
    }
}

/// Authenticated client for the provider's hook and backlog endpoints.
#[derive(Clone)]
pub struct RestClient {
    transport: Arc<Transport>,
    broker: CredentialBroker,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("config", &self.transport.config)
            .field("broker", &self.broker)
            .finish()
    }
}

impl RestClient {
    pub fn new(config: ClientConfig) -> Self {
        let transport = Arc::new(Transport {
            config,
            http: OnceCell::new(),
        });
        let broker = CredentialBroker::new(Arc::new(TokenEndpoint {
            transport: transport.clone(),
        }));
        Self { transport, broker }
    }

    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    /// Builder for an authenticated call.
    ///
    /// The HTTP client is initialized before any token logic runs.
    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let client = self.transport.client().await?;
        let bearer = self.broker.bearer().await?;
        Ok(client
            .request(method, self.transport.url(path))
            .bearer_auth(bearer))
    }

    fn hook_path(hook_id: &str) -> String {
        format!("{PATH_HOOKS}/{hook_id}")
    }
}

#[async_trait]
impl HookStore for RestClient {
    async fn list_hooks(&self, page_number: u32, page_size: u32) -> Result<HookPage> {
        debug!(page_number, page_size, "listing notification hooks");
        let builder = self.request(Method::GET, PATH_HOOKS).await?.query(&[
            (QUERY_PAGE_NUMBER, page_number),
            (QUERY_PAGE_SIZE, page_size),
        ]);
        let response = self.transport.execute(builder).await?;

        let total_pages = header_u32(&response, HEADER_TOTAL_PAGES);
        let mut page = HookPage {
            items: Vec::new(),
            page_size: header_u32(&response, HEADER_PAGE_SIZE),
            total_items: header_u32(&response, HEADER_TOTAL_ITEMS),
            more: total_pages > page_number,
        };
        if response.status() != StatusCode::NO_CONTENT {
            page.items = response.json::<Vec<Hook>>().await?;
        }
        Ok(page)
    }

    async fn get_hook(&self, hook_id: &str) -> Result<Hook> {
        debug!(hook_id, "getting notification hook");
        let builder = self.request(Method::GET, &Self::hook_path(hook_id)).await?;
        let response = self.transport.execute(builder).await?;
        Ok(response.json::<Hook>().await?)
    }

    async fn add_hook(&self, request: &HookRequest) -> Result<String> {
        info!(uri = ?request.uri, scope = ?request.scope, "adding notification hook");
        let builder = self.request(Method::POST, PATH_HOOKS).await?.json(request);
        let response = self.transport.execute(builder).await?;
        Ok(response.json::<IdModel>().await?.id)
    }

    async fn update_hook_scope(&self, hook_id: &str, scope: &[i64]) -> Result<()> {
        info!(hook_id, ?scope, "updating notification hook scope");
        let body = HookRequest::scope_update(scope.to_vec());
        let builder = self
            .request(Method::PATCH, &Self::hook_path(hook_id))
            .await?
            .json(&body);
        self.transport.execute(builder).await?;
        Ok(())
    }

    async fn delete_hook(&self, hook_id: &str) -> Result<()> {
        info!(hook_id, "deleting notification hook");
        let builder = self.request(Method::DELETE, &Self::hook_path(hook_id)).await?;
        self.transport.execute(builder).await?;
        Ok(())
    }

    async fn get_undeliverable(
        &self,
        hook_id: &str,
        page_size: u32,
        page_number: u32,
    ) -> Result<MessagePage> {
        debug!(hook_id, page_number, page_size, "getting undeliverable messages");
        let path = format!("{}/undeliverable", Self::hook_path(hook_id));
        let builder = self.request(Method::GET, &path).await?.query(&[
            (QUERY_PAGE_NUMBER, page_number),
            (QUERY_PAGE_SIZE, page_size),
        ]);
        let response = self.transport.execute(builder).await?;

        let total_pages = header_u32(&response, HEADER_TOTAL_PAGES);
        let mut page = MessagePage {
            items: Vec::new(),
            page_size: header_u32(&response, HEADER_PAGE_SIZE),
            more: total_pages > page_number,
        };
        if response.status() != StatusCode::NO_CONTENT {
            page.items = response.json::<Vec<Message>>().await?;
        }
        Ok(page)
    }

    async fn dismiss_undeliverable(&self, hook_id: &str, message_ids: &[String]) -> Result<()> {
        info!(hook_id, count = message_ids.len(), "dismissing undeliverable messages");
        let path = format!("{}/undeliverable/dismiss", Self::hook_path(hook_id));
        let body = MessageIdsRequest {
            message_ids: message_ids.to_vec(),
        };
        let builder = self.request(Method::POST, &path).await?.json(&body);
        self.transport.execute(builder).await?;
        Ok(())
    }
}
