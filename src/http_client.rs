use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::auth::{
    LogNavigator, LoginRequest, LoginResponse, MemoryTokenStore, Navigator, PublicRoutes,
    RefreshCoordinator, SessionEvent, SessionGuard, TokenStore,
};
use crate::config::Config;
use crate::error::{ApiError, Result, TransportKind};
use crate::notify::{self, Failure, Notifier, TracingNotifier};
use crate::request::{
    join_url, tenant_subdomain, ApiRequest, RequestContext, HEADER_COMPANY_SUBDOMAIN,
    HEADER_REQUEST_ID, HEADER_SUBDOMAIN,
};
use crate::retry::RetryPolicy;

/// Response of a successful call
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    async fn read(response: Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_value(Value::Null)
                .map_err(|e| ApiError::Decode(format!("empty response body: {}", e)));
        }
        serde_json::from_slice(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client for the admin API.
///
/// Handles automatically:
/// - path normalization and auth/tenant/tracing headers
/// - 503: exponential backoff, bounded retries
/// - 401: single-flight token refresh, one reissue per request
/// - user-facing notification of the terminal failure
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    config: Arc<Config>,

    store: Arc<dyn TokenStore>,

    refresher: RefreshCoordinator,

    guard: Arc<SessionGuard>,

    notifier: Arc<dyn Notifier>,

    retry: RetryPolicy,
}

/// Builder for [`ApiClient`]
pub struct ApiClientBuilder {
    config: Config,
    store: Option<Arc<dyn TokenStore>>,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    public_routes: PublicRoutes,
    event_capacity: usize,
}

impl ApiClientBuilder {
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn public_routes(mut self, routes: PublicRoutes) -> Self {
        self.public_routes = routes;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(self.config.http_connect_timeout))
            .timeout(Duration::from_secs(self.config.http_request_timeout))
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let config = Arc::new(Config {
            base_url: self.config.base_url.trim_end_matches('/').to_string(),
            ..self.config
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));

        let (events, _) = broadcast::channel(self.event_capacity);
        let guard = Arc::new(SessionGuard::new(
            store.clone(),
            events,
            self.navigator,
            self.public_routes,
            config.login_path.clone(),
        ));

        // Refresh goes through the bare client, outside the retry/refresh pipeline
        let refresher =
            RefreshCoordinator::new(client.clone(), &config.base_url, store.clone(), guard.clone());

        tracing::debug!(base_url = %config.base_url, "API client initialized");

        Ok(ApiClient {
            client,
            retry: RetryPolicy::from_config(&config),
            config,
            store,
            refresher,
            guard,
            notifier: self.notifier,
        })
    }
}

impl ApiClient {
    pub fn builder(config: Config) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store: None,
            notifier: Arc::new(TracingNotifier),
            navigator: Arc::new(LogNavigator),
            public_routes: PublicRoutes::default(),
            event_capacity: 16,
        }
    }

    /// Create a client with default notifier, navigator and public routes
    pub fn new(config: Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        Self::builder(config).token_store(store).build()
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Session notifications (`Unauthorized`, `LoggedOut`)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.guard.subscribe()
    }

    /// Send a request through the full pipeline.
    ///
    /// A cancelled request returns [`ApiError::Cancelled`]; a refresh it was
    /// waiting on keeps running for the other callers.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        if let Some(e) = request.body_error() {
            tracing::error!(
                method = %request.method,
                path = %request.path,
                error = %e,
                "Failed to serialize request body"
            );
            return Err(ApiError::Encode(e.to_string()));
        }

        match request.cancel.clone() {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(path = %request.path, "Request cancelled by caller");
                        Err(ApiError::Cancelled)
                    }
                    result = self.execute(&request) => result,
                }
            }
            None => self.execute(&request).await,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)).await?.json()
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)).await?.json()
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::patch(path).json(body)).await?.json()
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::delete(path)).await?.json()
    }

    /// Log in, persisting the token pair and the user profile
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<Value>> {
        let request = ApiRequest::post("auth/login")
            .json(&LoginRequest { email, password })
            .without_auth_refresh();
        let data: LoginResponse = self.send(request).await?.json()?;

        self.store.set_tokens(data.access_token, data.refresh_token);
        self.store.set_user_profile(data.user.clone());

        tracing::info!("Logged in as {}", email);
        Ok(data.user)
    }

    /// Log out: tell the server (best effort), then drop the local session
    pub async fn logout(&self) {
        let request = ApiRequest::post("auth/logout")
            .skip_error_toast()
            .without_auth_refresh();
        if let Err(e) = self.send(request).await {
            tracing::debug!(error = %e, "Server-side logout failed, clearing local session anyway");
        }
        self.guard.end_session();
        tracing::info!("Logged out");
    }

    /// Cached profile from the last login
    pub fn current_user(&self) -> Option<Value> {
        self.store.user_profile()
    }

    /// Headers attached to every outgoing request. Steps that cannot be
    /// computed are skipped.
    pub fn context_headers(&self, ctx: &RequestContext, token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let bearer = token
            .map(str::to_string)
            .or_else(|| self.store.access_token())
            .filter(|t| !t.is_empty())
            .or_else(|| self.dev_fallback_token());
        if let Some(bearer) = bearer {
            insert_header(&mut headers, "authorization", &format!("Bearer {}", bearer));
        }

        if let Some(tenant) = self.config.host.as_deref().and_then(tenant_subdomain) {
            insert_header(&mut headers, HEADER_COMPANY_SUBDOMAIN, &tenant);
            if self.config.legacy_subdomain_header {
                insert_header(&mut headers, HEADER_SUBDOMAIN, &tenant);
            }
        }

        insert_header(&mut headers, HEADER_REQUEST_ID, &ctx.request_id);

        headers
    }

    #[cfg(feature = "dev-mock-auth")]
    fn dev_fallback_token(&self) -> Option<String> {
        let token = self.config.dev_fallback_token.clone();
        if token.is_some() {
            tracing::warn!("No session, using ADMIN_DEV_TOKEN (dev-mock-auth build)");
        }
        token
    }

    #[cfg(not(feature = "dev-mock-auth"))]
    fn dev_fallback_token(&self) -> Option<String> {
        None
    }

    fn build_request(
        &self,
        request: &ApiRequest,
        ctx: &RequestContext,
        url: &str,
        token: Option<&str>,
    ) -> RequestBuilder {
        let mut builder = self
            .client
            .request(ctx.method.clone(), url)
            .headers(self.context_headers(ctx, token));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        builder
    }

    /// Internal method that handles retry and refresh
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut ctx = RequestContext::new(request);
        let url = join_url(&self.config.base_url, &ctx.path);
        let mut token: Option<String> = None;

        tracing::debug!(
            method = %ctx.method,
            url = %url,
            request_id = %ctx.request_id,
            "Sending HTTP request"
        );

        loop {
            let sent_token = token.clone().or_else(|| self.store.access_token());
            let builder = self.build_request(request, &ctx, &url, token.as_deref());

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => return Err(self.transport_failure(&ctx, &url, e)),
            };

            let status = response.status();
            tracing::debug!(
                status = %status,
                request_id = %ctx.request_id,
                "Received HTTP response"
            );

            if status.is_success() {
                return ApiResponse::read(response).await;
            }

            match status.as_u16() {
                // 503: backoff and reissue
                503 if self.retry.allows(ctx.retry_count) => {
                    ctx.retry_count += 1;
                    let delay = self.retry.delay_for(ctx.retry_count);
                    tracing::warn!(
                        "Received {}, retrying after {}ms (attempt {}/{})",
                        status,
                        delay.as_millis(),
                        ctx.retry_count,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }

                // 401: refresh once, reissue with the new token
                401 if !ctx.auth_retried => {
                    ctx.auth_retried = true;

                    // Token already rotated since this request went out
                    let current = self.store.access_token();
                    if current.is_some() && current != sent_token {
                        tracing::debug!("Received 401 for a superseded token, reissuing");
                        token = current;
                        continue;
                    }

                    tracing::warn!(
                        request_id = %ctx.request_id,
                        "Received 401, refreshing token..."
                    );
                    token = Some(self.refresher.refresh().await?);
                    continue;
                }

                _ => {}
            }

            return Err(self.status_failure(&ctx, &url, response).await);
        }
    }

    async fn status_failure(
        &self,
        ctx: &RequestContext,
        url: &str,
        response: Response,
    ) -> ApiError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = parse_body(&text);

        match status.as_u16() {
            401 => tracing::debug!(url = %url, "Received 401, not refreshing again"),
            // Permission errors are not session errors
            403 => tracing::warn!(
                url = %url,
                method = %ctx.method,
                request_id = %ctx.request_id,
                "Permission denied"
            ),
            503 => tracing::error!(
                url = %url,
                attempts = ctx.retry_count + 1,
                "Service unavailable after all retries"
            ),
            _ => tracing::error!(
                status = status.as_u16(),
                url = %url,
                response_body = %text,
                request_id = %ctx.request_id,
                "HTTP request failed with error response"
            ),
        }

        let failure = Failure::Status {
            status: status.as_u16(),
            body: body.as_ref(),
        };
        self.report(failure, ctx);

        let message = notify::extract_message(body.as_ref()).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or(notify::FALLBACK_MESSAGE)
                .to_string()
        });

        ApiError::Http {
            status: status.as_u16(),
            message,
            body,
        }
    }

    fn transport_failure(&self, ctx: &RequestContext, url: &str, e: reqwest::Error) -> ApiError {
        let kind = TransportKind::of(&e);
        tracing::error!(
            error_kind = %kind,
            error = %e,
            url = %url,
            request_id = %ctx.request_id,
            "HTTP request error"
        );
        self.report(Failure::Transport { kind }, ctx);
        ApiError::Transport {
            kind,
            message: e.to_string(),
        }
    }

    fn report(&self, failure: Failure<'_>, ctx: &RequestContext) {
        if let Some(notice) = notify::classify(failure, ctx, &self.config.best_effort_endpoints) {
            self.notifier.notify(&notice);
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = %name, "Skipping header with invalid value"),
    }
}

fn parse_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}
