// Single-flight token refresh

use futures::FutureExt;
use reqwest::Client;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::session::SessionGuard;
use super::store::TokenStore;
use super::types::{RefreshRequest, RefreshResponse};
use crate::error::RefreshError;

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

/// Refresh gate and the callers waiting on it
#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    waiters: Vec<Waiter>,
}

struct Inner {
    client: Client,
    refresh_url: String,
    store: Arc<dyn TokenStore>,
    guard: Arc<SessionGuard>,
    state: Mutex<RefreshState>,
}

/// Coordinates token refreshes so that concurrent 401s share one refresh call.
///
/// Every caller is queued; the caller that finds no refresh in flight also
/// starts one. The refresh runs on its own task, so dropping any caller never
/// aborts it. Queued callers are released in arrival order once it settles.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// `client` must be a bare client: the refresh call is not intercepted.
    pub fn new(
        client: Client,
        base_url: &str,
        store: Arc<dyn TokenStore>,
        guard: Arc<SessionGuard>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                refresh_url: format!("{}/auth/refresh", base_url.trim_end_matches('/')),
                store,
                guard,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// Obtain a fresh access token, joining an in-flight refresh if there is one
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();

        // Flag is set before any await so a concurrent 401 cannot start a second refresh
        let start = {
            let mut state = lock(&self.inner.state);
            state.waiters.push(tx);
            !std::mem::replace(&mut state.refreshing, true)
        };

        if start {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run().await });
        } else {
            tracing::debug!("Refresh already in flight, queued");
        }

        rx.await.unwrap_or(Err(RefreshError::Aborted))
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.state).refreshing
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let outcome = AssertUnwindSafe(self.refresh_once())
            .catch_unwind()
            .await
            .unwrap_or(Err(RefreshError::Aborted));

        match &outcome {
            Ok(_) => tracing::info!("Access token refreshed"),
            Err(e) => {
                tracing::error!(error = %e, "Token refresh failed");
                self.guard.handle_auth_failure();
            }
        }

        let waiters = {
            let mut state = lock(&self.state);
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };

        tracing::debug!(waiters = waiters.len(), "Releasing queued requests");
        for waiter in waiters {
            // Receiver gone means that caller was cancelled
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn refresh_once(&self) -> Result<String, RefreshError> {
        let refresh_token = self
            .store
            .refresh_token()
            .ok_or(RefreshError::MissingRefreshToken)?;

        tracing::debug!(url = %self.refresh_url, "Refreshing access token...");

        let response = self
            .client
            .post(&self.refresh_url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let data: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;

        if data.access_token.is_empty() || data.refresh_token.is_empty() {
            return Err(RefreshError::MalformedResponse(
                "response does not contain both tokens".to_string(),
            ));
        }

        // Old refresh token is invalid from here on
        self.store.set_tokens(data.access_token.clone(), data.refresh_token);

        Ok(data.access_token)
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
