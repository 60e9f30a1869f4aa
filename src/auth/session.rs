// Session teardown after an unrecoverable authentication failure

use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::store::TokenStore;
use super::types::SessionEvent;

/// Pages that tolerate a missing session
const DEFAULT_PUBLIC_PREFIXES: &[&str] = &[
    "/test-store",
    "/demo",
    "/home",
    "/shop",
    "/auth",
    "/payment",
];

/// Host shell the client runs in: exposes the current page and can move away from it
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> Option<String>;
    fn navigate(&self, path: &str);
}

/// Navigator for headless use: no current page, navigation is only logged
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn current_path(&self) -> Option<String> {
        None
    }

    fn navigate(&self, path: &str) {
        tracing::info!(target_path = %path, "Session ended, sign in again");
    }
}

/// Predicate deciding which pages may stay open without a session
#[derive(Clone)]
pub struct PublicRoutes(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl PublicRoutes {
    /// Match `prefixes` on path segment boundaries, plus the root page
    pub fn prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
        Self(Arc::new(move |path: &str| {
            path == "/" || prefixes.iter().any(|p| matches_prefix(path, p))
        }))
    }

    pub fn from_fn(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Every page requires a session
    pub fn none() -> Self {
        Self::from_fn(|_| false)
    }

    pub fn is_public(&self, path: &str) -> bool {
        (self.0)(path)
    }
}

impl Default for PublicRoutes {
    fn default() -> Self {
        Self::prefixes(DEFAULT_PUBLIC_PREFIXES.iter().copied())
    }
}

impl fmt::Debug for PublicRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PublicRoutes(..)")
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

/// What teardown did with the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    RedirectedToLogin,
    StayedOnPublicPage,
}

/// Clears session state, broadcasts the failure and redirects when needed
pub struct SessionGuard {
    store: Arc<dyn TokenStore>,
    events: broadcast::Sender<SessionEvent>,
    navigator: Arc<dyn Navigator>,
    public_routes: PublicRoutes,
    login_path: String,
}

impl SessionGuard {
    pub fn new(
        store: Arc<dyn TokenStore>,
        events: broadcast::Sender<SessionEvent>,
        navigator: Arc<dyn Navigator>,
        public_routes: PublicRoutes,
        login_path: String,
    ) -> Self {
        Self {
            store,
            events,
            navigator,
            public_routes,
            login_path,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Unrecoverable auth failure: drop tokens and profile, emit
    /// [`SessionEvent::Unauthorized`], redirect unless on a public page.
    pub fn handle_auth_failure(&self) -> TeardownOutcome {
        self.store.clear_tokens();
        // No subscribers is fine
        let _ = self.events.send(SessionEvent::Unauthorized);

        let current = self.navigator.current_path();
        match current {
            Some(ref path) if self.public_routes.is_public(path) => {
                tracing::info!(path = %path, "Auth failure on public page, staying");
                TeardownOutcome::StayedOnPublicPage
            }
            _ => {
                tracing::warn!(
                    from = current.as_deref().unwrap_or("-"),
                    to = %self.login_path,
                    "Auth failure, redirecting to login"
                );
                self.navigator.navigate(&self.login_path);
                TeardownOutcome::RedirectedToLogin
            }
        }
    }

    /// Explicit logout: same cleanup, different event, no redirect
    pub fn end_session(&self) {
        self.store.clear_tokens();
        let _ = self.events.send(SessionEvent::LoggedOut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryTokenStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeNavigator {
        current: Option<String>,
        visited: Mutex<Vec<String>>,
    }

    impl Navigator for FakeNavigator {
        fn current_path(&self) -> Option<String> {
            self.current.clone()
        }

        fn navigate(&self, path: &str) {
            self.visited.lock().unwrap().push(path.to_string());
        }
    }

    fn guard_at(path: &str) -> (SessionGuard, Arc<MemoryTokenStore>, Arc<FakeNavigator>) {
        let store = Arc::new(MemoryTokenStore::with_tokens("a1", "r1"));
        let navigator = Arc::new(FakeNavigator {
            current: Some(path.to_string()),
            ..Default::default()
        });
        let (tx, _) = broadcast::channel(8);
        let guard = SessionGuard::new(
            store.clone(),
            tx,
            navigator.clone(),
            PublicRoutes::default(),
            "/login".to_string(),
        );
        (guard, store, navigator)
    }

    #[test]
    fn test_default_public_routes() {
        let routes = PublicRoutes::default();
        assert!(routes.is_public("/"));
        assert!(routes.is_public("/shop"));
        assert!(routes.is_public("/shop/abc"));
        assert!(routes.is_public("/auth/reset?token=x"));
        assert!(routes.is_public("/payment/success"));
        assert!(!routes.is_public("/shopping"));
        assert!(!routes.is_public("/dashboard"));
        assert!(!routes.is_public("/companies/1"));
    }

    #[test]
    fn test_custom_public_routes() {
        let routes = PublicRoutes::from_fn(|p| p.starts_with("/kiosk"));
        assert!(routes.is_public("/kiosk/1"));
        assert!(!routes.is_public("/"));
        assert!(!PublicRoutes::none().is_public("/shop"));
    }

    #[tokio::test]
    async fn test_failure_on_public_page_stays() {
        let (guard, store, navigator) = guard_at("/shop/abc");
        let mut events = guard.subscribe();

        assert_eq!(guard.handle_auth_failure(), TeardownOutcome::StayedOnPublicPage);
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Unauthorized);
        assert!(navigator.visited.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_on_private_page_redirects() {
        let (guard, store, navigator) = guard_at("/dashboard");
        let mut events = guard.subscribe();

        assert_eq!(guard.handle_auth_failure(), TeardownOutcome::RedirectedToLogin);
        assert!(store.access_token().is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Unauthorized);
        assert_eq!(*navigator.visited.lock().unwrap(), vec!["/login".to_string()]);
    }

    #[test]
    fn test_end_session_does_not_redirect() {
        let (guard, store, navigator) = guard_at("/dashboard");
        let mut events = guard.subscribe();

        guard.end_session();
        assert!(store.access_token().is_none());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
        assert!(navigator.visited.lock().unwrap().is_empty());
    }
}
