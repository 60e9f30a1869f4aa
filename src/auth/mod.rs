// Authentication module
// Token storage, single-flight refresh and session teardown

mod refresh;
mod session;
mod store;
mod types;

pub use refresh::RefreshCoordinator;
pub use session::{LogNavigator, Navigator, PublicRoutes, SessionGuard, TeardownOutcome};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use types::{LoginRequest, LoginResponse, SessionEvent, StoredSession};
