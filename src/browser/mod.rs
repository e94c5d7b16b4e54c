pub mod pool;
pub mod session;

// Re-export common types
pub use pool::{PoolError, SessionHandle, SessionPool};
pub use session::{BrowserSession, SessionFactory, WebDriverFactory, WebDriverSession};
