use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::session::{BrowserSession, SessionFactory};

/// Errors raised by the session pool
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Session pool size must be at least 1")]
    EmptyPool,

    #[error("Failed to start browser session: {0:#}")]
    SessionStart(anyhow::Error),

    #[error("No browser session became available within {0:?}")]
    Timeout(Duration),

    #[error("Session pool is closed")]
    Closed,
}

impl PoolError {
    /// Whether the caller can try the same task again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Timeout(_))
    }
}

struct IdleSession {
    id: Uuid,
    session: Arc<dyn BrowserSession>,
}

struct PoolShared {
    /// Sessions not currently checked out
    idle: Mutex<VecDeque<IdleSession>>,

    /// One permit per idle session
    permits: Semaphore,

    /// Available-count gauge
    available: AtomicUsize,

    closed: AtomicBool,

    /// Every session the pool owns, for shutdown
    sessions: Vec<Arc<dyn BrowserSession>>,

    size: usize,
}

impl PoolShared {
    /// Clean a session and put it back into the idle set
    async fn check_in(&self, idle: IdleSession) {
        if let Err(e) = idle.session.close_extra_tabs().await {
            warn!("Cleanup failed for session {}: {:#}", idle.id, e);
        }

        let id = idle.id;
        self.idle.lock().await.push_back(idle);
        self.available.fetch_add(1, Ordering::SeqCst);
        self.permits.add_permits(1);

        debug!("Session {} returned to pool", id);
    }
}

/// A browser session checked out of the pool
///
/// Only the pool flips `using`. Dropping a handle that was never released
/// hands it back to the pool on a background task.
pub struct SessionHandle {
    id: Uuid,
    using: bool,
    session: Arc<dyn BrowserSession>,
    pool: Weak<PoolShared>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_using(&self) -> bool {
        self.using
    }

    /// The underlying browser session
    pub fn session(&self) -> &dyn BrowserSession {
        self.session.as_ref()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("using", &self.using)
            .finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.using {
            return;
        }

        let Some(shared) = self.pool.upgrade() else {
            return;
        };

        let idle = IdleSession {
            id: self.id,
            session: self.session.clone(),
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Session {} dropped while checked out, returning it", self.id);
                runtime.spawn(async move {
                    shared.check_in(idle).await;
                });
            }
            Err(_) => {
                error!("Session {} dropped outside a runtime and cannot be returned", self.id);
            }
        }
    }
}

/// Bounded pool of reusable browser sessions
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

impl SessionPool {
    /// Eagerly open `count` sessions
    ///
    /// If any session fails to start, the ones already opened are quit and the
    /// factory error is returned.
    pub async fn create(factory: &dyn SessionFactory, count: usize) -> Result<Self, PoolError> {
        if count == 0 {
            return Err(PoolError::EmptyPool);
        }

        let mut sessions: Vec<Arc<dyn BrowserSession>> = Vec::with_capacity(count);

        for i in 0..count {
            match factory.open().await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    error!("Failed to open browser session {} of {}: {:#}", i + 1, count, e);

                    for session in &sessions {
                        if let Err(e) = session.quit().await {
                            warn!("Error tearing down partially created pool: {:#}", e);
                        }
                    }

                    return Err(PoolError::SessionStart(e));
                }
            }
        }

        let idle = sessions.iter()
            .map(|session| IdleSession {
                id: Uuid::new_v4(),
                session: session.clone(),
            })
            .collect();

        info!("Session pool ready with {} browser sessions", count);

        Ok(Self {
            shared: Arc::new(PoolShared {
                idle: Mutex::new(idle),
                permits: Semaphore::new(count),
                available: AtomicUsize::new(count),
                closed: AtomicBool::new(false),
                sessions,
                size: count,
            }),
        })
    }

    /// Check out an idle session, waiting at most `timeout`
    pub async fn acquire(&self, timeout: Duration) -> Result<SessionHandle, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = match tokio::time::timeout(timeout, self.shared.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                debug!("Timed out after {:?} waiting for a browser session", timeout);
                return Err(PoolError::Timeout(timeout));
            }
        };

        // close() may have started while we were parked
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let Some(idle) = self.shared.idle.lock().await.pop_front() else {
            error!("Session permit granted with no idle session");
            return Err(PoolError::Closed);
        };

        permit.forget();
        self.shared.available.fetch_sub(1, Ordering::SeqCst);

        debug!("Session {} checked out", idle.id);

        Ok(SessionHandle {
            id: idle.id,
            using: true,
            session: idle.session,
            pool: Arc::downgrade(&self.shared),
        })
    }

    /// Return a session to the pool after closing its extra tabs
    ///
    /// Cleanup errors are logged; the session is returned regardless.
    pub async fn release(&self, mut handle: SessionHandle) {
        if !handle.using {
            return;
        }

        if !std::ptr::eq(handle.pool.as_ptr(), Arc::as_ptr(&self.shared)) {
            warn!("Session {} does not belong to this pool", handle.id);
            return;
        }

        handle.using = false;

        let idle = IdleSession {
            id: handle.id,
            session: handle.session.clone(),
        };

        self.shared.check_in(idle).await;
    }

    /// Stop handing out sessions, wait for every outstanding handle, then quit
    /// all browsers
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!("Session pool already closed");
            return;
        }

        let outstanding = self.shared.size - self.available();
        info!("Closing session pool, waiting for {} outstanding sessions", outstanding);

        let all = u32::try_from(self.shared.size).unwrap_or(u32::MAX);
        if let Ok(permits) = self.shared.permits.acquire_many(all).await {
            permits.forget();
        }
        self.shared.permits.close();

        for session in &self.shared.sessions {
            if let Err(e) = session.quit().await {
                error!("Error closing browser session: {:#}", e);
            }
        }

        self.shared.idle.lock().await.clear();
        self.shared.available.store(0, Ordering::SeqCst);

        info!("Session pool closed");
    }

    /// Number of idle sessions
    pub fn available(&self) -> usize {
        self.shared.available.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}
