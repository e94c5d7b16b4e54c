//! Route registry
//!
//! A route key selects the processor, downloaders, scheduler and pipeline for a
//! task. Any member a route leaves unset is taken from the root route `"/"`.
//! The registry is immutable once built.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cli::config::HttpSettings;
use crate::crawler::dedup::DedupScheduler;
use crate::crawler::processor::PageProcessor;
use crate::crawler::task::ROOT_ROUTE;
use crate::downloader::{Downloader, DownloadError, DynamicDownloader, StaticDownloader};
use crate::storage::Pipeline;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Route '{0}' is registered twice")]
    DuplicateRoute(String),

    #[error("Route '{route}' requires delegation but its {kind} downloader does not implement it")]
    DelegationUnsupported { route: String, kind: &'static str },

    #[error("Failed to build the default downloader: {0}")]
    Downloader(#[from] DownloadError),
}

/// Members of one route; unset members fall back to the root route
#[derive(Default, Clone)]
pub struct RouteRegistration {
    pub processor: Option<Arc<dyn PageProcessor>>,
    pub static_downloader: Option<Arc<dyn Downloader>>,
    pub dynamic_downloader: Option<Arc<dyn Downloader>>,
    pub scheduler: Option<Arc<DedupScheduler>>,
    pub pipeline: Option<Arc<dyn Pipeline>>,

    /// The route's processors call `PageHandle::delegate`
    pub requires_delegation: bool,
}

impl RouteRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processor(mut self, processor: Arc<dyn PageProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn static_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.static_downloader = Some(downloader);
        self
    }

    pub fn dynamic_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.dynamic_downloader = Some(downloader);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<DedupScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn pipeline(mut self, pipeline: Arc<dyn Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn requires_delegation(mut self, required: bool) -> Self {
        self.requires_delegation = required;
        self
    }
}

/// Everything needed to dispatch a task, after root fallback
#[derive(Clone)]
pub struct ResolvedRoute {
    /// The route that was asked for
    pub key: String,
    pub processor: Option<Arc<dyn PageProcessor>>,
    pub static_downloader: Arc<dyn Downloader>,
    pub dynamic_downloader: Arc<dyn Downloader>,
    pub scheduler: Arc<DedupScheduler>,
    pub pipeline: Option<Arc<dyn Pipeline>>,
}

#[derive(Default)]
pub struct RouteRegistryBuilder {
    routes: HashMap<String, RouteRegistration>,
    http: HttpSettings,
}

impl RouteRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for the root static downloader when none is registered
    pub fn http_settings(&mut self, settings: HttpSettings) -> &mut Self {
        self.http = settings;
        self
    }

    pub fn register(&mut self, route: impl Into<String>, registration: RouteRegistration) -> Result<&mut Self, RegistryError> {
        let route = route.into();
        let key = if route.trim().is_empty() { ROOT_ROUTE.to_string() } else { route };

        if self.routes.contains_key(&key) {
            return Err(RegistryError::DuplicateRoute(key));
        }

        debug!("Registered route '{}'", key);
        self.routes.insert(key, registration);
        Ok(self)
    }

    /// Fill root defaults and check delegation support
    pub fn build(&mut self) -> Result<RouteRegistry, RegistryError> {
        let mut routes = std::mem::take(&mut self.routes);
        let mut root = routes.remove(ROOT_ROUTE).unwrap_or_default();

        let static_downloader = match root.static_downloader.take() {
            Some(downloader) => downloader,
            None => Arc::new(StaticDownloader::new(&self.http)?),
        };
        let dynamic_downloader = root.dynamic_downloader.take()
            .unwrap_or_else(|| Arc::new(DynamicDownloader::default()));
        let scheduler = root.scheduler.take()
            .unwrap_or_else(|| Arc::new(DedupScheduler::default()));

        if root.processor.is_none() {
            warn!("Root route has no processor; unrouted tasks will be skipped");
        }

        let root = ResolvedRoute {
            key: ROOT_ROUTE.to_string(),
            processor: root.processor,
            static_downloader,
            dynamic_downloader,
            scheduler,
            pipeline: root.pipeline,
        };

        let registry = RouteRegistry { root, routes };

        for (key, registration) in &registry.routes {
            if registration.requires_delegation {
                registry.check_delegation(key)?;
            }
        }

        Ok(registry)
    }
}

pub struct RouteRegistry {
    root: ResolvedRoute,
    routes: HashMap<String, RouteRegistration>,
}

impl RouteRegistry {
    pub fn builder() -> RouteRegistryBuilder {
        RouteRegistryBuilder::new()
    }

    /// Members for `route`, falling back to the root route per member
    pub fn resolve(&self, route: &str) -> ResolvedRoute {
        let key = if route.trim().is_empty() { ROOT_ROUTE } else { route };

        let Some(registration) = self.routes.get(key) else {
            if key != ROOT_ROUTE {
                debug!("Route '{}' not registered, using root", key);
            }
            return ResolvedRoute {
                key: key.to_string(),
                ..self.root.clone()
            };
        };

        ResolvedRoute {
            key: key.to_string(),
            processor: registration.processor.clone().or_else(|| self.root.processor.clone()),
            static_downloader: registration.static_downloader.clone()
                .unwrap_or_else(|| self.root.static_downloader.clone()),
            dynamic_downloader: registration.dynamic_downloader.clone()
                .unwrap_or_else(|| self.root.dynamic_downloader.clone()),
            scheduler: registration.scheduler.clone()
                .unwrap_or_else(|| self.root.scheduler.clone()),
            pipeline: registration.pipeline.clone().or_else(|| self.root.pipeline.clone()),
        }
    }

    pub fn contains(&self, route: &str) -> bool {
        route == ROOT_ROUTE || self.routes.contains_key(route)
    }

    /// Every distinct scheduler in the registry
    pub fn schedulers(&self) -> Vec<Arc<DedupScheduler>> {
        let mut schedulers = vec![self.root.scheduler.clone()];

        for registration in self.routes.values() {
            if let Some(scheduler) = &registration.scheduler {
                if !schedulers.iter().any(|known| Arc::ptr_eq(known, scheduler)) {
                    schedulers.push(scheduler.clone());
                }
            }
        }

        schedulers
    }

    fn check_delegation(&self, key: &str) -> Result<(), RegistryError> {
        let resolved = self.resolve(key);

        if !resolved.static_downloader.supports_delegation() {
            return Err(RegistryError::DelegationUnsupported { route: key.to_string(), kind: "static" });
        }
        if !resolved.dynamic_downloader.supports_delegation() {
            return Err(RegistryError::DelegationUnsupported { route: key.to_string(), kind: "dynamic" });
        }

        Ok(())
    }
}
