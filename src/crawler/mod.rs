pub mod bus;
pub mod dedup;
pub mod driver;
pub mod filter;
pub mod page;
pub mod persist;
pub mod processor;
pub mod route;
pub mod simhash;
pub mod task;

pub use bus::{DispatchBus, DispatchError, DispatchSettings};
pub use dedup::{DedupScheduler, SimHashedContent, SimilarityThreshold};
pub use driver::{CrawlDriver, CrawlSummary};
pub use filter::{normalize_url, Rejection, UrlFilter};
pub use page::PageHandle;
pub use processor::{LinkProcessor, PageProcessor};
pub use route::{RegistryError, RouteRegistration, RouteRegistry};
pub use task::{PageContent, ResultData, TargetRequest, TaskDetails, TaskInfo};
