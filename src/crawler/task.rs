use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::browser::SessionHandle;

/// Route every task falls back to
pub const ROOT_ROUTE: &str = "/";

fn root_route() -> String {
    ROOT_ROUTE.to_string()
}

/// HTTP method of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// An outbound fetch specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    /// URL to fetch; absent for the continuation of a dynamic interaction
    pub url: Option<String>,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,
}

impl TargetRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// A request that reuses whatever page the session is already on
    pub fn continuation() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The URL, treating blank strings as absent
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// A unit of crawl work
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskInfo {
    pub request: TargetRequest,

    /// Route key; blank means the root route
    #[serde(default = "root_route")]
    route_to: String,

    /// Whether the task needs a browser session
    #[serde(default)]
    pub is_dynamic: bool,

    /// Session carried across the steps of a dynamic interaction
    #[serde(skip)]
    pub session_handle: Option<SessionHandle>,
}

impl TaskInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_request(TargetRequest::new(url))
    }

    pub fn from_request(request: TargetRequest) -> Self {
        Self {
            request,
            route_to: root_route(),
            is_dynamic: false,
            session_handle: None,
        }
    }

    /// A dynamic task that continues on the page its session is showing
    pub fn continuation(session: SessionHandle) -> Self {
        Self {
            request: TargetRequest::continuation(),
            route_to: root_route(),
            is_dynamic: true,
            session_handle: Some(session),
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route_to = route.into();
        self
    }

    pub fn dynamic(mut self, is_dynamic: bool) -> Self {
        self.is_dynamic = is_dynamic;
        self
    }

    /// Route key, never empty
    pub fn route(&self) -> &str {
        if self.route_to.trim().is_empty() {
            ROOT_ROUTE
        } else {
            &self.route_to
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.request.url()
    }

    /// Copy of this task without its session
    pub fn detached(&self) -> TaskInfo {
        TaskInfo {
            request: self.request.clone(),
            route_to: self.route().to_string(),
            is_dynamic: self.is_dynamic,
            session_handle: None,
        }
    }
}

/// The fetched artifact
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PageContent {
    pub raw_text: String,

    pub mime_type: String,

    pub url: String,

    /// Route that handled the page
    pub task_route_path: String,

    pub status_code: Option<u16>,

    /// Follow-up tasks discovered on the page
    #[serde(skip)]
    pub next_tasks: Vec<TaskInfo>,
}

impl PageContent {
    pub fn new(url: impl Into<String>, raw_text: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            mime_type: mime_type.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn is_html(&self) -> bool {
        let mime = self.mime_type.to_ascii_lowercase();
        mime.contains("html") || (mime.is_empty() && self.raw_text.trim_start().starts_with('<'))
    }

    /// Copy of the content without its follow-up tasks
    pub fn detached(&self) -> PageContent {
        PageContent {
            raw_text: self.raw_text.clone(),
            mime_type: self.mime_type.clone(),
            url: self.url.clone(),
            task_route_path: self.task_route_path.clone(),
            status_code: self.status_code,
            next_tasks: Vec::new(),
        }
    }
}

/// Completion metadata reported by a page processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetails {
    pub route: String,
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct TaskDetailsBuilder {
    route: String,
    url: String,
    name: Option<String>,
    description: Option<String>,
    started_at: DateTime<Utc>,
}

impl TaskDetailsBuilder {
    pub fn new(route: impl Into<String>, url: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            route: route.into(),
            url: url.into(),
            name: None,
            description: None,
            started_at,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn build(self) -> TaskDetails {
        TaskDetails {
            name: self.name.unwrap_or_else(|| self.route.clone()),
            route: self.route,
            url: self.url,
            description: self.description,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Everything a pipeline receives for one accepted page
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultData {
    pub content: PageContent,

    /// The originating task, without its session
    pub task: TaskInfo,

    pub details: TaskDetails,

    /// Free-form values populated by the processor
    pub data: HashMap<String, Value>,
}

impl ResultData {
    pub fn raw_text(&self) -> &str {
        &self.content.raw_text
    }

    pub fn url(&self) -> &str {
        &self.content.url
    }
}
