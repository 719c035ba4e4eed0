//! Readiness check definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(180);

/// What a readiness probe looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    /// GET the URL, ready on status 200
    Http { url: String },
    /// At least `replicas` resources under the selector report Ready
    Replicas {
        namespace: String,
        selector: String,
        replicas: u32,
    },
    /// Container is running (and healthy, when it has a health check)
    Container { name: String },
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Http { url } => write!(f, "GET {}", url),
            CheckKind::Replicas {
                namespace,
                selector,
                replicas,
            } => write!(f, "{} replica(s) of '{}' in {}", replicas, selector, namespace),
            CheckKind::Container { name } => write!(f, "container {}", name),
        }
    }
}

/// A uniform readiness check: what to poll, how often, and for how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub check: CheckKind,
    pub interval: Duration,
    pub deadline: Duration,
}

impl HealthCheckSpec {
    pub fn new(check: CheckKind) -> Self {
        Self {
            check,
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::new(CheckKind::Http { url: url.into() })
    }

    pub fn replicas(
        namespace: impl Into<String>,
        selector: impl Into<String>,
        replicas: u32,
    ) -> Self {
        Self::new(CheckKind::Replicas {
            namespace: namespace.into(),
            selector: selector.into(),
            replicas,
        })
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(CheckKind::Container { name: name.into() })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}
