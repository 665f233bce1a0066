//! Tenant resolution
//!
//! A tenant's backing configuration lives in a ConfigMap named after its
//! stack id. The [`cache::TenantCache`] builds a [`TenantContext`] from that
//! ConfigMap on first use and shares it with every request for the tenant
//! until the [`watch::WatchAggregator`] sees the ConfigMap change.

pub mod builder;
pub mod cache;
pub mod session;
pub mod settings;
pub mod source;
pub mod watch;

use std::any::Any;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use builder::TenantBuilder;
pub use cache::{CacheSettings, TenantCache};
pub use session::{DsnSessionFactory, SessionError, SessionFactory};
pub use settings::{DatabaseSettings, TenantSettings};
pub use source::{ConfigEvent, ConfigEventStream, KubeConfigSource, TenantConfigSource};
pub use watch::{SubscriptionState, Subscriptions, WatchAggregator, WatchHandle};

/// Default namespace holding tenant ConfigMaps
pub const DEFAULT_CONFIG_NAMESPACE: &str = "tenant-system";

/// Suffix appended to the stack id to name a tenant's ConfigMap
pub const CONFIG_NAME_SUFFIX: &str = "-mt-config";

/// ConfigMap data key holding the JSON settings document
pub const SETTINGS_KEY: &str = "ini";

/// Stable identifier of a tenant (its stack id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

impl TenantId {
    /// Wrap a raw stack id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw stack id
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for TenantId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where tenant ConfigMaps live and how they are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantNaming {
    /// Namespace holding every tenant's ConfigMap
    pub namespace: String,
    /// Suffix appended to the tenant id
    pub suffix: String,
    /// Data key holding the settings document
    pub settings_key: String,
}

impl Default for TenantNaming {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_CONFIG_NAMESPACE.to_string(),
            suffix: CONFIG_NAME_SUFFIX.to_string(),
            settings_key: SETTINGS_KEY.to_string(),
        }
    }
}

impl TenantNaming {
    /// ConfigMap name for a tenant (e.g., "42-mt-config")
    pub fn config_map_name(&self, tenant: TenantId) -> String {
        format!("{}{}", tenant, self.suffix)
    }
}

/// Opaque database session built for one tenant.
///
/// Cheap to clone. The concrete session type is chosen by the
/// [`SessionFactory`]; consumers downcast to it.
#[derive(Clone)]
pub struct SessionHandle {
    descriptor: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl SessionHandle {
    /// Wrap a session with a human-readable descriptor (no secrets)
    pub fn new<T: Any + Send + Sync>(descriptor: impl Into<String>, session: T) -> Self {
        Self {
            descriptor: descriptor.into(),
            inner: Arc::new(session),
        }
    }

    /// Descriptor of the session (e.g., redacted DSN)
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Borrow the concrete session
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Health of a tenant context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantStatus {
    /// Configuration loaded and a session was built
    Healthy,
    /// Configuration could not be loaded; the context has no session
    Degraded {
        /// Why the session could not be built
        reason: String,
    },
}

/// Resolved state for one tenant, shared by all of its requests.
///
/// Immutable: a configuration change produces a new context.
#[derive(Debug, Clone)]
pub struct TenantContext {
    tenant_id: TenantId,
    session: Option<SessionHandle>,
    status: TenantStatus,
    config_version: Option<String>,
}

impl TenantContext {
    /// Context with a working session
    pub fn healthy(
        tenant_id: TenantId,
        session: SessionHandle,
        config_version: Option<String>,
    ) -> Self {
        Self {
            tenant_id,
            session: Some(session),
            status: TenantStatus::Healthy,
            config_version,
        }
    }

    /// Context without a session
    pub fn degraded(
        tenant_id: TenantId,
        reason: impl Into<String>,
        config_version: Option<String>,
    ) -> Self {
        Self {
            tenant_id,
            session: None,
            status: TenantStatus::Degraded {
                reason: reason.into(),
            },
            config_version,
        }
    }

    /// Tenant this context belongs to
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Database session, if one could be built
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Health of the context
    pub fn status(&self) -> &TenantStatus {
        &self.status
    }

    /// Whether the context was built without a session
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, TenantStatus::Degraded { .. })
    }

    /// resourceVersion of the ConfigMap the context was built from
    pub fn config_version(&self) -> Option<&str> {
        self.config_version.as_deref()
    }
}

/// Why a tenant context was built without a session.
///
/// Never surfaced to requests; recorded as [`TenantStatus::Degraded`].
#[derive(Debug, Error)]
pub enum TenantConfigError {
    /// The tenant has no ConfigMap yet
    #[error("config map {name} not found")]
    Missing {
        /// Expected ConfigMap name
        name: String,
    },

    /// The ConfigMap could not be fetched
    #[error("failed to fetch config map {name}: {message}")]
    Fetch {
        /// ConfigMap name
        name: String,
        /// Underlying error
        message: String,
    },

    /// The ConfigMap has no settings document
    #[error("config map {name} has no {key} key")]
    MissingSettings {
        /// ConfigMap name
        name: String,
        /// Expected data key
        key: String,
    },

    /// The settings document is malformed
    #[error("invalid settings document: {0}")]
    Parse(String),

    /// The session factory rejected the settings
    #[error("failed to build session: {0}")]
    Session(#[from] SessionError),
}
