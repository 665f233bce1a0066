//! Per-tenant context cache
//!
//! Concurrent misses for the same tenant share one build. Builds run on
//! their own task, so a request that gives up waiting does not cancel the
//! build other requests are joined to. The build task publishes its context
//! and then leaves the in-flight map itself, whether or not anyone is still
//! waiting on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use moka::notification::RemovalCause;
use tracing::{debug, error};

use super::builder::TenantBuilder;
use super::watch::WatchHandle;
use super::{TenantContext, TenantId};

/// Default maximum number of cached tenants
pub const DEFAULT_MAX_TENANTS: u64 = 10_000;

/// Default lifetime of a cached context
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Bounds of the tenant cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of cached tenant contexts
    pub max_tenants: u64,
    /// Time after insertion at which a context is dropped
    pub time_to_live: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_tenants: DEFAULT_MAX_TENANTS,
            time_to_live: DEFAULT_TTL,
        }
    }
}

type SharedBuild = Shared<BoxFuture<'static, Arc<TenantContext>>>;

struct InflightBuild {
    id: u64,
    build: SharedBuild,
}

type Inflight = Arc<DashMap<TenantId, InflightBuild>>;

struct Inner {
    entries: Cache<TenantId, Arc<TenantContext>>,
    inflight: Inflight,
    next_build: AtomicU64,
    builder: Arc<TenantBuilder>,
    watch: Option<WatchHandle>,
}

/// Cache of tenant contexts, cheap to clone.
#[derive(Clone)]
pub struct TenantCache {
    inner: Arc<Inner>,
}

impl TenantCache {
    /// Create a cache.
    ///
    /// With a [`WatchHandle`], every build subscribes to its tenant's
    /// ConfigMap, and contexts dropped for size or age release their
    /// subscription.
    pub fn new(builder: TenantBuilder, settings: CacheSettings, watch: Option<WatchHandle>) -> Self {
        let mut entries = Cache::builder()
            .max_capacity(settings.max_tenants)
            .time_to_live(settings.time_to_live);

        if let Some(handle) = watch.clone() {
            entries = entries.eviction_listener(
                move |tenant: Arc<TenantId>, _ctx: Arc<TenantContext>, cause: RemovalCause| {
                    if matches!(cause, RemovalCause::Expired | RemovalCause::Size) {
                        handle.release(*tenant);
                    }
                },
            );
        }

        Self {
            inner: Arc::new(Inner {
                entries: entries.build(),
                inflight: Arc::new(DashMap::new()),
                next_build: AtomicU64::new(0),
                builder: Arc::new(builder),
                watch,
            }),
        }
    }

    /// Return the tenant's context, building it on a miss.
    ///
    /// Never fails: configuration problems produce a degraded context.
    pub async fn get_or_build(&self, tenant: TenantId) -> Arc<TenantContext> {
        self.inner
            .entries
            .get_with(tenant, self.join_build(tenant))
            .await
    }

    /// Cached context, without building
    pub async fn get(&self, tenant: TenantId) -> Option<Arc<TenantContext>> {
        self.inner.entries.get(&tenant).await
    }

    /// Drop the tenant's context; the next request rebuilds it.
    ///
    /// A build still running for the tenant is detached, so later requests
    /// start a fresh one instead of joining it.
    pub async fn invalidate(&self, tenant: TenantId) {
        self.inner.inflight.remove(&tenant);
        self.inner.entries.invalidate(&tenant).await;
    }

    /// Whether a context is cached for the tenant
    pub fn contains(&self, tenant: TenantId) -> bool {
        self.inner.entries.contains_key(&tenant)
    }

    /// Number of cached contexts after pending maintenance has run
    pub async fn entry_count(&self) -> u64 {
        self.inner.entries.run_pending_tasks().await;
        self.inner.entries.entry_count()
    }

    async fn join_build(&self, tenant: TenantId) -> Arc<TenantContext> {
        let build = self
            .inner
            .inflight
            .entry(tenant)
            .or_insert_with(|| self.spawn_build(tenant))
            .build
            .clone();
        build.await
    }

    fn spawn_build(&self, tenant: TenantId) -> InflightBuild {
        let id = self.inner.next_build.fetch_add(1, Ordering::Relaxed);
        debug!(tenant = %tenant, build = id, "building tenant context");
        let builder = Arc::clone(&self.inner.builder);
        let entries = self.inner.entries.clone();
        let inflight = Arc::clone(&self.inner.inflight);
        let watch = self.inner.watch.clone();

        let task = tokio::spawn({
            let inflight = Arc::clone(&inflight);
            async move {
                let ctx = Arc::new(builder.build(tenant).await);
                // Publish before subscribing so the first watch event can be
                // compared against this context.
                entries.insert(tenant, Arc::clone(&ctx)).await;
                inflight.remove_if(&tenant, |_, current| current.id == id);
                if let Some(watch) = watch {
                    tokio::spawn(async move { watch.subscribe(tenant).await });
                }
                ctx
            }
        });

        let build = async move {
            task.await.unwrap_or_else(|e| {
                error!(tenant = %tenant, error = %e, "tenant build task failed");
                inflight.remove_if(&tenant, |_, current| current.id == id);
                Arc::new(TenantContext::degraded(
                    tenant,
                    format!("build task failed: {e}"),
                    None,
                ))
            })
        }
        .boxed()
        .shared();

        InflightBuild { id, build }
    }
}
