//! ConfigMap watch aggregation
//!
//! One forwarding task per subscribed tenant pushes ConfigMap events into a
//! single bounded queue. A single loop drains that queue and invalidates
//! cached contexts, so invalidation is serialized no matter how many tenants
//! are watched.
//!
//! Subscription lifecycle per tenant:
//!
//! ```text
//! (none) --subscribe--> Active --changed--> Active (context invalidated)
//!                         |
//!                         +--deleted / error / stream end / release--> Closed
//! ```
//!
//! A closed tenant is subscribed again on its next build.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::TenantCache;
use super::source::{ConfigEvent, ConfigEventStream, TenantConfigSource};
use super::{TenantId, TenantNaming};

/// Default capacity of the shared event queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the subscribe channel
const SUBSCRIBE_CAPACITY: usize = 256;

/// Sends subscription requests to a running [`WatchAggregator`]
#[derive(Debug, Clone)]
pub struct WatchHandle {
    subscribes: mpsc::Sender<TenantId>,
    releases: mpsc::UnboundedSender<TenantId>,
}

impl WatchHandle {
    /// Ask the aggregator to watch the tenant's ConfigMap
    pub async fn subscribe(&self, tenant: TenantId) {
        if self.subscribes.send(tenant).await.is_err() {
            debug!(tenant = %tenant, "watch aggregator stopped, not subscribing");
        }
    }

    /// Ask the aggregator to stop watching the tenant's ConfigMap.
    ///
    /// Non-blocking and never dropped while the aggregator runs, so a burst
    /// of evictions closes every watch it should.
    pub fn release(&self, tenant: TenantId) {
        if self.releases.send(tenant).is_err() {
            debug!(tenant = %tenant, "watch aggregator stopped, nothing to release");
        }
    }
}

/// State of a tenant's ConfigMap subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Events are being forwarded
    Active,
    /// No watch is running for the tenant
    Closed,
}

#[derive(Debug)]
struct Subscription {
    id: u64,
    token: CancellationToken,
}

/// Live view of active subscriptions
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    active: Arc<DashMap<TenantId, Subscription>>,
}

impl Subscriptions {
    /// Subscription state for a tenant
    pub fn state(&self, tenant: TenantId) -> SubscriptionState {
        if self.active.contains_key(&tenant) {
            SubscriptionState::Active
        } else {
            SubscriptionState::Closed
        }
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no subscriptions are active
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[derive(Debug)]
enum WatchEventKind {
    Changed { resource_version: Option<String> },
    Deleted,
    Failed(String),
    Ended,
}

#[derive(Debug)]
struct WatchEvent {
    tenant: TenantId,
    subscription: u64,
    kind: WatchEventKind,
}

/// Fans tenant ConfigMap watches into one invalidation loop
pub struct WatchAggregator {
    subscribes: mpsc::Receiver<TenantId>,
    releases: mpsc::UnboundedReceiver<TenantId>,
    queue_capacity: usize,
    invalidator: Invalidator,
}

struct Invalidator {
    source: Arc<dyn TenantConfigSource>,
    naming: TenantNaming,
    cache: Option<TenantCache>,
    subscriptions: Subscriptions,
    next_id: AtomicU64,
}

impl WatchAggregator {
    /// Create an aggregator and the handle used to feed it.
    ///
    /// Attach the cache with [`WatchAggregator::attach`] before running.
    pub fn new(
        source: Arc<dyn TenantConfigSource>,
        naming: TenantNaming,
        queue_capacity: usize,
    ) -> (Self, WatchHandle) {
        let (subscribe_tx, subscribe_rx) = mpsc::channel(SUBSCRIBE_CAPACITY);
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let aggregator = Self {
            subscribes: subscribe_rx,
            releases: release_rx,
            queue_capacity: queue_capacity.max(1),
            invalidator: Invalidator {
                source,
                naming,
                cache: None,
                subscriptions: Subscriptions::default(),
                next_id: AtomicU64::new(0),
            },
        };
        let handle = WatchHandle {
            subscribes: subscribe_tx,
            releases: release_tx,
        };
        (aggregator, handle)
    }

    /// Set the cache whose entries this aggregator invalidates
    pub fn attach(&mut self, cache: TenantCache) {
        self.invalidator.cache = Some(cache);
    }

    /// Live view of the subscriptions this aggregator manages
    pub fn subscriptions(&self) -> Subscriptions {
        self.invalidator.subscriptions.clone()
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// On shutdown every subscription is closed and events already queued
    /// are processed before returning.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            mut subscribes,
            mut releases,
            queue_capacity,
            invalidator,
        } = self;

        let (events_tx, mut events_rx) = mpsc::channel(queue_capacity);
        let mut forwarders = JoinSet::new();
        info!(queue_capacity, "watch aggregator started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(tenant) = releases.recv() => invalidator.release(tenant),
                Some(tenant) = subscribes.recv() => {
                    if let Some((id, stream, token)) = invalidator.open(tenant, &shutdown) {
                        forwarders.spawn(forward(tenant, id, stream, token, events_tx.clone()));
                    }
                }
                Some(event) = events_rx.recv() => invalidator.handle(event).await,
                Some(_) = forwarders.join_next(), if !forwarders.is_empty() => {}
            }
        }

        invalidator.close_all();
        drop(events_tx);
        let mut drained = 0usize;
        while let Some(event) = events_rx.recv().await {
            invalidator.handle(event).await;
            drained += 1;
        }
        while forwarders.join_next().await.is_some() {}
        info!(drained, "watch aggregator stopped");
    }
}

impl Invalidator {
    fn open(
        &self,
        tenant: TenantId,
        shutdown: &CancellationToken,
    ) -> Option<(u64, ConfigEventStream, CancellationToken)> {
        if self.subscriptions.active.contains_key(&tenant) {
            debug!(tenant = %tenant, "config watch already active");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = shutdown.child_token();
        let name = self.naming.config_map_name(tenant);
        let stream = self.source.watch_config(&self.naming.namespace, &name);

        self.subscriptions.active.insert(
            tenant,
            Subscription {
                id,
                token: token.clone(),
            },
        );
        info!(tenant = %tenant, config_map = %name, "opened config watch");
        Some((id, stream, token))
    }

    fn release(&self, tenant: TenantId) {
        // The tenant may have been rebuilt since it was evicted.
        if self.cache.as_ref().is_some_and(|c| c.contains(tenant)) {
            debug!(tenant = %tenant, "tenant cached again, keeping config watch");
            return;
        }
        self.close(tenant, None, "released");
    }

    fn close(&self, tenant: TenantId, subscription: Option<u64>, reason: &str) {
        let removed = self
            .subscriptions
            .active
            .remove_if(&tenant, |_, s| subscription.map_or(true, |id| s.id == id));
        if let Some((_, s)) = removed {
            s.token.cancel();
            info!(tenant = %tenant, reason, "closed config watch");
        }
    }

    fn close_all(&self) {
        for entry in self.subscriptions.active.iter() {
            entry.value().token.cancel();
        }
        self.subscriptions.active.clear();
    }

    fn is_current(&self, event: &WatchEvent) -> bool {
        self.subscriptions
            .active
            .get(&event.tenant)
            .is_some_and(|s| s.id == event.subscription)
    }

    async fn handle(&self, event: WatchEvent) {
        if !self.is_current(&event) {
            debug!(tenant = %event.tenant, "ignoring event from closed subscription");
            return;
        }
        let tenant = event.tenant;

        match event.kind {
            WatchEventKind::Changed { resource_version } => {
                if let Some(cache) = &self.cache {
                    if let Some(ctx) = cache.get(tenant).await {
                        if resource_version.is_some()
                            && ctx.config_version() == resource_version.as_deref()
                        {
                            debug!(tenant = %tenant, "config unchanged since build");
                            return;
                        }
                        cache.invalidate(tenant).await;
                        info!(tenant = %tenant, "tenant config changed, context invalidated");
                    }
                }
            }
            WatchEventKind::Deleted => {
                self.invalidate(tenant).await;
                self.close(tenant, Some(event.subscription), "config map deleted");
            }
            WatchEventKind::Failed(error) => {
                warn!(tenant = %tenant, error = %error, "config watch failed");
                self.invalidate(tenant).await;
                self.close(tenant, Some(event.subscription), "watch error");
            }
            WatchEventKind::Ended => {
                self.invalidate(tenant).await;
                self.close(tenant, Some(event.subscription), "watch ended");
            }
        }
    }

    async fn invalidate(&self, tenant: TenantId) {
        if let Some(cache) = &self.cache {
            cache.invalidate(tenant).await;
        }
    }
}

async fn forward(
    tenant: TenantId,
    subscription: u64,
    mut stream: ConfigEventStream,
    token: CancellationToken,
    events: mpsc::Sender<WatchEvent>,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return,
            next = stream.next() => next,
        };

        let kind = match next {
            Some(ConfigEvent::Applied { resource_version }) => {
                WatchEventKind::Changed { resource_version }
            }
            Some(ConfigEvent::Deleted) => WatchEventKind::Deleted,
            Some(ConfigEvent::Error(e)) => WatchEventKind::Failed(e),
            None => WatchEventKind::Ended,
        };
        let terminal = !matches!(kind, WatchEventKind::Changed { .. });

        let event = WatchEvent {
            tenant,
            subscription,
            kind,
        };
        if events.send(event).await.is_err() || terminal {
            return;
        }
    }
}
