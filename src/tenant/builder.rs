//! Builds [`TenantContext`]s from tenant ConfigMaps

use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, warn};

use super::session::SessionFactory;
use super::settings::TenantSettings;
use super::source::TenantConfigSource;
use super::{SessionHandle, TenantConfigError, TenantContext, TenantId, TenantNaming};

/// Loads a tenant's configuration and builds its context.
///
/// Building never fails: any problem with the configuration yields a
/// degraded context and a warning, so requests for the tenant still proceed.
pub struct TenantBuilder {
    source: Arc<dyn TenantConfigSource>,
    sessions: Arc<dyn SessionFactory>,
    naming: TenantNaming,
}

impl TenantBuilder {
    /// Create a builder
    pub fn new(
        source: Arc<dyn TenantConfigSource>,
        sessions: Arc<dyn SessionFactory>,
        naming: TenantNaming,
    ) -> Self {
        Self {
            source,
            sessions,
            naming,
        }
    }

    /// Naming convention used to locate ConfigMaps
    pub fn naming(&self) -> &TenantNaming {
        &self.naming
    }

    /// Build the context for a tenant
    pub async fn build(&self, tenant: TenantId) -> TenantContext {
        let name = self.naming.config_map_name(tenant);

        let config = match self.source.get_config(&self.naming.namespace, &name).await {
            Ok(Some(cm)) => Ok(cm),
            Ok(None) => Err(TenantConfigError::Missing { name: name.clone() }),
            Err(e) => Err(TenantConfigError::Fetch {
                name: name.clone(),
                message: e.to_string(),
            }),
        };

        let version = config
            .as_ref()
            .ok()
            .and_then(|cm| cm.metadata.resource_version.clone());

        let session = match config {
            Ok(cm) => self.session_for(&cm).await,
            Err(e) => Err(e),
        };

        match session {
            Ok(session) => {
                debug!(
                    tenant = %tenant,
                    session = %session.descriptor(),
                    "built tenant context"
                );
                TenantContext::healthy(tenant, session, version)
            }
            Err(e) => {
                warn!(
                    tenant = %tenant,
                    config_map = %name,
                    error = %e,
                    "tenant context degraded, continuing without session"
                );
                TenantContext::degraded(tenant, e.to_string(), version)
            }
        }
    }

    async fn session_for(&self, config: &ConfigMap) -> Result<SessionHandle, TenantConfigError> {
        let settings = TenantSettings::from_config_map(config, &self.naming.settings_key)?;
        Ok(self.sessions.build_session(&settings).await?)
    }
}
