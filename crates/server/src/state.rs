//! Application state shared across handlers.

use crate::access::AdminAccess;
use crate::cache::CacheRegistry;
use crate::origin::{OriginError, OriginGateway};
use crate::resolver::RequestResolver;
use crate::stats::ServerStats;
use larder_core::config::AppConfig;
use larder_signer::UrlSigner;
use larder_storage::ObjectStore;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] larder_core::Error),

    #[error(transparent)]
    Origin(#[from] OriginError),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Cache state for every known path.
    pub registry: Arc<CacheRegistry>,
    /// Origin client.
    pub origin: Arc<OriginGateway>,
    /// Strategy selection and streaming for inbound GETs.
    pub resolver: Arc<RequestResolver>,
    /// Counters behind `/stat`.
    pub stats: Arc<ServerStats>,
    /// Admin allow-list.
    pub admin_access: Arc<AdminAccess>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Fails if the configuration does not validate or the origin client
    /// cannot be built.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        signer: Option<UrlSigner>,
    ) -> Result<Self, InitError> {
        config.validate()?;

        let registry = Arc::new(CacheRegistry::new(storage));
        let origin = Arc::new(OriginGateway::new(&config.origin, signer.map(Arc::new))?);
        let stats = Arc::new(ServerStats::new());
        let resolver = Arc::new(RequestResolver::new(
            Arc::clone(&registry),
            Arc::clone(&origin),
            Arc::clone(&stats),
        ));
        let admin_access = Arc::new(AdminAccess::from_config(&config.admin.allowed_addresses));

        Ok(Self {
            config: Arc::new(config),
            registry,
            origin,
            resolver,
            stats,
            admin_access,
        })
    }
}
