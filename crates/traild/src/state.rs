use std::sync::Arc;

use crate::config::Config;
use crate::db::PgPool;
use crate::services::capability::CapabilityService;
use crate::services::ledger::LedgerService;
use crate::services::registry::RegistryService;
use crate::services::reputation::ReputationService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: PgPool,
    pub registry: RegistryService,
    pub ledger: LedgerService,
    pub capabilities: CapabilityService,
    pub reputation: ReputationService,
}

impl AppState {
    pub fn new(config: Config, db: PgPool) -> Self {
        Self {
            config: Arc::new(config),
            registry: RegistryService::new(db.clone()),
            ledger: LedgerService::new(db.clone()),
            capabilities: CapabilityService::new(db.clone()),
            reputation: ReputationService::new(db.clone()),
            db,
        }
    }
}
