//! Wiring of the subsystem from its external collaborators.

use std::sync::Arc;

use crate::account::orchestrator::{AccountStatusOrchestrator, AuthorizationProvider};
use crate::account::rebate::RebateApi;
use crate::cache::ExchangeCaches;
use crate::config::ConfigProvider;
use crate::credentials::manager::AgentCredentialManager;
use crate::credentials::store::{CredentialStore, SecretCipher};
use crate::exchange::client::ExchangeClient;
use crate::exchange::info::InfoClient;
use crate::exchange::transport::ExchangeTransport;
use crate::signing::PrimarySignerProvider;

/// External capabilities the subsystem consumes. Everything is a trait
/// object so embedders (and tests) supply their own implementations.
pub struct PerpDeskDeps {
    pub transport: Arc<dyn ExchangeTransport>,
    pub signers: Arc<dyn PrimarySignerProvider>,
    pub credential_store: Arc<dyn CredentialStore>,
    pub cipher: Arc<dyn SecretCipher>,
    pub config: Arc<dyn ConfigProvider>,
    pub authorization: Arc<dyn AuthorizationProvider>,
    pub rebate: Arc<dyn RebateApi>,
}

/// The assembled subsystem.
pub struct PerpDesk {
    pub exchange: Arc<ExchangeClient>,
    pub info: Arc<InfoClient>,
    pub credentials: Arc<AgentCredentialManager>,
    pub orchestrator: Arc<AccountStatusOrchestrator>,
    pub caches: Arc<ExchangeCaches>,
}

impl PerpDesk {
    pub fn new(deps: PerpDeskDeps) -> Self {
        let caches = Arc::new(ExchangeCaches::new());
        let info = Arc::new(InfoClient::new(Arc::clone(&deps.transport)));
        let exchange = Arc::new(ExchangeClient::new(
            Arc::clone(&deps.transport),
            Arc::clone(&deps.signers),
            Arc::clone(&deps.cipher),
            Arc::clone(&deps.config),
            Arc::clone(&caches),
        ));
        let credentials = Arc::new(AgentCredentialManager::new(
            Arc::clone(&info),
            Arc::clone(&exchange),
            Arc::clone(&deps.credential_store),
            Arc::clone(&deps.cipher),
            Arc::clone(&deps.config),
            Arc::clone(&caches),
        ));
        let orchestrator = Arc::new(AccountStatusOrchestrator::new(
            Arc::clone(&exchange),
            Arc::clone(&info),
            Arc::clone(&credentials),
            Arc::clone(&deps.config),
            Arc::clone(&deps.authorization),
            Arc::clone(&deps.rebate),
            Arc::clone(&caches),
        ));

        Self {
            exchange,
            info,
            credentials,
            orchestrator,
            caches,
        }
    }
}
