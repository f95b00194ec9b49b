//! Agent credential lifecycle: decide whether a usable delegated agent
//! exists, and provision one when trading enablement demands it.
//!
//! Provisioning is guarded by a per-user mutex and re-checks the exchange's
//! registration listing before acting, so concurrent enable-trading runs
//! converge on a single new agent instead of racing the 3-slot pool.

use std::sync::Arc;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cache::ExchangeCaches;
use crate::config::ConfigProvider;
use crate::consts::{
    AGENT_USABLE_MARGIN_MS, APPROVE_AGENT_ATTEMPTS, APPROVE_AGENT_BACKOFF, PENDING_AGENT_REMOVAL,
    REMOVAL_POLL_BUDGET, REMOVAL_POLL_INTERVAL, REMOVAL_POLL_REQUEST_TIMEOUT,
};
use crate::credentials::slots::{decode_agent_name, encode_agent_name, plan_provisioning, AgentSlot};
use crate::credentials::store::{AgentCredential, CredentialStore, SecretCipher};
use crate::error::{PerpdeskError, Result};
use crate::exchange::client::ExchangeClient;
use crate::exchange::info::InfoClient;
use crate::exchange::types::ExtraAgent;
use crate::signing::{AgentSigner, TypedDataSigner};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct AgentCredentialManager {
    info: Arc<InfoClient>,
    exchange: Arc<ExchangeClient>,
    store: Arc<dyn CredentialStore>,
    cipher: Arc<dyn SecretCipher>,
    config: Arc<dyn ConfigProvider>,
    caches: Arc<ExchangeCaches>,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Users this process has touched; the config-version purge walks them.
    seen_users: DashSet<String>,
    seen_config_version: Mutex<Option<String>>,
}

impl AgentCredentialManager {
    pub fn new(
        info: Arc<InfoClient>,
        exchange: Arc<ExchangeClient>,
        store: Arc<dyn CredentialStore>,
        cipher: Arc<dyn SecretCipher>,
        config: Arc<dyn ConfigProvider>,
        caches: Arc<ExchangeCaches>,
    ) -> Self {
        Self {
            info,
            exchange,
            store,
            cipher,
            config,
            caches,
            user_locks: DashMap::new(),
            seen_users: DashSet::new(),
            seen_config_version: Mutex::new(None),
        }
    }

    /// Return a usable credential for the user, provisioning a fresh agent
    /// when none exists and the caller explicitly triggered enablement.
    ///
    /// A credential is usable when the exchange still lists its agent
    /// address and the registration outlives `now + 1 day`; among usable
    /// candidates the one expiring last wins.
    pub async fn ensure_agent(
        &self,
        user_address: &str,
        passphrase: &str,
        is_enable_trading_trigger: bool,
    ) -> Result<Option<AgentCredential>> {
        let user = user_address.to_lowercase();
        self.sync_config_version().await?;
        self.seen_users.insert(user.clone());

        let lock = {
            let entry = self.user_locks.entry(user.clone()).or_default();
            entry.value().clone()
        };
        let _exclusive = lock.lock().await;

        let registered = self.extra_agents_cached(&user).await?;
        if let Some(credential) = self.find_usable(&user, &registered, passphrase).await? {
            return Ok(Some(credential));
        }
        if !is_enable_trading_trigger {
            return Ok(None);
        }
        self.provision(&user, passphrase).await.map(Some)
    }

    /// Drop the user's stored credentials and listing cache. Used when a
    /// rebate-binding mismatch requires a fresh agent-approval signature.
    pub async fn purge_user(&self, user_address: &str) -> Result<()> {
        let user = user_address.to_lowercase();
        self.purge_user_credentials(&user).await
    }

    async fn extra_agents_cached(&self, user: &str) -> Result<Vec<ExtraAgent>> {
        let key = user.to_string();
        if let Some(agents) = self.caches.extra_agents.get(&key).await {
            return Ok(agents);
        }
        let agents = self.info.extra_agents(user).await?;
        self.caches.extra_agents.set(key, agents.clone()).await;
        Ok(agents)
    }

    async fn find_usable(
        &self,
        user: &str,
        registered: &[ExtraAgent],
        passphrase: &str,
    ) -> Result<Option<AgentCredential>> {
        let now = now_ms();
        let mut usable: Vec<AgentCredential> = Vec::new();

        for agent in registered {
            if agent.address.is_empty() || agent.valid_until <= now + AGENT_USABLE_MARGIN_MS {
                continue;
            }
            let (base, _) = decode_agent_name(&agent.name);
            let Some(slot) = AgentSlot::from_wire_name(base) else {
                continue;
            };
            let Some(mut credential) = self.store.get(user, slot, passphrase).await? else {
                continue;
            };
            if credential.agent_address.eq_ignore_ascii_case(&agent.address) {
                // The registration, not the stored record, owns the expiry.
                credential.valid_until = agent.valid_until;
                usable.push(credential);
            }
        }

        usable.sort_by(|a, b| b.valid_until.cmp(&a.valid_until));
        Ok(usable.into_iter().next())
    }

    async fn provision(&self, user: &str, passphrase: &str) -> Result<AgentCredential> {
        self.caches.extra_agents.invalidate(&user.to_string()).await;

        // Fresh listing: the cached view may predate another run's work.
        let registered = self.info.extra_agents(user).await?;
        if let Some(existing) = self.find_usable(user, &registered, passphrase).await? {
            return Ok(existing);
        }

        let (signer, private_key_hex) = AgentSigner::generate()?;
        let private_key_hex = Zeroizing::new(private_key_hex);
        let agent_address = format!("{:#x}", signer.address());

        let plan = plan_provisioning(&registered);
        if let Some(evictee) = &plan.evict_registered_name {
            info!(
                user,
                evictee = evictee.as_str(),
                "evicting registered agent to free a slot"
            );
            self.exchange.remove_agent(evictee).await?;
            self.wait_for_agent_removal(user, evictee).await;
            self.caches.extra_agents.invalidate(&user.to_string()).await;
        }

        let snapshot = self.config.snapshot().await?;
        let valid_until = now_ms() + snapshot.agent_ttl_ms();
        let registration_name = encode_agent_name(plan.target, valid_until);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .exchange
                .approve_agent(&agent_address, Some(&registration_name), true)
                .await?;
            if response.is_default_ok() {
                break;
            }
            let message = response
                .err_message()
                .unwrap_or("unexpected response shape")
                .to_string();
            if message == PENDING_AGENT_REMOVAL && attempt < APPROVE_AGENT_ATTEMPTS {
                debug!(user, attempt, "agent approval blocked by pending removal, retrying");
                sleep(APPROVE_AGENT_BACKOFF).await;
                continue;
            }
            return Err(PerpdeskError::AgentProvisioning(message));
        }

        let encrypted_private_key = self.cipher.encode(&private_key_hex).await?;
        let credential = AgentCredential {
            user_address: user.to_string(),
            agent_address: agent_address.clone(),
            agent_name: plan.target,
            encrypted_private_key,
            valid_until,
        };
        self.store.upsert(credential).await?;

        // Read back decrypted before trusting the slot.
        let stored = self
            .store
            .get(user, plan.target, passphrase)
            .await?
            .ok_or_else(|| {
                PerpdeskError::CredentialStore("Credential missing after upsert".to_string())
            })?;
        if !stored.agent_address.eq_ignore_ascii_case(&agent_address) {
            return Err(PerpdeskError::CredentialStore(
                "Stored credential does not match the approved agent".to_string(),
            ));
        }

        self.caches.extra_agents.invalidate(&user.to_string()).await;
        info!(
            user,
            agent = agent_address.as_str(),
            slot = %plan.target,
            "provisioned new delegated agent"
        );
        Ok(stored)
    }

    /// Poll the listing until the removed agent disappears, bounded by the
    /// overall budget and a per-request timeout. Individual poll failures
    /// are logged and polling continues; running out the budget is not an
    /// error (the follow-up approval retries on the pending-removal signal).
    async fn wait_for_agent_removal(&self, user: &str, removed_name: &str) {
        let started = Instant::now();
        while started.elapsed() < REMOVAL_POLL_BUDGET {
            match timeout(REMOVAL_POLL_REQUEST_TIMEOUT, self.info.extra_agents(user)).await {
                Ok(Ok(agents)) => {
                    if !agents.iter().any(|agent| agent.name == removed_name) {
                        debug!(user, removed = removed_name, "agent removal confirmed");
                        return;
                    }
                }
                Ok(Err(error)) => warn!(user, %error, "removal poll request failed"),
                Err(_) => warn!(user, "removal poll request timed out"),
            }
            sleep(REMOVAL_POLL_INTERVAL).await;
        }
        warn!(
            user,
            removed = removed_name,
            "agent removal not confirmed within budget"
        );
    }

    /// Purge everything when the server config version changes. Subsequent
    /// ensure-agent calls provision fresh agents even where valid ones
    /// existed.
    async fn sync_config_version(&self) -> Result<()> {
        let version = self.config.snapshot().await?.config_version;
        let mut seen = self.seen_config_version.lock().await;
        if *seen != version {
            if seen.is_some() {
                info!(
                    version = version.as_deref().unwrap_or(""),
                    "server config version changed, purging cached agent credentials"
                );
                let users: Vec<String> = self.seen_users.iter().map(|u| u.key().clone()).collect();
                for user in users {
                    if let Err(error) = self.purge_user_credentials(&user).await {
                        warn!(user = user.as_str(), %error, "credential purge failed");
                    }
                }
                self.caches.clear_all().await;
            }
            *seen = version;
        }
        Ok(())
    }

    async fn purge_user_credentials(&self, user: &str) -> Result<()> {
        let credentials = self.store.get_all(user).await?;
        if !credentials.is_empty() {
            self.store.remove_many(&credentials).await?;
        }
        self.caches.extra_agents.invalidate(&user.to_string()).await;
        Ok(())
    }
}
