//! The account status orchestrator.
//!
//! One linear machine with early exits:
//! address -> authorization -> activation -> builder fee -> rebate binding ->
//! agent ensure -> agent-bound client -> fire-and-forget referral. Checking
//! never mutates on-exchange state; mutations happen only on the explicit
//! enable-trading trigger.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::account::rebate::{BindPerpsWalletRequest, RebateApi};
use crate::account::status::{AccountStatusDetails, AccountStatusInfo, StatusHandle};
use crate::cache::ExchangeCaches;
use crate::config::ConfigProvider;
use crate::consts::{DEFAULT_REFERRAL_CODE, PERPS_EMPTY_ADDRESS, REBATE_NETWORK_ID};
use crate::credentials::manager::AgentCredentialManager;
use crate::credentials::store::AgentCredential;
use crate::error::{PerpdeskError, Result};
use crate::exchange::client::{ExchangeClient, SetupParams};
use crate::exchange::info::InfoClient;
use crate::signing::typed_data::parse_signature_rsv;
use crate::signing::CapturedSignature;

/// Obtains the user's authorization (passphrase) for credential access.
/// Prompting happens only on the explicit enable-trading trigger.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn cached_passphrase(&self) -> Result<Option<String>>;

    async fn prompt_passphrase(&self) -> Result<String>;
}

/// The account the orchestrator currently works on behalf of.
#[derive(Debug, Clone, Default)]
pub struct ActiveAccount {
    pub account_address: Option<String>,
    pub account_id: Option<String>,
    pub watch_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CheckStatusParams {
    /// Supplied by callers that already hold an authorization; otherwise the
    /// cached passphrase is used, and prompting happens only on the trigger.
    pub passphrase: Option<String>,
    pub is_enable_trading_trigger: bool,
}

pub struct AccountStatusOrchestrator {
    exchange: Arc<ExchangeClient>,
    info: Arc<InfoClient>,
    credentials: Arc<AgentCredentialManager>,
    config: Arc<dyn ConfigProvider>,
    authorization: Arc<dyn AuthorizationProvider>,
    rebate: Arc<dyn RebateApi>,
    caches: Arc<ExchangeCaches>,
    status: Arc<StatusHandle>,
    active_account: RwLock<ActiveAccount>,
    /// Addresses the exchange has confirmed as activated. Activation never
    /// reverts, so this set has no TTL.
    activated_users: DashSet<String>,
    /// `(user, agent, slot)` keys whose referral registration already ran.
    referral_marked: Arc<DashSet<String>>,
}

impl AccountStatusOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<ExchangeClient>,
        info: Arc<InfoClient>,
        credentials: Arc<AgentCredentialManager>,
        config: Arc<dyn ConfigProvider>,
        authorization: Arc<dyn AuthorizationProvider>,
        rebate: Arc<dyn RebateApi>,
        caches: Arc<ExchangeCaches>,
    ) -> Self {
        Self {
            exchange,
            info,
            credentials,
            config,
            authorization,
            rebate,
            caches,
            status: StatusHandle::new(),
            active_account: RwLock::new(ActiveAccount::default()),
            activated_users: DashSet::new(),
            referral_marked: Arc::new(DashSet::new()),
        }
    }

    pub fn status(&self) -> Arc<StatusHandle> {
        Arc::clone(&self.status)
    }

    pub async fn set_active_account(&self, account: ActiveAccount) {
        *self.active_account.write().await = account;
    }

    /// Run the machine with the enable-trading trigger and return the
    /// published status.
    pub async fn enable_trading(&self) -> Result<AccountStatusInfo> {
        self.check_account_status(CheckStatusParams {
            passphrase: None,
            is_enable_trading_trigger: true,
        })
        .await
    }

    /// Run the status machine. The published status always reflects the
    /// best-known state, even on partial failure; errors surface only when
    /// the caller explicitly triggered enablement.
    pub async fn check_account_status(
        &self,
        params: CheckStatusParams,
    ) -> Result<AccountStatusInfo> {
        let account = self.active_account.read().await.clone();
        let address = account.account_address.as_ref().map(|a| a.to_lowercase());

        self.status.begin_loading();
        let mut details = AccountStatusDetails::default();
        let outcome = self
            .run_machine(&account, address.as_deref(), &params, &mut details)
            .await;

        let info = AccountStatusInfo {
            account_address: address,
            details,
        };
        self.status.publish(info.clone()).await;
        self.status.end_loading_debounced();

        match outcome {
            Ok(()) => Ok(info),
            Err(error) if params.is_enable_trading_trigger => Err(error),
            Err(error) => {
                warn!(%error, "account status check failed");
                Ok(info)
            }
        }
    }

    /// Unbind the exchange client and reset the published status.
    pub async fn dispose(&self) {
        self.exchange.dispose().await;
        self.status.publish(AccountStatusInfo::default()).await;
    }

    async fn run_machine(
        &self,
        account: &ActiveAccount,
        address: Option<&str>,
        params: &CheckStatusParams,
        details: &mut AccountStatusDetails,
    ) -> Result<()> {
        let address = address.ok_or_else(|| {
            PerpdeskError::Config("Account status check requires an account address".to_string())
        })?;

        // Bind the client to the primary wallet for the approval steps.
        self.exchange
            .setup(SetupParams {
                user_address: address.to_string(),
                user_account_id: account.account_id.clone(),
                agent_credential: None,
                watch_only: account.watch_only,
            })
            .await?;

        let passphrase = match &params.passphrase {
            Some(passphrase) => Some(passphrase.clone()),
            None => self.authorization.cached_passphrase().await?,
        };
        let passphrase = match passphrase {
            Some(passphrase) => passphrase,
            None if params.is_enable_trading_trigger => {
                self.authorization.prompt_passphrase().await?
            }
            // Without authorization nothing can be checked or mutated.
            None => return Ok(()),
        };

        let activated = self.activated_users.contains(address) || {
            let role = self.info.user_role(address).await?;
            role.is_activated()
        };
        if !activated {
            // An unactivated account cannot hold agents; stop here.
            details.activated_ok = false;
            return Ok(());
        }
        self.activated_users.insert(address.to_string());
        details.activated_ok = true;

        // Builder fee approval must execute before agent setup.
        self.check_builder_fee(address, params.is_enable_trading_trigger, details)
            .await?;

        details.internal_rebate_bound_ok = self.check_rebate_binding(address).await;

        let credential = self
            .credentials
            .ensure_agent(address, &passphrase, params.is_enable_trading_trigger)
            .await?;
        let Some(credential) = credential else {
            return Ok(());
        };
        details.agent_ok = true;

        // Take the approval signature (if one was just produced) before the
        // signer binding is replaced below.
        let captured = self.exchange.take_captured_signature().await;

        self.exchange
            .setup(SetupParams {
                user_address: address.to_string(),
                user_account_id: account.account_id.clone(),
                agent_credential: Some(credential.clone()),
                watch_only: account.watch_only,
            })
            .await?;

        if let Some(captured) = captured {
            self.spawn_rebate_report(captured);
        }
        self.spawn_referral_registration(address, &credential);
        // Referral registration is best-effort, so it reports as satisfied.
        details.referral_code_ok = true;

        Ok(())
    }

    async fn check_builder_fee(
        &self,
        address: &str,
        is_enable_trading_trigger: bool,
        details: &mut AccountStatusDetails,
    ) -> Result<()> {
        let fee_config = self.config.snapshot().await?.builder_fee_config();
        if fee_config.builder_address.is_empty() {
            return Ok(());
        }

        let cache_key = format!("{address}-{}", fee_config.builder_address);
        let approved = match self.caches.approved_builder_fee.get(&cache_key).await {
            Some(approved) => approved,
            None => {
                let approved = self
                    .info
                    .max_builder_fee(address, &fee_config.builder_address)
                    .await?;
                self.caches
                    .approved_builder_fee
                    .set(cache_key.clone(), approved)
                    .await;
                approved
            }
        };

        if approved == fee_config.max_fee_rate {
            details.builder_fee_ok = true;
        } else if is_enable_trading_trigger {
            self.caches.approved_builder_fee.invalidate(&cache_key).await;
            let response = self
                .exchange
                .approve_builder_fee(&fee_config.builder_address, fee_config.max_fee_rate)
                .await?;
            if !response.is_default_ok() {
                return Err(PerpdeskError::BuilderFeeApproval(
                    response
                        .err_message()
                        .unwrap_or("unexpected response shape")
                        .to_string(),
                ));
            }
            details.builder_fee_ok = true;
        }
        Ok(())
    }

    /// First derived addresses are exempt without any network call; other
    /// addresses must be bound once the wallet's first address is. A
    /// detected mismatch purges the user's credentials so the next agent
    /// approval produces a reportable signature. Lookup failures never gate
    /// trading: they degrade to "bound".
    async fn check_rebate_binding(&self, address: &str) -> bool {
        match self.rebate_binding_inner(address).await {
            Ok(bound) => bound,
            Err(error) => {
                warn!(%error, "rebate binding check failed, treating as bound");
                true
            }
        }
    }

    async fn rebate_binding_inner(&self, address: &str) -> Result<bool> {
        let Some(reference) = self.rebate.binding_reference(address).await? else {
            return Ok(true);
        };
        if reference.reference_address.eq_ignore_ascii_case(address) {
            return Ok(true);
        }

        let first_bound = self
            .wallet_bound_cached(&reference.reference_address, &reference.reference_network_id)
            .await?;
        let current_bound = self
            .wallet_bound_cached(address, &reference.reference_network_id)
            .await?;

        if first_bound && !current_bound {
            // Force re-provisioning so the next approval signature can
            // complete the binding.
            self.credentials.purge_user(address).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn wallet_bound_cached(&self, address: &str, network_id: &str) -> Result<bool> {
        let key = format!("{}-{network_id}", address.to_lowercase());
        if let Some(bound) = self.caches.rebate_binding.get(&key).await {
            return Ok(bound);
        }
        let bound = self.rebate.is_wallet_bound(address, network_id).await?;
        self.caches.rebate_binding.set(key, bound).await;
        Ok(bound)
    }

    /// Report a fresh agent-approval signature to the rebate backend.
    /// Spawned with its own error boundary; the caller never waits on it.
    fn spawn_rebate_report(&self, captured: CapturedSignature) {
        let agent_address = captured
            .message
            .get("agentAddress")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        // Revocations sign through the same path and are not reportable.
        if agent_address.is_empty() || agent_address == PERPS_EMPTY_ADDRESS {
            return;
        }

        let rebate = Arc::clone(&self.rebate);
        let caches = Arc::clone(&self.caches);
        tokio::spawn(async move {
            let signer_address = format!("{:#x}", captured.signer_address);
            let outcome: Result<()> = async {
                if rebate
                    .is_wallet_bound(&signer_address, REBATE_NETWORK_ID)
                    .await?
                {
                    debug!(
                        signer = signer_address.as_str(),
                        "wallet already bound, skipping report"
                    );
                    return Ok(());
                }
                let Some(invite_code) = rebate.my_referral_code().await? else {
                    debug!("no referral code, skipping report");
                    return Ok(());
                };
                let signature = parse_signature_rsv(&captured.signature_hex)?;
                rebate
                    .bind_perps_wallet(BindPerpsWalletRequest {
                        action: captured.message,
                        nonce: captured.nonce,
                        signature,
                        invite_code,
                        reference_address: signer_address.clone(),
                        signer_address,
                    })
                    .await?;
                caches.rebate_binding.clear().await;
                Ok(())
            }
            .await;
            if let Err(error) = outcome {
                warn!(%error, "agent approval report failed");
            }
        });
    }

    /// Register the referral code once per `(user, agent, slot)`. Spawned
    /// fire-and-forget and marked done even on failure, matching the
    /// one-shot reference behavior.
    fn spawn_referral_registration(&self, address: &str, credential: &AgentCredential) {
        let key = format!(
            "{address}-{}-{}",
            credential.agent_address.to_lowercase(),
            credential.agent_name.wire_name()
        );
        if self.referral_marked.contains(&key) {
            return;
        }

        let exchange = Arc::clone(&self.exchange);
        let config = Arc::clone(&self.config);
        let marked = Arc::clone(&self.referral_marked);
        tokio::spawn(async move {
            let code = match config.snapshot().await {
                Ok(snapshot) => snapshot.referral_code(),
                Err(_) => DEFAULT_REFERRAL_CODE.to_string(),
            };
            let result = exchange.set_referrer_code(&code).await;
            marked.insert(key);
            match result {
                Ok(response) if response.is_ok() => debug!("referral code registered"),
                Ok(response) => debug!(
                    rejection = response.err_message().unwrap_or_default(),
                    "referral code registration rejected"
                ),
                Err(error) => warn!(%error, "referral code registration failed"),
            }
        });
    }
}
