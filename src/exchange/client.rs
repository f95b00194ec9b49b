//! The signed exchange client.
//!
//! Every method signs its action, submits it through the transport, and logs
//! one structured event with the request payload and the normalized response.
//! That log line is the only audit trail for signed financial actions, so it
//! is emitted on every path, success or failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::cache::ExchangeCaches;
use crate::config::{fee_rate_percent, ConfigProvider};
use crate::consts::PERPS_EMPTY_ADDRESS;
use crate::credentials::store::{AgentCredential, SecretCipher};
use crate::error::{PerpdeskError, Result};
use crate::exchange::actions;
use crate::exchange::transport::ExchangeTransport;
use crate::exchange::types::{
    BuilderFeeInfo, ExchangeResponse, OrderGrouping, RawCancelParams, RawOrderParams,
};
use crate::orders::builder::{
    OrderBuilder, OrderCloseParams, OrderOpenParams, PlaceOrderParams, PositionTpslParams,
};
use crate::signing::typed_data::parse_signature_rsv;
use crate::signing::{
    AgentSigner, CapturedSignature, PrimarySignerProvider, TypedDataSigner, WalletSigner,
};

/// Binding parameters for [`ExchangeClient::setup`]. Each call fully
/// replaces the previous binding.
#[derive(Clone)]
pub struct SetupParams {
    pub user_address: String,
    /// Required when no agent credential is supplied (primary-wallet mode).
    pub user_account_id: Option<String>,
    /// Present -> sign with the ephemeral agent key.
    pub agent_credential: Option<AgentCredential>,
    /// Watch-only accounts can read but never sign.
    pub watch_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLeverageRequest {
    pub asset_id: u32,
    pub is_cross: bool,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateIsolatedMarginRequest {
    pub asset_id: u32,
    pub is_buy: bool,
    /// Margin delta in native units; negative removes margin.
    pub ntli: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub asset_id: u32,
    pub oid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    /// The withdraw action is always signed by the primary wallet.
    pub user_account_id: String,
    pub destination: String,
    /// USD amount as a decimal string.
    pub amount: String,
}

#[derive(Clone)]
struct ClientState {
    account: String,
    watch_only: bool,
    /// None for watch-only bindings.
    signer: Option<Arc<dyn TypedDataSigner>>,
    /// Present when the active signer is the primary wallet.
    primary: Option<Arc<WalletSigner>>,
    builder_fee: Option<BuilderFeeInfo>,
}

struct ActiveState {
    account: String,
    signer: Arc<dyn TypedDataSigner>,
    builder_fee: Option<BuilderFeeInfo>,
}

pub struct ExchangeClient {
    transport: Arc<dyn ExchangeTransport>,
    signers: Arc<dyn PrimarySignerProvider>,
    cipher: Arc<dyn SecretCipher>,
    config: Arc<dyn ConfigProvider>,
    caches: Arc<ExchangeCaches>,
    builder: OrderBuilder,
    state: RwLock<Option<ClientState>>,
    last_nonce: AtomicU64,
}

impl ExchangeClient {
    pub fn new(
        transport: Arc<dyn ExchangeTransport>,
        signers: Arc<dyn PrimarySignerProvider>,
        cipher: Arc<dyn SecretCipher>,
        config: Arc<dyn ConfigProvider>,
        caches: Arc<ExchangeCaches>,
    ) -> Self {
        Self {
            transport,
            signers,
            cipher,
            config,
            caches,
            builder: OrderBuilder::default(),
            state: RwLock::new(None),
            last_nonce: AtomicU64::new(0),
        }
    }

    /// Bind the client to a user, selecting the signer: ephemeral agent when
    /// a credential is supplied, primary wallet otherwise.
    pub async fn setup(&self, params: SetupParams) -> Result<()> {
        if params.user_address.is_empty() {
            return Err(PerpdeskError::Config(
                "setup requires a user address".to_string(),
            ));
        }
        let account = params.user_address.to_lowercase();

        let snapshot = self.config.snapshot().await?;
        let fee_config = snapshot.builder_fee_config();
        let builder_fee = if fee_config.builder_address.is_empty() {
            None
        } else {
            Some(BuilderFeeInfo {
                b: fee_config.builder_address,
                f: fee_config.max_fee_rate,
            })
        };

        let (signer, primary): (Option<Arc<dyn TypedDataSigner>>, Option<Arc<WalletSigner>>) =
            if params.watch_only {
                (None, None)
            } else if let Some(credential) = params.agent_credential {
                let agent = AgentSigner::from_credential(self.cipher.as_ref(), &credential).await?;
                (Some(Arc::new(agent)), None)
            } else {
                let account_id = params.user_account_id.as_deref().ok_or_else(|| {
                    PerpdeskError::Config(
                        "setup requires a user account id without an agent credential".to_string(),
                    )
                })?;
                let wallet = Arc::new(WalletSigner::new(self.signers.signer_for(account_id).await?));
                (Some(wallet.clone() as Arc<dyn TypedDataSigner>), Some(wallet))
            };

        *self.state.write().await = Some(ClientState {
            account,
            watch_only: params.watch_only,
            signer,
            primary,
            builder_fee,
        });
        Ok(())
    }

    pub async fn is_setup(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Drops the binding; trading methods fail `NotConfigured` afterwards.
    pub async fn dispose(&self) {
        *self.state.write().await = None;
    }

    pub async fn account(&self) -> Option<String> {
        self.state.read().await.as_ref().map(|s| s.account.clone())
    }

    /// The last signature produced by the primary-wallet signer, taken at
    /// most once. Used to report an agent approval out-of-band.
    pub async fn take_captured_signature(&self) -> Option<CapturedSignature> {
        let primary = self
            .state
            .read()
            .await
            .as_ref()
            .and_then(|s| s.primary.clone())?;
        primary.take_last_signature_and_clear().await
    }

    /// Guard shared by every trading method: reject watch-only accounts and
    /// unbound clients before any signing or network I/O.
    async fn trading_state(&self) -> Result<ActiveState> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(PerpdeskError::NotConfigured)?;
        if state.watch_only {
            return Err(PerpdeskError::WatchedAccountTrade);
        }
        let signer = state.signer.clone().ok_or(PerpdeskError::NotConfigured)?;
        Ok(ActiveState {
            account: state.account.clone(),
            signer,
            builder_fee: state.builder_fee.clone(),
        })
    }

    /// Millisecond nonce, strictly increasing within the process.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis() as u64;
        let previous = self
            .last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(last.max(now.saturating_sub(1)) + 1)
            })
            .unwrap_or(now);
        previous.max(now.saturating_sub(1)) + 1
    }

    fn log_call(
        &self,
        op: &'static str,
        account: &str,
        request: &Value,
        result: &Result<ExchangeResponse>,
    ) {
        match result {
            Ok(response) => {
                let response_json = serde_json::to_string(response).unwrap_or_default();
                if response.is_ok() {
                    info!(
                        op,
                        account,
                        request = %request,
                        response = %response_json,
                        "exchange request completed"
                    );
                } else {
                    warn!(
                        op,
                        account,
                        request = %request,
                        response = %response_json,
                        "exchange request rejected"
                    );
                }
            }
            Err(err) => {
                error!(
                    op,
                    account,
                    request = %request,
                    error = %err,
                    "exchange request failed"
                );
            }
        }
    }

    async fn dispatch(
        &self,
        op: &'static str,
        account: &str,
        payload: Value,
    ) -> Result<ExchangeResponse> {
        let result = self.transport.exchange(payload.clone()).await;
        self.log_call(op, account, &payload, &result);
        result
    }

    /// Sign and submit an L1 (agent-signable) action.
    async fn submit_l1(
        &self,
        state: &ActiveState,
        op: &'static str,
        action: Value,
    ) -> Result<ExchangeResponse> {
        let nonce = self.next_nonce();
        let typed = actions::l1_envelope(&action, nonce)?;
        let signature = state.signer.sign_typed_data(&typed).await?;
        let payload = json!({
            "action": action,
            "nonce": nonce,
            "signature": parse_signature_rsv(&signature)?,
        });
        self.dispatch(op, &state.account, payload).await
    }

    // ==================== Approvals & account actions ====================

    /// Authorize (or, with the zero address, revoke) a delegated agent.
    pub async fn approve_agent(
        &self,
        agent_address: &str,
        agent_name: Option<&str>,
        authorize: bool,
    ) -> Result<ExchangeResponse> {
        let state = self.trading_state().await?;
        let op = if authorize && agent_address != PERPS_EMPTY_ADDRESS {
            "approveAgent"
        } else {
            "removeAgent"
        };
        let nonce = self.next_nonce();
        let (action, typed) = actions::approve_agent(agent_address, agent_name, nonce)?;
        let signature = state.signer.sign_typed_data(&typed).await?;
        let payload = json!({
            "action": action,
            "nonce": nonce,
            "signature": parse_signature_rsv(&signature)?,
        });
        self.dispatch(op, &state.account, payload).await
    }

    /// Revoke a registered agent by name (zero-address approval).
    pub async fn remove_agent(&self, registered_name: &str) -> Result<ExchangeResponse> {
        self.approve_agent(PERPS_EMPTY_ADDRESS, Some(registered_name), true)
            .await
    }

    /// Approve the builder fee. `max_fee_rate` is in tenths of a basis point.
    pub async fn approve_builder_fee(
        &self,
        builder: &str,
        max_fee_rate: i64,
    ) -> Result<ExchangeResponse> {
        let state = self.trading_state().await?;
        let nonce = self.next_nonce();
        let (action, typed) =
            actions::approve_builder_fee(builder, &fee_rate_percent(max_fee_rate), nonce)?;
        let signature = state.signer.sign_typed_data(&typed).await?;
        let payload = json!({
            "action": action,
            "nonce": nonce,
            "signature": parse_signature_rsv(&signature)?,
        });
        self.dispatch("approveBuilderFee", &state.account, payload)
            .await
    }

    pub async fn set_referrer_code(&self, code: &str) -> Result<ExchangeResponse> {
        let state = self.trading_state().await?;
        let action = json!({"type": "setReferrer", "code": code});
        self.submit_l1(&state, "setReferrer", action).await
    }

    pub async fn update_leverage(&self, params: UpdateLeverageRequest) -> Result<ExchangeResponse> {
        let state = self.trading_state().await?;
        let action = json!({
            "type": "updateLeverage",
            "asset": params.asset_id,
            "isCross": params.is_cross,
            "leverage": params.leverage,
        });
        self.submit_l1(&state, "updateLeverage", action).await
    }

    pub async fn update_isolated_margin(
        &self,
        params: UpdateIsolatedMarginRequest,
    ) -> Result<ExchangeResponse> {
        let state = self.trading_state().await?;
        let action = json!({
            "type": "updateIsolatedMargin",
            "asset": params.asset_id,
            "isBuy": params.is_buy,
            "ntli": params.ntli,
        });
        self.submit_l1(&state, "updateIsolatedMargin", action).await
    }

    /// Withdraw collateral. Always signed by the primary wallet, regardless
    /// of the active signer binding.
    pub async fn withdraw(&self, params: WithdrawRequest) -> Result<ExchangeResponse> {
        let state = self.trading_state().await?;
        let wallet = WalletSigner::new(self.signers.signer_for(&params.user_account_id).await?);
        let time = self.next_nonce();
        let (action, typed) = actions::withdraw(&params.destination, &params.amount, time)?;
        let signature = wallet.sign_typed_data(&typed).await?;
        let payload = json!({
            "action": action,
            "nonce": time,
            "signature": parse_signature_rsv(&signature)?,
        });
        self.dispatch("withdraw", &state.account, payload).await
    }

    // ==================== Orders ====================

    /// Submit raw orders under a grouping, attaching builder-fee metadata
    /// when configured.
    pub async fn place_orders(
        &self,
        orders: Vec<RawOrderParams>,
        grouping: OrderGrouping,
    ) -> Result<ExchangeResponse> {
        self.place_orders_logged(orders, grouping, "placeOrders")
            .await
    }

    async fn place_orders_logged(
        &self,
        orders: Vec<RawOrderParams>,
        grouping: OrderGrouping,
        op: &'static str,
    ) -> Result<ExchangeResponse> {
        let state = self.trading_state().await?;
        let mut action = json!({
            "type": "order",
            "orders": orders,
            "grouping": grouping,
        });
        if let Some(fee) = &state.builder_fee {
            action["builder"] = serde_json::to_value(fee)?;
        }
        let result = self.submit_l1(&state, op, action).await;

        let succeeded = matches!(&result, Ok(response) if response.is_ok());
        if !succeeded {
            // A rejected submission may mean our approval state is stale.
            self.caches.extra_agents.clear().await;
            self.caches.approved_builder_fee.clear().await;
        }
        result
    }

    pub async fn cancel_orders(&self, cancels: &[CancelOrderRequest]) -> Result<ExchangeResponse> {
        let state = self.trading_state().await?;
        let wire: Vec<RawCancelParams> = cancels
            .iter()
            .map(|c| RawCancelParams {
                a: c.asset_id,
                o: c.oid,
            })
            .collect();
        let action = json!({"type": "cancel", "cancels": wire});
        self.submit_l1(&state, "cancelOrder", action).await
    }

    /// Market or limit open with optional bracket TP/SL.
    pub async fn order_open(&self, params: OrderOpenParams) -> Result<ExchangeResponse> {
        self.trading_state().await?;
        let (orders, grouping) = self.builder.build_open(&params)?;
        self.place_orders_logged(orders, grouping, "orderOpen").await
    }

    /// Reduce-only position closes.
    pub async fn orders_close(&self, params: &[OrderCloseParams]) -> Result<ExchangeResponse> {
        self.trading_state().await?;
        let (orders, grouping) = self.builder.build_close(params)?;
        self.place_orders_logged(orders, grouping, "ordersClose")
            .await
    }

    /// Position-level TP/SL without a size change.
    pub async fn set_position_tpsl(&self, params: PositionTpslParams) -> Result<ExchangeResponse> {
        self.trading_state().await?;
        let (orders, grouping) = self.builder.build_position_tpsl(&params)?;
        self.place_orders_logged(orders, grouping, "setPositionTpsl")
            .await
    }

    /// A single resting order.
    pub async fn place_order(&self, params: PlaceOrderParams) -> Result<ExchangeResponse> {
        self.trading_state().await?;
        if params.limit_px.is_empty() || params.limit_px == "0" {
            return Err(PerpdeskError::InvalidOrder(
                "Orders require an execution price".to_string(),
            ));
        }
        let (orders, grouping) = self.builder.build_single(&params);
        self.place_orders_logged(orders, grouping, "placeOrder")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PerpConfigSnapshot, StaticConfigProvider};
    use crate::credentials::store::PlainTextCipher;
    use crate::exchange::types::{OkResponse, Tif};
    use crate::signing::{PrimarySigner, TypedData};
    use async_trait::async_trait;
    use ethers::signers::{LocalWallet, Signer as EthersSigner};
    use ethers::types::{Address, H256};
    use std::sync::Mutex;

    const USER: &str = "0xF39fd6E51AAD88f6f4CE6AB8827279CFFFB92266";

    struct RecordingTransport {
        requests: Mutex<Vec<Value>>,
        response: ExchangeResponse,
    }

    impl RecordingTransport {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                response: ExchangeResponse::Ok(OkResponse {
                    kind: "default".to_string(),
                    data: None,
                }),
            })
        }

        fn recorded(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExchangeTransport for RecordingTransport {
        async fn exchange(&self, payload: Value) -> Result<ExchangeResponse> {
            self.requests.lock().unwrap().push(payload);
            Ok(self.response.clone())
        }

        async fn info(&self, _request: Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    struct TestPrimarySigner {
        wallet: LocalWallet,
    }

    #[async_trait]
    impl PrimarySigner for TestPrimarySigner {
        async fn sign_typed_data(&self, typed: &TypedData) -> Result<String> {
            let signature = self
                .wallet
                .sign_hash(H256::from(typed.signing_hash()))
                .map_err(|e| PerpdeskError::SigningFailed(e.to_string()))?;
            Ok(format!("0x{}", hex::encode(signature.to_vec())))
        }

        fn address(&self) -> Address {
            self.wallet.address()
        }
    }

    struct TestSignerProvider;

    #[async_trait]
    impl PrimarySignerProvider for TestSignerProvider {
        async fn signer_for(&self, _user_account_id: &str) -> Result<Arc<dyn PrimarySigner>> {
            let wallet: LocalWallet =
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
                    .parse()
                    .unwrap();
            Ok(Arc::new(TestPrimarySigner { wallet }))
        }
    }

    fn client_with(
        transport: Arc<RecordingTransport>,
        snapshot: PerpConfigSnapshot,
    ) -> ExchangeClient {
        ExchangeClient::new(
            transport,
            Arc::new(TestSignerProvider),
            Arc::new(PlainTextCipher),
            StaticConfigProvider::new(snapshot),
            Arc::new(ExchangeCaches::new()),
        )
    }

    fn wallet_setup() -> SetupParams {
        SetupParams {
            user_address: USER.to_string(),
            user_account_id: Some("account-1".to_string()),
            agent_credential: None,
            watch_only: false,
        }
    }

    fn open_params() -> OrderOpenParams {
        OrderOpenParams {
            asset_id: 0,
            is_buy: true,
            kind: crate::orders::builder::OpenOrderKind::Limit,
            price: "43000".to_string(),
            size: "0.5".to_string(),
            tp_trigger_px: None,
            sl_trigger_px: None,
            slippage: None,
        }
    }

    #[tokio::test]
    async fn trading_before_setup_is_not_configured() {
        let client = client_with(RecordingTransport::ok(), PerpConfigSnapshot::default());
        let err = client.order_open(open_params()).await.unwrap_err();
        assert!(matches!(err, PerpdeskError::NotConfigured));
    }

    #[tokio::test]
    async fn watch_only_accounts_cannot_trade() {
        let transport = RecordingTransport::ok();
        let client = client_with(transport.clone(), PerpConfigSnapshot::default());
        client
            .setup(SetupParams {
                watch_only: true,
                ..wallet_setup()
            })
            .await
            .unwrap();

        let err = client.order_open(open_params()).await.unwrap_err();
        assert!(matches!(err, PerpdeskError::WatchedAccountTrade));
        assert!(transport.recorded().is_empty(), "no network call made");
    }

    #[tokio::test]
    async fn orders_carry_builder_fee_when_configured() {
        let transport = RecordingTransport::ok();
        let client = client_with(
            transport.clone(),
            PerpConfigSnapshot {
                builder_address: Some("0xBBBB000000000000000000000000000000000001".to_string()),
                max_builder_fee_rate: Some(45),
                ..Default::default()
            },
        );
        client.setup(wallet_setup()).await.unwrap();
        client.order_open(open_params()).await.unwrap();

        let requests = transport.recorded();
        assert_eq!(requests.len(), 1);
        let action = &requests[0]["action"];
        assert_eq!(action["type"], "order");
        assert_eq!(action["grouping"], "na");
        assert_eq!(
            action["builder"]["b"],
            "0xbbbb000000000000000000000000000000000001"
        );
        assert_eq!(action["builder"]["f"], 45);
        assert!(requests[0]["signature"]["r"].is_string());
    }

    #[tokio::test]
    async fn orders_omit_builder_fee_when_unconfigured() {
        let transport = RecordingTransport::ok();
        let client = client_with(
            transport.clone(),
            PerpConfigSnapshot {
                builder_address: Some(String::new()),
                ..Default::default()
            },
        );
        client.setup(wallet_setup()).await.unwrap();
        client.order_open(open_params()).await.unwrap();

        let requests = transport.recorded();
        assert!(requests[0]["action"].get("builder").is_none());
    }

    #[tokio::test]
    async fn remove_agent_uses_zero_address() {
        let transport = RecordingTransport::ok();
        let client = client_with(transport.clone(), PerpConfigSnapshot::default());
        client.setup(wallet_setup()).await.unwrap();
        client
            .remove_agent("PerpDeskAgent1 valid_until 123")
            .await
            .unwrap();

        let requests = transport.recorded();
        let action = &requests[0]["action"];
        assert_eq!(action["type"], "approveAgent");
        assert_eq!(action["agentAddress"], PERPS_EMPTY_ADDRESS);
        assert_eq!(action["agentName"], "PerpDeskAgent1 valid_until 123");
    }

    #[tokio::test]
    async fn cancel_orders_map_to_wire_form() {
        let transport = RecordingTransport::ok();
        let client = client_with(transport.clone(), PerpConfigSnapshot::default());
        client.setup(wallet_setup()).await.unwrap();
        client
            .cancel_orders(&[CancelOrderRequest {
                asset_id: 4,
                oid: 991,
            }])
            .await
            .unwrap();

        let requests = transport.recorded();
        assert_eq!(requests[0]["action"]["cancels"][0]["a"], 4);
        assert_eq!(requests[0]["action"]["cancels"][0]["o"], 991);
    }

    #[tokio::test]
    async fn place_order_requires_price() {
        let client = client_with(RecordingTransport::ok(), PerpConfigSnapshot::default());
        client.setup(wallet_setup()).await.unwrap();
        let err = client
            .place_order(PlaceOrderParams {
                asset_id: 0,
                is_buy: true,
                limit_px: "0".to_string(),
                size: "1".to_string(),
                reduce_only: false,
                tif: Tif::Gtc,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PerpdeskError::InvalidOrder(_)));
    }

    #[tokio::test]
    async fn setup_fully_replaces_state() {
        let transport = RecordingTransport::ok();
        let client = client_with(transport.clone(), PerpConfigSnapshot::default());
        client.setup(wallet_setup()).await.unwrap();
        assert!(client.is_setup().await);

        client
            .setup(SetupParams {
                watch_only: true,
                ..wallet_setup()
            })
            .await
            .unwrap();
        let err = client.order_open(open_params()).await.unwrap_err();
        assert!(matches!(err, PerpdeskError::WatchedAccountTrade));

        client.dispose().await;
        assert!(!client.is_setup().await);
    }

    #[tokio::test]
    async fn nonces_are_strictly_increasing() {
        let client = client_with(RecordingTransport::ok(), PerpConfigSnapshot::default());
        let mut last = 0;
        for _ in 0..100 {
            let nonce = client.next_nonce();
            assert!(nonce > last);
            last = nonce;
        }
    }
}
