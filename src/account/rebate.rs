//! Rebate-binding checks against the external rebate backend.
//!
//! The first address derived under a wallet never requires binding; later
//! addresses must bind once the first one has. Binding is bookkeeping for
//! rebates, never a gate on trading, so every failure here degrades to
//! "treat as bound" with a log line.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::signing::typed_data::SignatureRsv;

/// Identifies the wallet's first derived address, against which the
/// exemption and cross-check are decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebateBindingReference {
    pub wallet_id: String,
    pub reference_address: String,
    pub reference_network_id: String,
}

/// Payload reported out-of-band after a successful agent approval, so the
/// backend can bind the wallet without a second signature.
#[derive(Debug, Clone, Serialize)]
pub struct BindPerpsWalletRequest {
    /// The signed approveAgent message fields.
    pub action: Value,
    pub nonce: u64,
    pub signature: SignatureRsv,
    pub invite_code: String,
    pub reference_address: String,
    pub signer_address: String,
}

/// The rebate/referral backend, consumed as an external collaborator.
#[async_trait]
pub trait RebateApi: Send + Sync {
    /// The wallet's binding reference for this account, or `None` when the
    /// account does not belong to a rebate-tracked wallet.
    async fn binding_reference(&self, user_address: &str)
        -> Result<Option<RebateBindingReference>>;

    async fn is_wallet_bound(&self, address: &str, network_id: &str) -> Result<bool>;

    /// The user's own referral code, when one exists.
    async fn my_referral_code(&self) -> Result<Option<String>>;

    async fn bind_perps_wallet(&self, request: BindPerpsWalletRequest) -> Result<()>;
}
