//! Signing adapters: the ephemeral agent key and the primary-wallet proxy.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::{Address, H256};
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;
use zeroize::Zeroize;

use crate::credentials::store::{AgentCredential, SecretCipher};
use crate::error::{PerpdeskError, Result};
use crate::signing::typed_data::TypedData;

/// Signs EIP-712 typed data for exchange actions.
///
/// Two implementations exist: [`AgentSigner`] holds an ephemeral in-memory
/// key; [`WalletSigner`] delegates to the external primary-wallet capability.
#[async_trait]
pub trait TypedDataSigner: Send + Sync {
    /// Returns the 65-byte signature as a `0x`-prefixed hex string.
    async fn sign_typed_data(&self, typed: &TypedData) -> Result<String>;

    fn address(&self) -> Address;
}

/// Ephemeral delegated-agent signer.
///
/// # Security
/// The private key hex is zeroized after the wallet is constructed; only the
/// parsed signing key lives in memory.
pub struct AgentSigner {
    inner: LocalWallet,
}

impl AgentSigner {
    /// Create a signer from a private key hex string.
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let mut secure_key = private_key.trim_start_matches("0x").to_string();

        let wallet = secure_key
            .parse::<LocalWallet>()
            .map_err(|e| PerpdeskError::Wallet(format!("Invalid private key: {e}")));

        secure_key.zeroize();

        Ok(Self { inner: wallet? })
    }

    /// Create a signer by decrypting a stored credential.
    pub async fn from_credential(
        cipher: &dyn SecretCipher,
        credential: &AgentCredential,
    ) -> Result<Self> {
        let mut plaintext = cipher.decode(&credential.encrypted_private_key).await?;
        let signer = Self::from_private_key(&plaintext);
        plaintext.zeroize();
        signer
    }

    /// Generate a fresh random key. Returns the signer plus the private key
    /// hex, which the caller must encrypt for storage and then zeroize.
    pub fn generate() -> Result<(Self, String)> {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        let key_hex = hex::encode(bytes);
        let signer = Self::from_private_key(&key_hex)?;
        Ok((signer, key_hex))
    }
}

#[async_trait]
impl TypedDataSigner for AgentSigner {
    async fn sign_typed_data(&self, typed: &TypedData) -> Result<String> {
        let signature = self
            .inner
            .sign_hash(H256::from(typed.signing_hash()))
            .map_err(|e| PerpdeskError::SigningFailed(format!("Failed to sign hash: {e}")))?;
        Ok(format!("0x{}", hex::encode(signature.to_vec())))
    }

    fn address(&self) -> Address {
        self.inner.address()
    }
}

impl std::fmt::Debug for AgentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSigner")
            .field("address", &self.address())
            .finish()
    }
}

/// External primary-wallet signing capability, one per user account.
#[async_trait]
pub trait PrimarySigner: Send + Sync {
    async fn sign_typed_data(&self, typed: &TypedData) -> Result<String>;

    fn address(&self) -> Address;
}

/// Resolves the primary signing capability for a user account id.
#[async_trait]
pub trait PrimarySignerProvider: Send + Sync {
    async fn signer_for(&self, user_account_id: &str) -> Result<Arc<dyn PrimarySigner>>;
}

/// A signature captured from the primary wallet, taken at most once.
#[derive(Debug, Clone)]
pub struct CapturedSignature {
    /// The signed message fields as JSON.
    pub message: Value,
    pub signature_hex: String,
    pub signer_address: Address,
    /// The `nonce` field of the signed message, when present.
    pub nonce: u64,
}

/// Primary-wallet adapter.
///
/// Captures the most recent successful signature so the orchestrator can
/// extract an agent-approval signature for out-of-band reporting without
/// asking the wallet to sign again.
pub struct WalletSigner {
    inner: Arc<dyn PrimarySigner>,
    captured: Mutex<Option<CapturedSignature>>,
}

impl WalletSigner {
    pub fn new(inner: Arc<dyn PrimarySigner>) -> Self {
        Self {
            inner,
            captured: Mutex::new(None),
        }
    }

    /// Returns the last captured signature and clears it.
    pub async fn take_last_signature_and_clear(&self) -> Option<CapturedSignature> {
        self.captured.lock().await.take()
    }
}

#[async_trait]
impl TypedDataSigner for WalletSigner {
    async fn sign_typed_data(&self, typed: &TypedData) -> Result<String> {
        let signature = self.inner.sign_typed_data(typed).await?;

        let stripped = signature.strip_prefix("0x").unwrap_or(&signature);
        if stripped.is_empty() || hex::decode(stripped).is_err() {
            return Err(PerpdeskError::SigningFailed(
                "External signer returned an empty or non-hex signature".to_string(),
            ));
        }

        *self.captured.lock().await = Some(CapturedSignature {
            message: typed.message_json(),
            signature_hex: signature.clone(),
            signer_address: self.inner.address(),
            nonce: typed.uint64_field("nonce").unwrap_or_default(),
        });

        Ok(signature)
    }

    fn address(&self) -> Address {
        self.inner.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::typed_data::{Eip712Domain, TypedValue};

    fn typed() -> TypedData {
        TypedData {
            domain: Eip712Domain {
                name: "HyperliquidSignTransaction",
                version: "1",
                chain_id: 42_161,
                verifying_contract: Address::zero(),
            },
            primary_type: "HyperliquidTransaction:ApproveAgent",
            fields: vec![
                ("hyperliquidChain", TypedValue::String("Mainnet".to_string())),
                ("agentAddress", TypedValue::Address(Address::zero())),
                ("agentName", TypedValue::String("test".to_string())),
                ("nonce", TypedValue::Uint64(42)),
            ],
        }
    }

    struct FixedPrimarySigner {
        signature: String,
    }

    #[async_trait]
    impl PrimarySigner for FixedPrimarySigner {
        async fn sign_typed_data(&self, _typed: &TypedData) -> Result<String> {
            Ok(self.signature.clone())
        }

        fn address(&self) -> Address {
            Address::zero()
        }
    }

    #[tokio::test]
    async fn agent_signer_signs_deterministically() {
        // Test private key (DO NOT use in production!)
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let signer = AgentSigner::from_private_key(key).unwrap();
        assert_eq!(
            format!("{:?}", signer.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );

        let a = signer.sign_typed_data(&typed()).await.unwrap();
        let b = signer.sign_typed_data(&typed()).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));
    }

    #[tokio::test]
    async fn generated_keys_are_distinct() {
        let (a, _) = AgentSigner::generate().unwrap();
        let (b, _) = AgentSigner::generate().unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[tokio::test]
    async fn wallet_signer_captures_once() {
        let signer = WalletSigner::new(Arc::new(FixedPrimarySigner {
            signature: format!("0x{}", "11".repeat(65)),
        }));
        signer.sign_typed_data(&typed()).await.unwrap();

        let captured = signer.take_last_signature_and_clear().await.unwrap();
        assert_eq!(captured.nonce, 42);
        assert_eq!(captured.message["agentName"], "test");
        assert!(signer.take_last_signature_and_clear().await.is_none());
    }

    #[tokio::test]
    async fn wallet_signer_rejects_empty_signature() {
        let signer = WalletSigner::new(Arc::new(FixedPrimarySigner {
            signature: String::new(),
        }));
        let err = signer.sign_typed_data(&typed()).await.unwrap_err();
        assert!(matches!(err, PerpdeskError::SigningFailed(_)));
        assert!(signer.take_last_signature_and_clear().await.is_none());
    }
}
