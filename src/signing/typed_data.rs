//! Hand-rolled EIP-712 encoding for exchange actions.
//!
//! The exchange signs two families of payloads: user-signed actions (agent
//! approval, builder fee, withdraw) whose fields are hashed directly, and L1
//! actions (orders, cancels, leverage) signed through an `Agent` envelope
//! over the action digest. Both reduce to the same domain-separator /
//! struct-hash / `\x19\x01` scheme implemented here.

use ethers::abi::{self, Token};
use ethers::types::{Address, U256};
use ethers::utils::keccak256;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PerpdeskError, Result};

/// EIP-712 domain for a signed payload.
#[derive(Debug, Clone)]
pub struct Eip712Domain {
    pub name: &'static str,
    pub version: &'static str,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Eip712Domain {
    /// Compute the EIP-712 domain separator hash
    pub fn separator_hash(&self) -> [u8; 32] {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );

        let tokens = vec![
            Token::FixedBytes(type_hash.to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ];

        keccak256(abi::encode(&tokens))
    }
}

/// A single typed field value.
#[derive(Debug, Clone)]
pub enum TypedValue {
    String(String),
    Address(Address),
    Uint64(u64),
    Bytes32([u8; 32]),
}

impl TypedValue {
    fn sol_type(&self) -> &'static str {
        match self {
            TypedValue::String(_) => "string",
            TypedValue::Address(_) => "address",
            TypedValue::Uint64(_) => "uint64",
            TypedValue::Bytes32(_) => "bytes32",
        }
    }

    fn encode(&self) -> Token {
        match self {
            TypedValue::String(s) => Token::FixedBytes(keccak256(s.as_bytes()).to_vec()),
            TypedValue::Address(a) => Token::Address(*a),
            TypedValue::Uint64(n) => Token::Uint(U256::from(*n)),
            TypedValue::Bytes32(b) => Token::FixedBytes(b.to_vec()),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            TypedValue::String(s) => Value::from(s.clone()),
            TypedValue::Address(a) => Value::from(format!("{a:#x}")),
            TypedValue::Uint64(n) => Value::from(*n),
            TypedValue::Bytes32(b) => Value::from(format!("0x{}", hex::encode(b))),
        }
    }
}

/// An ordered EIP-712 struct with its domain.
#[derive(Debug, Clone)]
pub struct TypedData {
    pub domain: Eip712Domain,
    pub primary_type: &'static str,
    pub fields: Vec<(&'static str, TypedValue)>,
}

impl TypedData {
    /// Canonical type descriptor, e.g.
    /// `Agent(string source,bytes32 connectionId)`.
    pub fn type_descriptor(&self) -> String {
        let fields = self
            .fields
            .iter()
            .map(|(name, value)| format!("{} {}", value.sol_type(), name))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}({})", self.primary_type, fields)
    }

    /// Compute the EIP-712 struct hash
    pub fn struct_hash(&self) -> [u8; 32] {
        let mut tokens = Vec::with_capacity(self.fields.len() + 1);
        tokens.push(Token::FixedBytes(
            keccak256(self.type_descriptor().as_bytes()).to_vec(),
        ));
        for (_, value) in &self.fields {
            tokens.push(value.encode());
        }
        keccak256(abi::encode(&tokens))
    }

    /// Final digest to sign: `keccak(0x1901 || domain || struct)`.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut encoded = Vec::with_capacity(66);
        encoded.extend_from_slice(b"\x19\x01");
        encoded.extend_from_slice(&self.domain.separator_hash());
        encoded.extend_from_slice(&self.struct_hash());
        keccak256(&encoded)
    }

    /// The message as JSON, used for capture and audit logging.
    pub fn message_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.fields {
            map.insert((*name).to_string(), value.to_json());
        }
        Value::Object(map)
    }

    /// Value of a `uint64` field, if present. Used to recover the nonce from
    /// a captured signature.
    pub fn uint64_field(&self, name: &str) -> Option<u64> {
        self.fields.iter().find_map(|(n, v)| match v {
            TypedValue::Uint64(value) if *n == name => Some(*value),
            _ => None,
        })
    }
}

/// An r/s/v signature split, the wire form expected by the exchange and the
/// rebate backend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SignatureRsv {
    pub r: String,
    pub s: String,
    pub v: u64,
}

/// Split a 65-byte `0x`-prefixed signature into its r/s/v parts.
pub fn parse_signature_rsv(signature_hex: &str) -> Result<SignatureRsv> {
    let stripped = signature_hex.trim_start_matches("0x");
    let bytes = hex::decode(stripped)
        .map_err(|e| PerpdeskError::SigningFailed(format!("Invalid signature hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(PerpdeskError::SigningFailed(format!(
            "Invalid signature length: {}",
            bytes.len()
        )));
    }
    let v = bytes[64] as u64;
    // Normalize the legacy 0/1 recovery id to 27/28.
    let v = if v < 27 { v + 27 } else { v };
    Ok(SignatureRsv {
        r: format!("0x{}", hex::encode(&bytes[0..32])),
        s: format!("0x{}", hex::encode(&bytes[32..64])),
        v,
    })
}
