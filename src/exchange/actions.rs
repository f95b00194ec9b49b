//! Action payloads and their typed-data companions.
//!
//! User-signed actions carry their fields in both the JSON action and the
//! EIP-712 message; L1 actions are signed through an `Agent` envelope whose
//! `connectionId` is the keccak digest of the serialized action and nonce.

use ethers::types::Address;
use ethers::utils::keccak256;
use serde_json::{json, Value};

use crate::consts::{
    HYPERLIQUID_CHAIN_NAME, L1_ACTION_SOURCE, SIGNATURE_CHAIN_ID, SIGNATURE_CHAIN_ID_HEX,
};
use crate::error::{PerpdeskError, Result};
use crate::signing::typed_data::{Eip712Domain, TypedData, TypedValue};

fn user_signed_domain() -> Eip712Domain {
    Eip712Domain {
        name: "HyperliquidSignTransaction",
        version: "1",
        chain_id: SIGNATURE_CHAIN_ID,
        verifying_contract: Address::zero(),
    }
}

fn l1_domain() -> Eip712Domain {
    Eip712Domain {
        name: "Exchange",
        version: "1",
        chain_id: 1337,
        verifying_contract: Address::zero(),
    }
}

fn parse_address(value: &str) -> Result<Address> {
    value
        .parse::<Address>()
        .map_err(|e| PerpdeskError::AddressParsing(format!("{value}: {e}")))
}

/// Build the approveAgent action and its signing payload.
///
/// `agent_name` is the full registration string, normally
/// `"<slot> valid_until <ms>"`; `None` clears the name field (the shape the
/// exchange expects for unnamed approvals).
pub fn approve_agent(agent_address: &str, agent_name: Option<&str>, nonce: u64) -> Result<(Value, TypedData)> {
    let agent = parse_address(agent_address)?;
    let name = agent_name.unwrap_or_default();
    let action = json!({
        "type": "approveAgent",
        "hyperliquidChain": HYPERLIQUID_CHAIN_NAME,
        "signatureChainId": SIGNATURE_CHAIN_ID_HEX,
        "agentAddress": format!("{agent:#x}"),
        "agentName": agent_name,
        "nonce": nonce,
    });
    let typed = TypedData {
        domain: user_signed_domain(),
        primary_type: "HyperliquidTransaction:ApproveAgent",
        fields: vec![
            (
                "hyperliquidChain",
                TypedValue::String(HYPERLIQUID_CHAIN_NAME.to_string()),
            ),
            ("agentAddress", TypedValue::Address(agent)),
            ("agentName", TypedValue::String(name.to_string())),
            ("nonce", TypedValue::Uint64(nonce)),
        ],
    };
    Ok((action, typed))
}

/// Build the approveBuilderFee action and its signing payload.
/// `max_fee_rate` is the percent string, e.g. `"0.045%"`.
pub fn approve_builder_fee(builder: &str, max_fee_rate: &str, nonce: u64) -> Result<(Value, TypedData)> {
    let builder_address = parse_address(builder)?;
    let action = json!({
        "type": "approveBuilderFee",
        "hyperliquidChain": HYPERLIQUID_CHAIN_NAME,
        "signatureChainId": SIGNATURE_CHAIN_ID_HEX,
        "maxFeeRate": max_fee_rate,
        "builder": format!("{builder_address:#x}"),
        "nonce": nonce,
    });
    let typed = TypedData {
        domain: user_signed_domain(),
        primary_type: "HyperliquidTransaction:ApproveBuilderFee",
        fields: vec![
            (
                "hyperliquidChain",
                TypedValue::String(HYPERLIQUID_CHAIN_NAME.to_string()),
            ),
            ("maxFeeRate", TypedValue::String(max_fee_rate.to_string())),
            ("builder", TypedValue::Address(builder_address)),
            ("nonce", TypedValue::Uint64(nonce)),
        ],
    };
    Ok((action, typed))
}

/// Build the withdraw action and its signing payload. `amount` is a USD
/// string; `time` doubles as the request nonce.
pub fn withdraw(destination: &str, amount: &str, time: u64) -> Result<(Value, TypedData)> {
    let destination_address = parse_address(destination)?;
    let action = json!({
        "type": "withdraw3",
        "hyperliquidChain": HYPERLIQUID_CHAIN_NAME,
        "signatureChainId": SIGNATURE_CHAIN_ID_HEX,
        "destination": format!("{destination_address:#x}"),
        "amount": amount,
        "time": time,
    });
    let typed = TypedData {
        domain: user_signed_domain(),
        primary_type: "HyperliquidTransaction:Withdraw",
        fields: vec![
            (
                "hyperliquidChain",
                TypedValue::String(HYPERLIQUID_CHAIN_NAME.to_string()),
            ),
            (
                "destination",
                TypedValue::String(format!("{destination_address:#x}")),
            ),
            ("amount", TypedValue::String(amount.to_string())),
            ("time", TypedValue::Uint64(time)),
        ],
    };
    Ok((action, typed))
}

/// Build the `Agent` envelope signed for L1 actions (orders, cancels,
/// leverage and margin updates, referrer registration).
pub fn l1_envelope(action: &Value, nonce: u64) -> Result<TypedData> {
    let mut encoded = serde_json::to_vec(action)?;
    encoded.extend_from_slice(&nonce.to_be_bytes());
    // No vault address in this subsystem.
    encoded.push(0x00);
    let connection_id = keccak256(&encoded);

    Ok(TypedData {
        domain: l1_domain(),
        primary_type: "Agent",
        fields: vec![
            ("source", TypedValue::String(L1_ACTION_SOURCE.to_string())),
            ("connectionId", TypedValue::Bytes32(connection_id)),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn approve_agent_action_shape() {
        let (action, typed) = approve_agent(AGENT, Some("PerpDeskAgent1 valid_until 1"), 7).unwrap();
        assert_eq!(action["type"], "approveAgent");
        assert_eq!(action["agentAddress"], AGENT);
        assert_eq!(action["agentName"], "PerpDeskAgent1 valid_until 1");
        assert_eq!(action["signatureChainId"], SIGNATURE_CHAIN_ID_HEX);
        assert_eq!(typed.uint64_field("nonce"), Some(7));
        assert_eq!(
            typed.type_descriptor(),
            "HyperliquidTransaction:ApproveAgent(string hyperliquidChain,address agentAddress,string agentName,uint64 nonce)"
        );
    }

    #[test]
    fn approve_agent_without_name_is_null() {
        let (action, _) = approve_agent(AGENT, None, 7).unwrap();
        assert!(action["agentName"].is_null());
    }

    #[test]
    fn l1_envelope_is_nonce_sensitive() {
        let action = serde_json::json!({"type": "setReferrer", "code": "PERPDESK"});
        let a = l1_envelope(&action, 1).unwrap();
        let b = l1_envelope(&action, 2).unwrap();
        assert_ne!(a.signing_hash(), b.signing_hash());
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(approve_agent("not-an-address", None, 1).is_err());
    }
}
