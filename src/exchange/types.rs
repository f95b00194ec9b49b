//! Wire shapes for the exchange protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Time-in-force for resting orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tif {
    /// Add-liquidity-only
    Alo,
    /// Immediate-or-cancel
    Ioc,
    /// Good-til-cancelled
    Gtc,
}

/// Which side of a position a trigger order protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TpslKind {
    Tp,
    Sl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrderType {
    pub tif: Tif,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOrderType {
    pub is_market: bool,
    pub trigger_px: String,
    pub tpsl: TpslKind,
}

/// The `t` field of a raw order: `{"limit":{...}}` or `{"trigger":{...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderTypeParams {
    Limit { limit: LimitOrderType },
    Trigger { trigger: TriggerOrderType },
}

impl OrderTypeParams {
    pub fn limit(tif: Tif) -> Self {
        OrderTypeParams::Limit {
            limit: LimitOrderType { tif },
        }
    }

    pub fn trigger_market(trigger_px: String, tpsl: TpslKind) -> Self {
        OrderTypeParams::Trigger {
            trigger: TriggerOrderType {
                is_market: true,
                trigger_px,
                tpsl,
            },
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self, OrderTypeParams::Trigger { .. })
    }
}

/// Flat signed-order schema consumed by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOrderParams {
    /// Asset id
    pub a: u32,
    /// Is buy
    pub b: bool,
    /// Price
    pub p: String,
    /// Size
    pub s: String,
    /// Reduce-only
    pub r: bool,
    /// Order type
    pub t: OrderTypeParams,
}

/// How a batch of orders is grouped by the matching engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderGrouping {
    Na,
    NormalTpsl,
    PositionTpsl,
}

/// Cancel parameters in wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCancelParams {
    /// Asset id
    pub a: u32,
    /// Order id
    pub o: u64,
}

/// Builder-fee metadata attached to order submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderFeeInfo {
    /// Builder address, lower-cased
    pub b: String,
    /// Fee rate in tenths of a basis point
    pub f: i64,
}

/// Normalized exchange response: `{status:"ok",response:{...}}` or
/// `{status:"err",response:"<string>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "response", rename_all = "lowercase")]
pub enum ExchangeResponse {
    Ok(OkResponse),
    Err(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExchangeResponse {
    /// The plain success shape: `{status:"ok", response:{type:"default"}}`.
    pub fn is_default_ok(&self) -> bool {
        matches!(self, ExchangeResponse::Ok(ok) if ok.kind == "default")
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ExchangeResponse::Ok(_))
    }

    pub fn err_message(&self) -> Option<&str> {
        match self {
            ExchangeResponse::Err(message) => Some(message),
            ExchangeResponse::Ok(_) => None,
        }
    }
}

/// `userRole` read endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRole {
    pub role: String,
}

impl UserRole {
    /// Accounts report `"missing"` until their first deposit activates them.
    pub fn is_activated(&self) -> bool {
        self.role != "missing"
    }
}

/// One entry of the `extraAgents` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraAgent {
    pub address: String,
    /// Registered name, including any embedded `valid_until` suffix.
    pub name: String,
    pub valid_until: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_type_serializes_to_wire_shapes() {
        let limit = OrderTypeParams::limit(Tif::Ioc);
        assert_eq!(
            serde_json::to_value(&limit).unwrap(),
            json!({"limit": {"tif": "Ioc"}})
        );

        let trigger = OrderTypeParams::trigger_market("50000".to_string(), TpslKind::Tp);
        assert_eq!(
            serde_json::to_value(&trigger).unwrap(),
            json!({"trigger": {"isMarket": true, "triggerPx": "50000", "tpsl": "tp"}})
        );
    }

    #[test]
    fn grouping_wire_strings() {
        assert_eq!(
            serde_json::to_value(OrderGrouping::Na).unwrap(),
            json!("na")
        );
        assert_eq!(
            serde_json::to_value(OrderGrouping::NormalTpsl).unwrap(),
            json!("normalTpsl")
        );
        assert_eq!(
            serde_json::to_value(OrderGrouping::PositionTpsl).unwrap(),
            json!("positionTpsl")
        );
    }

    #[test]
    fn response_parses_both_statuses() {
        let ok: ExchangeResponse =
            serde_json::from_value(json!({"status": "ok", "response": {"type": "default"}}))
                .unwrap();
        assert!(ok.is_default_ok());

        let err: ExchangeResponse = serde_json::from_value(
            json!({"status": "err", "response": "User has pending agent removal"}),
        )
        .unwrap();
        assert_eq!(err.err_message(), Some("User has pending agent removal"));
    }
}
