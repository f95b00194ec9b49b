//! Converts high-level trade intents into raw exchange order parameters.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{PerpdeskError, Result};
use crate::exchange::types::{
    OrderGrouping, OrderTypeParams, RawOrderParams, Tif, TpslKind,
};
use crate::orders::price::slippage_price;

/// Default slippage fraction applied to market-style executions.
pub const DEFAULT_SLIPPAGE: Decimal = dec!(0.08);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenOrderKind {
    Market,
    Limit,
}

/// Intent to open (or add to) a position, optionally bracketed by TP/SL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderOpenParams {
    pub asset_id: u32,
    pub is_buy: bool,
    pub kind: OpenOrderKind,
    /// Mark price for market orders, limit price for limit orders.
    pub price: String,
    pub size: String,
    pub tp_trigger_px: Option<String>,
    pub sl_trigger_px: Option<String>,
    pub slippage: Option<Decimal>,
}

/// Intent to close (part of) a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCloseParams {
    pub asset_id: u32,
    /// Side of the position being closed; the close order takes the opposite side.
    pub is_buy: bool,
    pub size: String,
    pub limit_px: Option<String>,
    pub mid_px: Option<String>,
    pub slippage: Option<Decimal>,
}

/// Intent to attach TP/SL to an existing position without changing size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTpslParams {
    pub asset_id: u32,
    pub is_buy: bool,
    pub position_size: String,
    pub tp_trigger_px: Option<String>,
    pub sl_trigger_px: Option<String>,
    pub slippage: Option<Decimal>,
}

/// A plain resting order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderParams {
    pub asset_id: u32,
    pub is_buy: bool,
    pub limit_px: String,
    pub size: String,
    pub reduce_only: bool,
    pub tif: Tif,
}

/// Builds raw order batches with deterministic slippage handling.
#[derive(Debug, Clone)]
pub struct OrderBuilder {
    default_slippage: Decimal,
}

impl Default for OrderBuilder {
    fn default() -> Self {
        Self {
            default_slippage: DEFAULT_SLIPPAGE,
        }
    }
}

impl OrderBuilder {
    pub fn new(default_slippage: Decimal) -> Self {
        Self { default_slippage }
    }

    fn slippage_or_default(&self, slippage: Option<Decimal>) -> Decimal {
        slippage.unwrap_or(self.default_slippage)
    }

    /// Reduce-only trigger order protecting the opposite side of `is_buy`.
    /// The execution price is slippage-adjusted from the trigger price so a
    /// triggered market fill has bounded slippage.
    fn trigger_order(
        &self,
        asset_id: u32,
        position_is_buy: bool,
        size: &str,
        trigger_px: &str,
        kind: TpslKind,
        slippage: Option<Decimal>,
    ) -> Result<RawOrderParams> {
        let execution_price = slippage_price(
            trigger_px,
            !position_is_buy,
            self.slippage_or_default(slippage),
        )?;
        Ok(RawOrderParams {
            a: asset_id,
            b: !position_is_buy,
            p: execution_price,
            s: size.to_string(),
            r: true,
            t: OrderTypeParams::trigger_market(trigger_px.to_string(), kind),
        })
    }

    /// Market or limit open, with optional bracket TP/SL.
    ///
    /// More than one order submits under the `normalTpsl` grouping so the
    /// exchange treats the bracket atomically.
    pub fn build_open(
        &self,
        params: &OrderOpenParams,
    ) -> Result<(Vec<RawOrderParams>, OrderGrouping)> {
        let is_market = params.kind == OpenOrderKind::Market;

        let price = if is_market {
            slippage_price(
                &params.price,
                params.is_buy,
                self.slippage_or_default(params.slippage),
            )?
        } else {
            params.price.clone()
        };

        let mut orders = vec![RawOrderParams {
            a: params.asset_id,
            b: params.is_buy,
            p: price,
            s: params.size.clone(),
            r: false,
            t: OrderTypeParams::limit(if is_market { Tif::Ioc } else { Tif::Gtc }),
        }];

        if let Some(tp) = &params.tp_trigger_px {
            orders.push(self.trigger_order(
                params.asset_id,
                params.is_buy,
                &params.size,
                tp,
                TpslKind::Tp,
                params.slippage,
            )?);
        }
        if let Some(sl) = &params.sl_trigger_px {
            orders.push(self.trigger_order(
                params.asset_id,
                params.is_buy,
                &params.size,
                sl,
                TpslKind::Sl,
                params.slippage,
            )?);
        }

        let grouping = if orders.len() > 1 {
            OrderGrouping::NormalTpsl
        } else {
            OrderGrouping::Na
        };
        Ok((orders, grouping))
    }

    /// Reduce-only close orders. Each close derives its price from the
    /// explicit limit price, or from the mid price slippage-adjusted on the
    /// closing side.
    pub fn build_close(
        &self,
        params: &[OrderCloseParams],
    ) -> Result<(Vec<RawOrderParams>, OrderGrouping)> {
        let orders = params
            .iter()
            .map(|param| {
                let price = if let Some(limit_px) = &param.limit_px {
                    limit_px.clone()
                } else if let Some(mid_px) = &param.mid_px {
                    slippage_price(
                        mid_px,
                        !param.is_buy,
                        self.slippage_or_default(param.slippage),
                    )?
                } else {
                    return Err(PerpdeskError::InvalidOrder(
                        "Either limit_px or mid_px must be provided for order close".to_string(),
                    ));
                };
                Ok(RawOrderParams {
                    a: param.asset_id,
                    b: !param.is_buy,
                    p: price,
                    s: param.size.clone(),
                    r: true,
                    t: OrderTypeParams::limit(Tif::Gtc),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((orders, OrderGrouping::Na))
    }

    /// Position-level TP/SL orders without a size change.
    pub fn build_position_tpsl(
        &self,
        params: &PositionTpslParams,
    ) -> Result<(Vec<RawOrderParams>, OrderGrouping)> {
        let mut orders = Vec::new();

        if let Some(tp) = &params.tp_trigger_px {
            orders.push(self.trigger_order(
                params.asset_id,
                params.is_buy,
                &params.position_size,
                tp,
                TpslKind::Tp,
                params.slippage,
            )?);
        }
        if let Some(sl) = &params.sl_trigger_px {
            orders.push(self.trigger_order(
                params.asset_id,
                params.is_buy,
                &params.position_size,
                sl,
                TpslKind::Sl,
                params.slippage,
            )?);
        }

        if orders.is_empty() {
            return Err(PerpdeskError::InvalidOrder(
                "At least one TP or SL price must be provided".to_string(),
            ));
        }

        Ok((orders, OrderGrouping::PositionTpsl))
    }

    /// A single resting order, no grouping.
    pub fn build_single(&self, params: &PlaceOrderParams) -> (Vec<RawOrderParams>, OrderGrouping) {
        let order = RawOrderParams {
            a: params.asset_id,
            b: params.is_buy,
            p: params.limit_px.clone(),
            s: params.size.clone(),
            r: params.reduce_only,
            t: OrderTypeParams::limit(params.tif),
        };
        (vec![order], OrderGrouping::Na)
    }
}
