pub mod builder;
pub mod price;

pub use builder::{
    OpenOrderKind, OrderBuilder, OrderCloseParams, OrderOpenParams, PlaceOrderParams,
    PositionTpslParams, DEFAULT_SLIPPAGE,
};
pub use price::{
    format_price_to_significant_digits, slippage_price, valid_price_decimals, MAX_DECIMALS_PERP,
    MAX_SIGNIFICANT_FIGURES,
};
