pub mod actions;
pub mod client;
pub mod info;
pub mod transport;
pub mod types;

pub use client::{
    CancelOrderRequest, ExchangeClient, SetupParams, UpdateIsolatedMarginRequest,
    UpdateLeverageRequest, WithdrawRequest,
};
pub use info::InfoClient;
pub use transport::{ExchangeTransport, HttpTransport, MAINNET_API_URL};
pub use types::{
    BuilderFeeInfo, ExchangeResponse, ExtraAgent, OkResponse, OrderGrouping, OrderTypeParams,
    RawCancelParams, RawOrderParams, Tif, TpslKind, UserRole,
};
