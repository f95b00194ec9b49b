//! Delegated-agent authorization and order execution for perpetual futures.
//!
//! A trade action first asks the [`account::AccountStatusOrchestrator`] to
//! ensure trading is enabled (activation, builder fee, agent authorization,
//! referral, rebate binding), which drives the
//! [`credentials::AgentCredentialManager`] and [`exchange::ExchangeClient`].
//! Once an agent is authorized, the [`orders::OrderBuilder`] derives raw
//! order parameters and submits them through the client with whichever
//! signing adapter is bound: the ephemeral agent key or the primary wallet.

pub mod account;
pub mod cache;
pub mod config;
pub mod consts;
pub mod credentials;
mod desk;
pub mod error;
pub mod exchange;
pub mod orders;
pub mod signing;

pub use account::{
    AccountStatusDetails, AccountStatusInfo, AccountStatusOrchestrator, ActiveAccount,
    AuthorizationProvider, CheckStatusParams, RebateApi, RebateBindingReference, StatusHandle,
};
pub use cache::{ExchangeCaches, TtlCache};
pub use config::{BuilderFeeConfig, ConfigProvider, PerpConfigSnapshot, StaticConfigProvider};
pub use credentials::{
    AgentCredential, AgentCredentialManager, AgentSlot, CredentialStore, InMemoryCredentialStore,
    SecretCipher,
};
pub use desk::{PerpDesk, PerpDeskDeps};
pub use error::{PerpdeskError, Result};
pub use exchange::{
    ExchangeClient, ExchangeResponse, ExchangeTransport, HttpTransport, InfoClient, OrderGrouping,
    RawOrderParams, SetupParams,
};
pub use orders::{OrderBuilder, OrderCloseParams, OrderOpenParams, PositionTpslParams};
pub use signing::{PrimarySigner, PrimarySignerProvider, TypedDataSigner};
