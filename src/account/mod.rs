pub mod orchestrator;
pub mod rebate;
pub mod status;

pub use orchestrator::{
    AccountStatusOrchestrator, ActiveAccount, AuthorizationProvider, CheckStatusParams,
};
pub use rebate::{BindPerpsWalletRequest, RebateApi, RebateBindingReference};
pub use status::{AccountStatusDetails, AccountStatusInfo, StatusHandle};
