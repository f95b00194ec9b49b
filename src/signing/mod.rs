pub mod signer;
pub mod typed_data;

pub use signer::{
    AgentSigner, CapturedSignature, PrimarySigner, PrimarySignerProvider, TypedDataSigner,
    WalletSigner,
};
pub use typed_data::{parse_signature_rsv, Eip712Domain, SignatureRsv, TypedData, TypedValue};
