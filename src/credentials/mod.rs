pub mod manager;
pub mod slots;
pub mod store;

pub use manager::AgentCredentialManager;
pub use slots::{
    decode_agent_name, encode_agent_name, plan_provisioning, AgentSlot, ProvisionPlan,
};
pub use store::{
    AgentCredential, CredentialStore, InMemoryCredentialStore, PlainTextCipher, SecretCipher,
};
