use thiserror::Error;

/// Main error type for the delegated-trading subsystem
#[derive(Error, Debug)]
pub enum PerpdeskError {
    // Guard errors (raised before any network I/O)
    #[error("Exchange client not set up. Call setup() first")]
    NotConfigured,

    #[error("Trading is not available for watch-only accounts")]
    WatchedAccountTrade,

    // Signing errors
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    // Agent lifecycle errors
    #[error("Agent provisioning failed: {0}")]
    AgentProvisioning(String),

    #[error("User has pending agent removal")]
    TransientAgentRemovalPending,

    #[error("Builder fee approval failed: {0}")]
    BuilderFeeApproval(String),

    // Exchange errors
    #[error("Exchange request failed: {0}")]
    ExchangeRequest(String),

    // Storage / authorization errors
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error("Authorization unavailable: {0}")]
    Authorization(String),

    // Order construction errors
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Address parsing error: {0}")]
    AddressParsing(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PerpdeskError {
    /// Whether this error is the exchange's recognized transient
    /// agent-removal signal (retried by the credential manager).
    pub fn is_pending_agent_removal(&self) -> bool {
        matches!(self, PerpdeskError::TransientAgentRemovalPending)
    }
}

/// Result type alias for PerpdeskError
pub type Result<T> = std::result::Result<T, PerpdeskError>;
