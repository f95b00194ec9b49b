//! Read endpoints used by the authorization flow.

use std::sync::Arc;

use serde_json::json;

use crate::error::Result;
use crate::exchange::transport::ExchangeTransport;
use crate::exchange::types::{ExtraAgent, UserRole};

/// Thin typed wrapper over the info endpoint.
pub struct InfoClient {
    transport: Arc<dyn ExchangeTransport>,
}

impl InfoClient {
    pub fn new(transport: Arc<dyn ExchangeTransport>) -> Self {
        Self { transport }
    }

    /// Whether and how the account exists on the exchange.
    pub async fn user_role(&self, user: &str) -> Result<UserRole> {
        let value = self
            .transport
            .info(json!({"type": "userRole", "user": user}))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Agents currently registered for the user (at most 3 non-reserved).
    pub async fn extra_agents(&self, user: &str) -> Result<Vec<ExtraAgent>> {
        let value = self
            .transport
            .info(json!({"type": "extraAgents", "user": user}))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The max builder fee the user has approved for this builder, in tenths
    /// of a basis point.
    pub async fn max_builder_fee(&self, user: &str, builder: &str) -> Result<i64> {
        let value = self
            .transport
            .info(json!({
                "type": "maxBuilderFee",
                "user": user.to_lowercase(),
                "builder": builder.to_lowercase(),
            }))
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}
