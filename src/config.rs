//! Server-delivered configuration, consumed read-only.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::consts::{
    AGENT_TTL_DEFAULT_MS, DEFAULT_REFERRAL_CODE, FALLBACK_BUILDER_ADDRESS,
    FALLBACK_MAX_BUILDER_FEE,
};
use crate::error::Result;

/// A point-in-time view of the server-side perp configuration.
///
/// Every field is optional on the wire; accessors apply the fallbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerpConfigSnapshot {
    pub builder_address: Option<String>,
    /// Tenths of a basis point (45 = 0.045%).
    pub max_builder_fee_rate: Option<i64>,
    pub agent_ttl_ms: Option<i64>,
    pub referral_code: Option<String>,
    /// Changing versions purge all cached agent credentials.
    pub config_version: Option<String>,
}

impl PerpConfigSnapshot {
    pub fn builder_fee_config(&self) -> BuilderFeeConfig {
        let builder_address = self
            .builder_address
            .clone()
            .unwrap_or_else(|| FALLBACK_BUILDER_ADDRESS.to_string())
            .to_lowercase();
        let max_fee_rate = self
            .max_builder_fee_rate
            .unwrap_or(FALLBACK_MAX_BUILDER_FEE)
            .max(0);
        BuilderFeeConfig {
            builder_address,
            max_fee_rate,
        }
    }

    pub fn agent_ttl_ms(&self) -> i64 {
        match self.agent_ttl_ms {
            Some(ttl) if ttl > 0 => ttl,
            _ => AGENT_TTL_DEFAULT_MS,
        }
    }

    pub fn referral_code(&self) -> String {
        match self.referral_code.as_deref() {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => DEFAULT_REFERRAL_CODE.to_string(),
        }
    }
}

/// The builder-fee expectation the orchestrator checks approvals against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderFeeConfig {
    /// Lower-cased; empty means no builder fee is collected.
    pub builder_address: String,
    /// Tenths of a basis point, clamped non-negative.
    pub max_fee_rate: i64,
}

impl BuilderFeeConfig {
    /// Wire form of the fee rate: `"0.045%"` for a rate of 45.
    pub fn max_fee_rate_percent(&self) -> String {
        fee_rate_percent(self.max_fee_rate)
    }
}

/// Render a fee rate (tenths of a basis point) as the percent string the
/// exchange expects, e.g. `45 -> "0.045%"`.
pub fn fee_rate_percent(max_fee_rate: i64) -> String {
    let pct = Decimal::new(max_fee_rate, 3).normalize();
    format!("{pct}%")
}

/// Read-only provider of the server configuration.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn snapshot(&self) -> Result<PerpConfigSnapshot>;
}

/// In-memory provider, used by tests and by embedders that push config
/// updates from their own transport.
pub struct StaticConfigProvider {
    snapshot: RwLock<PerpConfigSnapshot>,
}

impl StaticConfigProvider {
    pub fn new(snapshot: PerpConfigSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(snapshot),
        })
    }

    pub async fn set(&self, snapshot: PerpConfigSnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn snapshot(&self) -> Result<PerpConfigSnapshot> {
        Ok(self.snapshot.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fee_config_lowercases_and_clamps() {
        let snapshot = PerpConfigSnapshot {
            builder_address: Some("0xABCDEF0123456789abcdef0123456789ABCDEF01".to_string()),
            max_builder_fee_rate: Some(-10),
            ..Default::default()
        };
        let cfg = snapshot.builder_fee_config();
        assert_eq!(
            cfg.builder_address,
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
        assert_eq!(cfg.max_fee_rate, 0);
    }

    #[test]
    fn fee_rate_percent_format() {
        let cfg = BuilderFeeConfig {
            builder_address: String::new(),
            max_fee_rate: 45,
        };
        assert_eq!(cfg.max_fee_rate_percent(), "0.045%");

        let cfg = BuilderFeeConfig {
            builder_address: String::new(),
            max_fee_rate: 1000,
        };
        assert_eq!(cfg.max_fee_rate_percent(), "1%");
    }

    #[test]
    fn fallbacks_apply_when_fields_missing() {
        let snapshot = PerpConfigSnapshot::default();
        assert_eq!(snapshot.agent_ttl_ms(), AGENT_TTL_DEFAULT_MS);
        assert_eq!(snapshot.referral_code(), DEFAULT_REFERRAL_CODE);
        assert_eq!(
            snapshot.builder_fee_config().builder_address,
            FALLBACK_BUILDER_ADDRESS
        );
    }
}
