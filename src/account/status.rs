//! Published account status and the loading flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::consts::LOADING_DEBOUNCE;

/// Flags accumulated by one orchestrator run. Produced fresh each run and
/// never merged with a previous run's values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatusDetails {
    pub activated_ok: bool,
    pub agent_ok: bool,
    pub referral_code_ok: bool,
    pub builder_fee_ok: bool,
    pub internal_rebate_bound_ok: bool,
}

impl AccountStatusDetails {
    /// Trading requires an activated account with an authorized agent.
    pub fn can_trade(&self) -> bool {
        self.activated_ok && self.agent_ok
    }
}

/// The status object published after every orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatusInfo {
    pub account_address: Option<String>,
    pub details: AccountStatusDetails,
}

/// Published status plus the debounced loading flag.
///
/// Each run bumps the epoch before starting, which cancels any pending
/// clear; the clear re-arms after the run so overlapping invocations don't
/// flicker the flag.
pub struct StatusHandle {
    info: RwLock<AccountStatusInfo>,
    loading: AtomicBool,
    loading_epoch: AtomicU64,
}

impl StatusHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            info: RwLock::new(AccountStatusInfo::default()),
            loading: AtomicBool::new(false),
            loading_epoch: AtomicU64::new(0),
        })
    }

    pub async fn current(&self) -> AccountStatusInfo {
        self.info.read().await.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub(crate) async fn publish(&self, info: AccountStatusInfo) {
        *self.info.write().await = info;
    }

    pub(crate) fn begin_loading(&self) {
        self.loading_epoch.fetch_add(1, Ordering::SeqCst);
        self.loading.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_loading_debounced(self: &Arc<Self>) {
        let epoch = self.loading_epoch.load(Ordering::SeqCst);
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(LOADING_DEBOUNCE).await;
            if handle.loading_epoch.load(Ordering::SeqCst) == epoch {
                handle.loading.store(false, Ordering::SeqCst);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn loading_clears_after_debounce() {
        let handle = StatusHandle::new();
        handle.begin_loading();
        assert!(handle.is_loading());

        handle.end_loading_debounced();
        tokio::time::sleep(LOADING_DEBOUNCE * 2).await;
        assert!(!handle.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn reentry_cancels_pending_clear() {
        let handle = StatusHandle::new();
        handle.begin_loading();
        handle.end_loading_debounced();

        // A new run starts before the debounce fires.
        handle.begin_loading();
        tokio::time::sleep(LOADING_DEBOUNCE * 2).await;
        assert!(handle.is_loading(), "stale timer must not clear the new run");

        handle.end_loading_debounced();
        tokio::time::sleep(LOADING_DEBOUNCE * 2).await;
        assert!(!handle.is_loading());
    }

    #[tokio::test]
    async fn publish_replaces_status() {
        let handle = StatusHandle::new();
        let info = AccountStatusInfo {
            account_address: Some("0xabc".to_string()),
            details: AccountStatusDetails {
                activated_ok: true,
                agent_ok: true,
                ..Default::default()
            },
        };
        handle.publish(info.clone()).await;
        assert_eq!(handle.current().await, info);
        assert!(handle.current().await.details.can_trade());
    }
}
