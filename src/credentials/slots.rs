//! Agent name slots, the expiry-in-name wire codec, and deterministic
//! provisioning decisions.
//!
//! The exchange allows 3 concurrent named agents per user. Slot selection and
//! eviction are pure functions of the current registration listing so a rerun
//! after a partial failure converges instead of oscillating.

use serde::{Deserialize, Serialize};

use crate::exchange::types::ExtraAgent;

/// The agent name slots this subsystem registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentSlot {
    #[serde(rename = "PerpDeskAgent1")]
    Agent1,
    #[serde(rename = "PerpDeskAgent2")]
    Agent2,
    #[serde(rename = "PerpDeskAgent3")]
    Agent3,
    #[serde(rename = "PerpDeskOfficial")]
    Official,
}

impl AgentSlot {
    /// The rotating pool. `Official` is reserved outside it.
    pub const POOL: [AgentSlot; 3] = [AgentSlot::Agent1, AgentSlot::Agent2, AgentSlot::Agent3];

    pub fn wire_name(&self) -> &'static str {
        match self {
            AgentSlot::Agent1 => "PerpDeskAgent1",
            AgentSlot::Agent2 => "PerpDeskAgent2",
            AgentSlot::Agent3 => "PerpDeskAgent3",
            AgentSlot::Official => "PerpDeskOfficial",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<AgentSlot> {
        match name {
            "PerpDeskAgent1" => Some(AgentSlot::Agent1),
            "PerpDeskAgent2" => Some(AgentSlot::Agent2),
            "PerpDeskAgent3" => Some(AgentSlot::Agent3),
            "PerpDeskOfficial" => Some(AgentSlot::Official),
            _ => None,
        }
    }

    pub fn is_pool_slot(&self) -> bool {
        AgentSlot::POOL.contains(self)
    }
}

impl std::fmt::Display for AgentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Registration name with the expiry embedded, e.g.
/// `"PerpDeskAgent1 valid_until 1765710491688"`. The exchange parses this
/// convention; expiry is not a separate field of the approval.
pub fn encode_agent_name(slot: AgentSlot, valid_until_ms: i64) -> String {
    format!("{} valid_until {valid_until_ms}", slot.wire_name())
}

/// Split a registered name back into its base name and embedded expiry.
pub fn decode_agent_name(registered: &str) -> (&str, Option<i64>) {
    match registered.split_once(" valid_until ") {
        Some((base, ms)) => (base, ms.trim().parse().ok()),
        None => (registered, None),
    }
}

/// The pool slot a registered agent occupies, if any.
pub fn pool_slot_of(agent: &ExtraAgent) -> Option<AgentSlot> {
    let (base, _) = decode_agent_name(&agent.name);
    AgentSlot::from_wire_name(base).filter(AgentSlot::is_pool_slot)
}

/// The deterministic plan for registering one new agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    /// Registered name to revoke before approving, when the pool is full and
    /// the eviction candidate is not one of our own slots.
    pub evict_registered_name: Option<String>,
    /// Slot name the new agent registers under.
    pub target: AgentSlot,
}

/// Decide which agent (if any) to evict and which slot to register under.
///
/// Preference order for eviction: a foreign (non-pool) agent before one of
/// our own, soonest `valid_until` first, name as the final tie-break. When
/// the candidate already occupies one of our slots there is nothing to
/// revoke; the slot is simply reused.
pub fn plan_provisioning(registered: &[ExtraAgent]) -> ProvisionPlan {
    let mut evict_registered_name = None;
    let mut reuse_slot = None;

    if registered.len() >= 3 {
        let foreign: Vec<&ExtraAgent> = registered
            .iter()
            .filter(|agent| pool_slot_of(agent).is_none())
            .collect();
        let candidates: Vec<&ExtraAgent> = if foreign.is_empty() {
            registered.iter().collect()
        } else {
            foreign
        };
        let evictee = candidates.into_iter().min_by(|a, b| {
            a.valid_until
                .cmp(&b.valid_until)
                .then_with(|| a.name.cmp(&b.name))
        });

        if let Some(evictee) = evictee {
            match pool_slot_of(evictee) {
                Some(slot) => reuse_slot = Some(slot),
                None => evict_registered_name = Some(evictee.name.clone()),
            }
        }
    }

    let target = reuse_slot
        .or_else(|| {
            AgentSlot::POOL.into_iter().find(|slot| {
                !registered
                    .iter()
                    .any(|agent| decode_agent_name(&agent.name).0 == slot.wire_name())
            })
        })
        .unwrap_or(AgentSlot::Agent1);

    ProvisionPlan {
        evict_registered_name,
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str, valid_until: i64) -> ExtraAgent {
        ExtraAgent {
            address: "0x00000000000000000000000000000000000000aa".to_string(),
            name: name.to_string(),
            valid_until,
        }
    }

    #[test]
    fn name_codec_round_trips() {
        let encoded = encode_agent_name(AgentSlot::Agent2, 1_765_710_491_688);
        assert_eq!(encoded, "PerpDeskAgent2 valid_until 1765710491688");
        let (base, expiry) = decode_agent_name(&encoded);
        assert_eq!(base, "PerpDeskAgent2");
        assert_eq!(expiry, Some(1_765_710_491_688));
    }

    #[test]
    fn decode_tolerates_plain_names() {
        let (base, expiry) = decode_agent_name("SomeOtherAgent");
        assert_eq!(base, "SomeOtherAgent");
        assert_eq!(expiry, None);
    }

    #[test]
    fn empty_listing_targets_first_slot() {
        let plan = plan_provisioning(&[]);
        assert_eq!(plan.target, AgentSlot::Agent1);
        assert!(plan.evict_registered_name.is_none());
    }

    #[test]
    fn partial_listing_picks_first_free_slot() {
        let plan = plan_provisioning(&[
            agent("PerpDeskAgent1 valid_until 100", 100),
            agent("PerpDeskAgent3 valid_until 200", 200),
        ]);
        assert_eq!(plan.target, AgentSlot::Agent2);
        assert!(plan.evict_registered_name.is_none());
    }

    #[test]
    fn full_pool_prefers_evicting_foreign_agent() {
        // A foreign agent is evicted before one of our own, even when
        // ours expire sooner.
        let plan = plan_provisioning(&[
            agent("PerpDeskAgent1 valid_until 100", 100),
            agent("PerpDeskAgent2 valid_until 200", 200),
            agent("their-bot", 9_999),
        ]);
        assert_eq!(plan.evict_registered_name.as_deref(), Some("their-bot"));
        assert_eq!(plan.target, AgentSlot::Agent3);
    }

    #[test]
    fn full_pool_of_own_slots_reuses_soonest_expiry() {
        let plan = plan_provisioning(&[
            agent("PerpDeskAgent1 valid_until 300", 300),
            agent("PerpDeskAgent2 valid_until 100", 100),
            agent("PerpDeskAgent3 valid_until 200", 200),
        ]);
        assert!(plan.evict_registered_name.is_none());
        assert_eq!(plan.target, AgentSlot::Agent2);
    }

    #[test]
    fn foreign_eviction_ties_break_by_expiry_then_name() {
        let plan = plan_provisioning(&[
            agent("zzz-bot", 100),
            agent("aaa-bot", 100),
            agent("PerpDeskAgent1 valid_until 50", 50),
        ]);
        assert_eq!(plan.evict_registered_name.as_deref(), Some("aaa-bot"));
    }

    #[test]
    fn plan_is_a_pure_function_of_the_listing() {
        // Identical listings always produce the identical plan.
        let listing = vec![
            agent("PerpDeskAgent1 valid_until 100", 100),
            agent("foreign", 500),
            agent("PerpDeskAgent2 valid_until 700", 700),
        ];
        let first = plan_provisioning(&listing);
        for _ in 0..10 {
            assert_eq!(plan_provisioning(&listing), first);
        }
    }
}
