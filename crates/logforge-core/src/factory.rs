//! Factory discovery — registering dynamically-deployed child contracts the
//! moment their creation event is observed.
//!
//! A child is indexed from its creation *block*, not creation block + 1:
//! a child that emits in the same block it was deployed in (a Buy in the
//! deployment block, say) must still be captured.

use serde::{Deserialize, Serialize};

use crate::handler::Event;

/// The EVM zero address; factories emitting it announce nothing.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// A static factory relationship: which event on which parent contract
/// announces a new child instance, and which argument carries its address.
/// Read-only at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryRule {
    pub chain_id: u64,
    /// Label of the contract emitting the creation event (e.g. `"PollFactory"`).
    pub parent_contract: String,
    /// Name of the creation event (e.g. `"MarketCreated"`).
    pub event_name: String,
    /// Decoded argument holding the child address (e.g. `"market"`).
    pub address_arg: String,
    /// Label of the child contract, resolving its ABI.
    pub child_contract: String,
}

/// A child contract discovered from a creation event, ready to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub chain_id: u64,
    /// Child contract label.
    pub contract: String,
    /// Child address, lowercase `0x…`.
    pub address: String,
    /// First block to index the child from — the creation event's own block.
    pub start_block: u64,
}

/// Matches decoded events against factory rules and reports discoveries.
pub struct FactoryResolver {
    rules: Vec<FactoryRule>,
}

impl FactoryResolver {
    pub fn new(rules: Vec<FactoryRule>) -> Self {
        Self { rules }
    }

    /// Returns `true` if the (contract, event) pair is a creation event of
    /// some rule — the dispatch path uses this to order registration before
    /// handler invocation.
    pub fn is_creation_event(&self, chain_id: u64, contract: &str, event: &str) -> bool {
        self.rules.iter().any(|r| {
            r.chain_id == chain_id && r.parent_contract == contract && r.event_name == event
        })
    }

    /// Inspect a decoded event. If it is a creation event of a known rule,
    /// extract the child address and report a [`Discovery`].
    ///
    /// Skips silently (returns `None`) when the address is the zero
    /// address. Re-resolving an already-known child is fine: filter
    /// registration dedupes, so applying a discovery twice is a no-op.
    pub fn resolve(&self, event: &Event) -> Option<Discovery> {
        let rule = self.rules.iter().find(|r| {
            r.chain_id == event.chain_id
                && r.parent_contract == event.contract
                && r.event_name == event.name
        })?;

        let address = match event.fields.get(&rule.address_arg) {
            Some(serde_json::Value::String(s)) => s.to_ascii_lowercase(),
            _ => {
                tracing::warn!(
                    rule = %rule.parent_contract,
                    event = %event.name,
                    arg = %rule.address_arg,
                    "creation event missing address argument"
                );
                return None;
            }
        };

        if address == ZERO_ADDRESS {
            return None;
        }

        tracing::info!(
            chain_id = event.chain_id,
            parent = %event.contract,
            child = %rule.child_contract,
            address = %address,
            block = event.block_number,
            "factory child discovered"
        );

        Some(Discovery {
            chain_id: event.chain_id,
            contract: rule.child_contract.clone(),
            address,
            start_block: event.block_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creation_event(addr_field: &str, addr: &str) -> Event {
        let mut fields = serde_json::Map::new();
        fields.insert(addr_field.into(), serde_json::Value::String(addr.into()));
        Event {
            chain_id: 1,
            contract: "PollFactory".into(),
            name: "MarketCreated".into(),
            address: "0xfac".into(),
            block_number: 50,
            block_hash: "0xb50".into(),
            tx_hash: "0xt2".into(),
            tx_index: 2,
            log_index: 7,
            fields,
        }
    }

    fn resolver() -> FactoryResolver {
        FactoryResolver::new(vec![FactoryRule {
            chain_id: 1,
            parent_contract: "PollFactory".into(),
            event_name: "MarketCreated".into(),
            address_arg: "market".into(),
            child_contract: "Market".into(),
        }])
    }

    #[test]
    fn resolves_child_at_creation_block() {
        let r = resolver();

        let d = r.resolve(&creation_event("market", "0xABC0000000000000000000000000000000000001"));
        let d = d.expect("should discover child");
        assert_eq!(d.contract, "Market");
        assert_eq!(d.address, "0xabc0000000000000000000000000000000000001");
        // Start at the creation block itself, NOT +1.
        assert_eq!(d.start_block, 50);
    }

    #[test]
    fn zero_address_skipped() {
        let r = resolver();
        assert!(r.resolve(&creation_event("market", ZERO_ADDRESS)).is_none());
    }

    #[test]
    fn non_creation_event_ignored() {
        let r = resolver();
        let mut ev = creation_event("market", "0xabc0000000000000000000000000000000000001");
        ev.name = "SomethingElse".into();
        assert!(r.resolve(&ev).is_none());
        assert!(r.is_creation_event(1, "PollFactory", "MarketCreated"));
        assert!(!r.is_creation_event(1, "PollFactory", "SomethingElse"));
    }

    #[test]
    fn missing_address_argument_ignored() {
        let r = resolver();
        let ev = creation_event("wrong_field", "0xabc0000000000000000000000000000000000001");
        assert!(r.resolve(&ev).is_none());
    }
}
