//! ## leechwarden-prevention::firewall
//! **Time-bounded address blocking through nftables sets**
//!
//! The enforcement surface is one `inet` table holding two timeout sets
//! (`blocked_v4`, `blocked_v6`), an `output` filter chain and one drop rule per
//! set. Blocking an address inserts it into the set of its family with a
//! relative timeout; the kernel removes it when the timeout elapses.
//!
//! Every mutating operation is exactly one kernel transaction.

pub mod backend;
pub mod memory;
pub mod schema;

use std::net::IpAddr;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::error::FirewallError;
pub use backend::{NftBackend, NftCommand};
pub use memory::MemoryNft;
use schema::{Batch, Chain, Element, Family, Hook, NfObject, Rule, Set, SetElem, SetType, Table};

pub const FAMILY: Family = Family::Inet;
pub const SET_V4: &str = "blocked_v4";
pub const SET_V6: &str = "blocked_v6";
pub const CHAIN: &str = "output";
/// Longest timeout handed to the kernel; longer blocks are clamped to it.
pub const MAX_TIMEOUT_SECS: u64 = u32::MAX as u64;

pub struct FirewallManager<B: NftBackend> {
    backend: B,
    table: String,
}

impl<B: NftBackend> FirewallManager<B> {
    /// Creates the enforcement surface, or completes an existing one.
    ///
    /// Existing set elements survive; a drop rule is only added for a set no
    /// rule references yet.
    #[instrument(skip(backend))]
    pub fn initialize(mut backend: B, table: &str) -> Result<Self, FirewallError> {
        let existing = backend.list_table(FAMILY, table)?.unwrap_or_default();
        let has_rule_for = |set: &str| {
            existing
                .iter()
                .any(|object| matches!(object, NfObject::Rule(rule) if rule.chain == CHAIN && rule.references_set(set)))
        };

        let mut batch = Batch::new();
        batch
            .add(NfObject::Table(Table::new(FAMILY, table)))
            .add(NfObject::Set(Set::timed(FAMILY, table, SET_V4, SetType::Ipv4Addr)))
            .add(NfObject::Set(Set::timed(FAMILY, table, SET_V6, SetType::Ipv6Addr)))
            .add(NfObject::Chain(Chain::base_filter(FAMILY, table, CHAIN, Hook::Output)));
        for (protocol, set) in [("ip", SET_V4), ("ip6", SET_V6)] {
            if has_rule_for(set) {
                debug!("Drop rule for {} already present", set);
                continue;
            }
            batch.add(NfObject::Rule(Rule::drop_daddr_in(FAMILY, table, CHAIN, protocol, set)));
        }

        backend.commit(&batch)?;
        info!("Enforcement surface ready in table {} {}", FAMILY.as_str(), table);
        Ok(Self {
            backend,
            table: table.to_string(),
        })
    }

    /// Attaches to a surface created by a running instance. Creates nothing.
    pub fn open(mut backend: B, table: &str) -> Result<Self, FirewallError> {
        if backend.list_table(FAMILY, table)?.is_none() {
            return Err(FirewallError::TableMissing(table.to_string()));
        }
        Ok(Self {
            backend,
            table: table.to_string(),
        })
    }

    /// Blocks `address` for `duration`, refreshing the timeout when it is
    /// already blocked.
    #[instrument(skip(self), fields(table = %self.table))]
    pub fn block(&mut self, address: &str, duration: Duration) -> Result<(), FirewallError> {
        let ip = parse_address(address)?;
        let value = ip.to_string();
        let timeout = timeout_secs(duration);
        let set = set_for(&ip);

        let mut batch = Batch::new();
        batch
            .add(self.element(set, SetElem::with_timeout(&value, timeout)))
            .delete(self.element(set, SetElem::plain(&value)))
            .add(self.element(set, SetElem::with_timeout(&value, timeout)));
        self.backend.commit(&batch)?;

        debug!("Blocked {} in {} for {}s", value, set, timeout);
        Ok(())
    }

    /// Removes `address` from its set. Not blocked is not an error.
    #[instrument(skip(self), fields(table = %self.table))]
    pub fn unblock(&mut self, address: &str) -> Result<(), FirewallError> {
        let ip = parse_address(address)?;
        let value = ip.to_string();
        let set = set_for(&ip);

        let mut batch = Batch::new();
        batch
            .add(self.element(set, SetElem::plain(&value)))
            .delete(self.element(set, SetElem::plain(&value)));
        self.backend.commit(&batch)?;

        debug!("Unblocked {}", value);
        Ok(())
    }

    /// Live elements of both sets, read from the kernel.
    pub fn list(&mut self) -> Result<Vec<IpAddr>, FirewallError> {
        let mut addresses = Vec::new();
        for set in [SET_V4, SET_V6] {
            for elem in self.backend.list_set(FAMILY, &self.table, set)? {
                match elem.value().parse::<IpAddr>() {
                    Ok(ip) => addresses.push(ip),
                    Err(_) => warn!("Ignoring non-address element {:?} in {}", elem.value(), set),
                }
            }
        }
        Ok(addresses)
    }

    /// Empties both sets. Table, chain and rules stay.
    pub fn clear(&mut self) -> Result<(), FirewallError> {
        let mut batch = Batch::new();
        batch
            .flush(NfObject::Set(Set::reference(FAMILY, &self.table, SET_V4)))
            .flush(NfObject::Set(Set::reference(FAMILY, &self.table, SET_V6)));
        self.backend.commit(&batch)?;
        info!("Cleared all blocks in table {}", self.table);
        Ok(())
    }

    /// Deletes the whole table, rules and blocks included.
    pub fn destroy(&mut self) -> Result<(), FirewallError> {
        let mut batch = Batch::new();
        batch.delete(NfObject::Table(Table::new(FAMILY, &self.table)));
        self.backend.commit(&batch)?;
        info!("Removed table {} {}", FAMILY.as_str(), self.table);
        Ok(())
    }

    /// Releases the manager without touching kernel state.
    pub fn close(self) -> B {
        self.backend
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn element(&self, set: &str, elem: SetElem) -> NfObject {
        NfObject::Element(Element::new(FAMILY, &self.table, set, vec![elem]))
    }
}

/// Removes the enforcement table whether or not it exists.
pub fn cleanup<B: NftBackend>(backend: &mut B, table: &str) -> Result<(), FirewallError> {
    let mut batch = Batch::new();
    batch
        .add(NfObject::Table(Table::new(FAMILY, table)))
        .delete(NfObject::Table(Table::new(FAMILY, table)));
    backend.commit(&batch)?;
    info!("Cleaned up table {} {}", FAMILY.as_str(), table);
    Ok(())
}

/// IPv4-mapped IPv6 literals come back as IPv4.
fn parse_address(address: &str) -> Result<IpAddr, FirewallError> {
    address
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_canonical())
        .map_err(|_| FirewallError::InvalidAddress(address.to_string()))
}

fn set_for(ip: &IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => SET_V4,
        IpAddr::V6(_) => SET_V6,
    }
}

/// Whole seconds, rounded up, between one and `MAX_TIMEOUT_SECS`.
fn timeout_secs(duration: Duration) -> u64 {
    let secs = duration
        .as_secs()
        .saturating_add(u64::from(duration.subsec_nanos() > 0));
    secs.clamp(1, MAX_TIMEOUT_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use leechwarden_core::time::ManualClock;

    const TABLE: &str = "lw_test";

    fn manager() -> (FirewallManager<MemoryNft>, ManualClock) {
        let clock = ManualClock::fixed();
        let backend = MemoryNft::new(Arc::new(clock.clone()));
        (FirewallManager::initialize(backend, TABLE).unwrap(), clock)
    }

    fn remaining(fw: &FirewallManager<MemoryNft>, set: &str, addr: &str) -> Option<Duration> {
        fw.backend().remaining(FAMILY, TABLE, set, addr)
    }

    #[test]
    fn initialize_builds_surface() {
        let (fw, _) = manager();
        let backend = fw.backend();
        assert!(backend.table_exists(FAMILY, TABLE));
        assert_eq!(backend.set_names(FAMILY, TABLE), vec![SET_V4, SET_V6]);

        let rules = backend.rules(FAMILY, TABLE);
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().any(|r| r.references_set(SET_V4)));
        assert!(rules.iter().any(|r| r.references_set(SET_V6)));
        assert_eq!(backend.commits(), 1);
    }

    #[test]
    fn initialize_twice_preserves_blocks_without_duplicates() {
        let (mut fw, _) = manager();
        fw.block("192.0.2.10", Duration::from_secs(300)).unwrap();

        let backend = fw.close();
        let fw = FirewallManager::initialize(backend, TABLE).unwrap();
        assert_eq!(fw.backend().rules(FAMILY, TABLE).len(), 2);
        assert_eq!(
            remaining(&fw, SET_V4, "192.0.2.10"),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn blocking_twice_keeps_one_element_with_latest_timeout() {
        let (mut fw, clock) = manager();
        fw.block("192.0.2.10", Duration::from_secs(300)).unwrap();
        clock.advance(Duration::from_secs(100));
        fw.block("192.0.2.10", Duration::from_secs(600)).unwrap();

        assert_eq!(fw.list().unwrap(), vec!["192.0.2.10".parse::<IpAddr>().unwrap()]);
        assert_eq!(
            remaining(&fw, SET_V4, "192.0.2.10"),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn reblocking_with_shorter_duration_shortens_the_timeout() {
        let (mut fw, _) = manager();
        fw.block("2001:db8::7", Duration::from_secs(900)).unwrap();
        fw.block("2001:db8::7", Duration::from_secs(300)).unwrap();
        assert_eq!(
            remaining(&fw, SET_V6, "2001:db8::7"),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn blocks_expire_in_the_kernel() {
        let (mut fw, clock) = manager();
        fw.block("192.0.2.10", Duration::from_secs(300)).unwrap();
        clock.advance(Duration::from_secs(301));
        assert!(fw.list().unwrap().is_empty());
    }

    #[test]
    fn unblocking_a_never_blocked_address_succeeds() {
        let (mut fw, _) = manager();
        fw.unblock("198.51.100.1").unwrap();
        fw.unblock("2001:db8::1").unwrap();
        assert!(fw.list().unwrap().is_empty());
    }

    #[test]
    fn unblock_removes_the_element() {
        let (mut fw, _) = manager();
        fw.block("198.51.100.1", Duration::from_secs(60)).unwrap();
        fw.unblock("198.51.100.1").unwrap();
        assert!(fw.list().unwrap().is_empty());
    }

    #[test]
    fn invalid_address_never_reaches_the_kernel() {
        let (mut fw, _) = manager();
        let before = fw.backend().commits();
        let err = fw.block("not-an-ip", Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, FirewallError::InvalidAddress(_)));
        assert!(fw.unblock("300.1.1.1").is_err());
        assert_eq!(fw.backend().commits(), before);
    }

    #[test]
    fn failed_commit_is_reported_and_not_applied() {
        let (mut fw, _) = manager();
        fw.backend_mut().fail_next_commit("netlink: Operation not permitted");
        let err = fw.block("192.0.2.10", Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, FirewallError::Commit(_)));
        assert!(fw.list().unwrap().is_empty());
    }

    #[test]
    fn ipv4_mapped_addresses_go_to_the_v4_set() {
        let (mut fw, _) = manager();
        fw.block("::ffff:192.0.2.44", Duration::from_secs(60)).unwrap();
        assert!(remaining(&fw, SET_V4, "192.0.2.44").is_some());
        assert!(remaining(&fw, SET_V6, "::ffff:192.0.2.44").is_none());
    }

    #[test]
    fn timeouts_round_up_to_whole_seconds() {
        assert_eq!(timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(timeout_secs(Duration::ZERO), 1);
        assert_eq!(timeout_secs(Duration::from_secs(300)), 300);
        assert_eq!(timeout_secs(Duration::MAX), MAX_TIMEOUT_SECS);
    }

    #[test]
    fn unbounded_duration_is_clamped_not_wrapped() {
        let (mut fw, _) = manager();
        fw.block("192.0.2.1", Duration::MAX).unwrap();
        assert_eq!(
            remaining(&fw, SET_V4, "192.0.2.1"),
            Some(Duration::from_secs(MAX_TIMEOUT_SECS))
        );
    }

    #[test]
    fn clear_empties_sets_and_keeps_rules() {
        let (mut fw, _) = manager();
        fw.block("192.0.2.1", Duration::from_secs(60)).unwrap();
        fw.block("2001:db8::1", Duration::from_secs(60)).unwrap();
        fw.clear().unwrap();
        assert!(fw.list().unwrap().is_empty());
        assert_eq!(fw.backend().rules(FAMILY, TABLE).len(), 2);
    }

    #[test]
    fn destroy_then_cleanup_is_tolerated() {
        let (mut fw, _) = manager();
        fw.destroy().unwrap();
        let mut backend = fw.close();
        assert!(!backend.table_exists(FAMILY, TABLE));
        cleanup(&mut backend, TABLE).unwrap();
        assert!(!backend.table_exists(FAMILY, TABLE));
    }

    #[test]
    fn open_requires_an_existing_table() {
        let err = FirewallManager::open(MemoryNft::default(), TABLE).err().unwrap();
        assert!(matches!(err, FirewallError::TableMissing(_)));

        let (fw, _) = manager();
        let fw = FirewallManager::open(fw.close(), TABLE).unwrap();
        assert_eq!(fw.table(), TABLE);
    }
}
