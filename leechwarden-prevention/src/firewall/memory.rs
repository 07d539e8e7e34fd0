//! In-process model of the kernel's nftables objects.
//!
//! Mirrors the kernel behavior the enforcement surface depends on: batches
//! are all-or-nothing, `add` of an existing table/set/chain/element is a no-op
//! (an existing element keeps its old timeout), `delete` of a missing element
//! or table fails, and timed elements disappear once their timeout elapses.
//! Backs the `--dry-run` mode and the test suites.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use leechwarden_core::time::{Clock, SystemClock};

use crate::error::FirewallError;
use crate::firewall::backend::NftBackend;
use crate::firewall::schema::{
    Batch, Chain, ElemSpec, Element, Family, NfCommand, NfObject, Rule, Set, SetElem, SetType,
    Table,
};

#[derive(Debug, Clone)]
struct SetState {
    def: Set,
    // Canonical address -> expiry (None = permanent).
    elements: BTreeMap<String, Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone)]
struct TableState {
    handle: u64,
    sets: BTreeMap<String, SetState>,
    chains: BTreeMap<String, Chain>,
    rules: Vec<Rule>,
}

type Tables = HashMap<(Family, String), TableState>;

pub struct MemoryNft {
    tables: Tables,
    clock: Arc<dyn Clock>,
    next_handle: u64,
    commits: usize,
    fail_next: Option<String>,
}

impl MemoryNft {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: HashMap::new(),
            clock,
            next_handle: 1,
            commits: 0,
            fail_next: None,
        }
    }

    /// Number of commits attempted so far, failed ones included.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Makes the next commit fail with `reason` without applying anything.
    pub fn fail_next_commit(&mut self, reason: impl Into<String>) {
        self.fail_next = Some(reason.into());
    }

    pub fn table_exists(&self, family: Family, table: &str) -> bool {
        self.tables.contains_key(&(family, table.to_string()))
    }

    pub fn set_names(&self, family: Family, table: &str) -> Vec<String> {
        self.tables
            .get(&(family, table.to_string()))
            .map(|state| state.sets.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rules(&self, family: Family, table: &str) -> Vec<Rule> {
        self.tables
            .get(&(family, table.to_string()))
            .map(|state| state.rules.clone())
            .unwrap_or_default()
    }

    /// Time left before `value` expires from `set`; `None` when it is not live.
    /// Permanent elements report `Duration::MAX`.
    pub fn remaining(&self, family: Family, table: &str, set: &str, value: &str) -> Option<Duration> {
        let now = self.clock.now();
        let key = canonical(value).ok()?;
        let expiry = self
            .tables
            .get(&(family, table.to_string()))?
            .sets
            .get(set)?
            .elements
            .get(&key)?;
        match expiry {
            None => Some(Duration::MAX),
            Some(at) if *at > now => (*at - now).to_std().ok(),
            Some(_) => None,
        }
    }

    fn apply(&mut self, tables: &mut Tables, command: &NfCommand) -> Result<(), FirewallError> {
        let now = self.clock.now();
        match command {
            NfCommand::Add(NfObject::Table(table)) => {
                let key = (table.family, table.name.clone());
                if !tables.contains_key(&key) {
                    let handle = self.handle();
                    tables.insert(
                        key,
                        TableState {
                            handle,
                            sets: BTreeMap::new(),
                            chains: BTreeMap::new(),
                            rules: Vec::new(),
                        },
                    );
                }
                Ok(())
            }
            NfCommand::Add(NfObject::Set(set)) => {
                let handle = self.handle();
                let state = table_mut(tables, set.family, &set.table)?;
                if let Some(existing) = state.sets.get(&set.name) {
                    if existing.def.set_type != set.set_type || existing.def.flags != set.flags {
                        return Err(commit_error(format!(
                            "set {} exists with a different definition",
                            set.name
                        )));
                    }
                    return Ok(());
                }
                if set.set_type.is_none() {
                    return Err(commit_error(format!("set {} has no type", set.name)));
                }
                let mut def = set.clone();
                def.elem.clear();
                def.handle = Some(handle);
                state.sets.insert(
                    set.name.clone(),
                    SetState {
                        def,
                        elements: BTreeMap::new(),
                    },
                );
                Ok(())
            }
            NfCommand::Add(NfObject::Chain(chain)) => {
                let handle = self.handle();
                let state = table_mut(tables, chain.family, &chain.table)?;
                state.chains.entry(chain.name.clone()).or_insert_with(|| Chain {
                    handle: Some(handle),
                    ..chain.clone()
                });
                Ok(())
            }
            NfCommand::Add(NfObject::Rule(rule)) => {
                let handle = self.handle();
                let state = table_mut(tables, rule.family, &rule.table)?;
                if !state.chains.contains_key(&rule.chain) {
                    return Err(missing(format!("chain {}", rule.chain)));
                }
                if let Some(set) = rule.set_references().find(|name| !state.sets.contains_key(*name)) {
                    return Err(missing(format!("set {set}")));
                }
                state.rules.push(Rule {
                    handle: Some(handle),
                    ..rule.clone()
                });
                Ok(())
            }
            NfCommand::Add(NfObject::Element(element)) => {
                let set = set_mut(tables, element)?;
                for elem in &element.elem {
                    let key = member_key(&set.def, elem.value())?;
                    let expiry = match elem.timeout() {
                        Some(_) if !set.def.has_timeout() => {
                            return Err(commit_error(format!(
                                "set {} does not support timeouts",
                                set.def.name
                            )))
                        }
                        Some(secs) => expiry_after(now, secs),
                        None => None,
                    };
                    // An element that is already present keeps its old timeout.
                    set.elements.entry(key).or_insert(expiry);
                }
                Ok(())
            }
            NfCommand::Delete(NfObject::Element(element)) => {
                let set = set_mut(tables, element)?;
                for elem in &element.elem {
                    let key = member_key(&set.def, elem.value())?;
                    if set.elements.remove(&key).is_none() {
                        return Err(missing(format!("element {key}")));
                    }
                }
                Ok(())
            }
            NfCommand::Flush(NfObject::Set(set)) => {
                let state = table_mut(tables, set.family, &set.table)?;
                let found = state
                    .sets
                    .get_mut(&set.name)
                    .ok_or_else(|| missing(format!("set {}", set.name)))?;
                found.elements.clear();
                Ok(())
            }
            NfCommand::Delete(NfObject::Table(table)) => tables
                .remove(&(table.family, table.name.clone()))
                .map(|_| ())
                .ok_or_else(|| missing(format!("table {}", table.name))),
            other => Err(commit_error(format!("unsupported command {other:?}"))),
        }
    }

    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn purge_expired(&mut self) {
        let now = self.clock.now();
        for table in self.tables.values_mut() {
            for set in table.sets.values_mut() {
                set.elements
                    .retain(|_, expiry| expiry.map_or(true, |at| at > now));
            }
        }
    }

    fn listed_set(&self, state: &SetState) -> Set {
        let now = self.clock.now();
        let mut def = state.def.clone();
        def.elem = state
            .elements
            .iter()
            .map(|(val, expiry)| match expiry {
                None => SetElem::plain(val),
                Some(at) => SetElem::Timed {
                    elem: ElemSpec {
                        val: val.clone(),
                        timeout: None,
                        expires: Some((*at - now).num_seconds().max(0) as u64),
                    },
                },
            })
            .collect();
        def
    }
}

impl Default for MemoryNft {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl NftBackend for MemoryNft {
    fn commit(&mut self, batch: &Batch) -> Result<(), FirewallError> {
        self.commits += 1;
        if let Some(reason) = self.fail_next.take() {
            return Err(FirewallError::Commit(reason));
        }
        self.purge_expired();

        let mut staged = self.tables.clone();
        for command in batch.commands() {
            self.apply(&mut staged, command)?;
        }
        self.tables = staged;
        debug!("Applied {} commands to in-memory ruleset", batch.commands().len());
        Ok(())
    }

    fn list_table(
        &mut self,
        family: Family,
        table: &str,
    ) -> Result<Option<Vec<NfObject>>, FirewallError> {
        self.purge_expired();
        let Some(state) = self.tables.get(&(family, table.to_string())) else {
            return Ok(None);
        };

        let mut objects = vec![NfObject::Table(Table {
            handle: Some(state.handle),
            ..Table::new(family, table)
        })];
        objects.extend(state.sets.values().map(|set| NfObject::Set(self.listed_set(set))));
        objects.extend(state.chains.values().cloned().map(NfObject::Chain));
        objects.extend(state.rules.iter().cloned().map(NfObject::Rule));
        Ok(Some(objects))
    }

    fn list_set(
        &mut self,
        family: Family,
        table: &str,
        set: &str,
    ) -> Result<Vec<SetElem>, FirewallError> {
        self.purge_expired();
        let state = self
            .tables
            .get(&(family, table.to_string()))
            .ok_or_else(|| query_missing(format!("table {table}")))?;
        let found = state
            .sets
            .get(set)
            .ok_or_else(|| query_missing(format!("set {set}")))?;
        Ok(self.listed_set(found).elem)
    }
}

fn table_mut<'a>(
    tables: &'a mut Tables,
    family: Family,
    name: &str,
) -> Result<&'a mut TableState, FirewallError> {
    tables
        .get_mut(&(family, name.to_string()))
        .ok_or_else(|| missing(format!("table {name}")))
}

fn set_mut<'a>(tables: &'a mut Tables, element: &Element) -> Result<&'a mut SetState, FirewallError> {
    table_mut(tables, element.family, &element.table)?
        .sets
        .get_mut(&element.name)
        .ok_or_else(|| missing(format!("set {}", element.name)))
}

fn canonical(value: &str) -> Result<String, FirewallError> {
    value
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| commit_error(format!("invalid element value {value}")))
}

fn member_key(def: &Set, value: &str) -> Result<String, FirewallError> {
    let ip: IpAddr = value
        .parse()
        .map_err(|_| commit_error(format!("invalid element value {value}")))?;
    match (def.set_type, ip) {
        (Some(SetType::Ipv4Addr), IpAddr::V4(_)) | (Some(SetType::Ipv6Addr), IpAddr::V6(_)) => {
            Ok(ip.to_string())
        }
        _ => Err(commit_error(format!(
            "{value} does not match the type of set {}",
            def.name
        ))),
    }
}

/// `None` (never expires) when `now + secs` falls outside the calendar.
fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
}

fn commit_error(reason: String) -> FirewallError {
    FirewallError::Commit(reason)
}

fn missing(what: String) -> FirewallError {
    FirewallError::Commit(format!("Could not process rule: No such file or directory ({what})"))
}

fn query_missing(what: String) -> FirewallError {
    FirewallError::Query(format!("No such file or directory ({what})"))
}
