//! Subset of the nftables JSON schema (`libnftables-json(5)`) used by the
//! enforcement surface.
//!
//! A [`Batch`] serializes to the document accepted by `nft -j -f -`, which the
//! kernel applies as one transaction. Listings (`nft -j list ...`) come back as
//! the same object shapes and are read with [`parse_listing`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Ip,
    Ip6,
    Inet,
    Arp,
    Bridge,
    Netdev,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Ip => "ip",
            Family::Ip6 => "ip6",
            Family::Inet => "inet",
            Family::Arp => "arp",
            Family::Bridge => "bridge",
            Family::Netdev => "netdev",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub family: Family,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
}

impl Table {
    pub fn new(family: Family, name: &str) -> Self {
        Self {
            family,
            name: name.to_string(),
            handle: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetType {
    #[serde(rename = "ipv4_addr")]
    Ipv4Addr,
    #[serde(rename = "ipv6_addr")]
    Ipv6Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetFlag {
    Constant,
    Interval,
    Timeout,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Set {
    pub family: Family,
    pub table: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub set_type: Option<SetType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<SetFlag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elem: Vec<SetElem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
}

impl Set {
    /// Address set whose elements carry their own timeout.
    pub fn timed(family: Family, table: &str, name: &str, set_type: SetType) -> Self {
        Self {
            set_type: Some(set_type),
            flags: vec![SetFlag::Timeout],
            ..Self::reference(family, table, name)
        }
    }

    /// Names an existing set, as needed by `flush` and `delete`.
    pub fn reference(family: Family, table: &str, name: &str) -> Self {
        Self {
            family,
            table: table.to_string(),
            name: name.to_string(),
            set_type: None,
            flags: Vec::new(),
            elem: Vec::new(),
            handle: None,
        }
    }

    pub fn has_timeout(&self) -> bool {
        self.flags.contains(&SetFlag::Timeout)
    }
}

/// A set element: a bare value, or a value with timeout metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SetElem {
    Timed { elem: ElemSpec },
    Plain(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElemSpec {
    pub val: String,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Seconds left before the kernel drops the element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
}

impl SetElem {
    pub fn with_timeout(val: &str, timeout_secs: u64) -> Self {
        SetElem::Timed {
            elem: ElemSpec {
                val: val.to_string(),
                timeout: Some(timeout_secs),
                expires: None,
            },
        }
    }

    pub fn plain(val: &str) -> Self {
        SetElem::Plain(val.to_string())
    }

    pub fn value(&self) -> &str {
        match self {
            SetElem::Timed { elem } => &elem.val,
            SetElem::Plain(val) => val,
        }
    }

    pub fn timeout(&self) -> Option<u64> {
        match self {
            SetElem::Timed { elem } => elem.timeout,
            SetElem::Plain(_) => None,
        }
    }
}

/// Elements to add to or delete from a named set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub family: Family,
    pub table: String,
    pub name: String,
    pub elem: Vec<SetElem>,
}

impl Element {
    pub fn new(family: Family, table: &str, set: &str, elem: Vec<SetElem>) -> Self {
        Self {
            family,
            table: table.to_string(),
            name: set.to_string(),
            elem,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Filter,
    Nat,
    Route,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    Prerouting,
    Input,
    Forward,
    Output,
    Postrouting,
    Ingress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainPolicy {
    Accept,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub family: Family,
    pub table: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub chain_type: Option<ChainType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<Hook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prio: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ChainPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
}

impl Chain {
    /// Filter chain attached to `hook` at the standard filter priority, accepting by default.
    pub fn base_filter(family: Family, table: &str, name: &str, hook: Hook) -> Self {
        Self {
            family,
            table: table.to_string(),
            name: name.to_string(),
            chain_type: Some(ChainType::Filter),
            hook: Some(hook),
            prio: Some(0),
            policy: Some(ChainPolicy::Accept),
            handle: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub family: Family,
    pub table: String,
    pub chain: String,
    /// Statements, kept as raw JSON so rules we did not write still parse.
    pub expr: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Rule {
    /// `<protocol> daddr @<set> drop`
    pub fn drop_daddr_in(family: Family, table: &str, chain: &str, protocol: &str, set: &str) -> Self {
        Self {
            family,
            table: table.to_string(),
            chain: chain.to_string(),
            expr: vec![
                json!({
                    "match": {
                        "op": "==",
                        "left": { "payload": { "protocol": protocol, "field": "daddr" } },
                        "right": format!("@{set}"),
                    }
                }),
                json!({ "drop": null }),
            ],
            handle: None,
            comment: None,
        }
    }

    /// Names of the sets this rule looks addresses up in.
    pub fn set_references(&self) -> impl Iterator<Item = &str> {
        self.expr.iter().filter_map(|statement| {
            statement
                .get("match")
                .and_then(|m| m.get("right"))
                .and_then(Value::as_str)
                .and_then(|right| right.strip_prefix('@'))
        })
    }

    pub fn references_set(&self, set: &str) -> bool {
        self.set_references().any(|name| name == set)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NfObject {
    Table(Table),
    Set(Set),
    Chain(Chain),
    Rule(Rule),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NfCommand {
    Add(NfObject),
    Delete(NfObject),
    Flush(NfObject),
}

/// Commands applied together as one kernel transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(rename = "nftables")]
    commands: Vec<NfCommand>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: NfObject) -> &mut Self {
        self.commands.push(NfCommand::Add(object));
        self
    }

    pub fn delete(&mut self, object: NfObject) -> &mut Self {
        self.commands.push(NfCommand::Delete(object));
        self
    }

    pub fn flush(&mut self, object: NfObject) -> &mut Self {
        self.commands.push(NfCommand::Flush(object));
        self
    }

    pub fn commands(&self) -> &[NfCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Deserialize)]
struct Listing {
    nftables: Vec<Value>,
}

/// Parses `nft -j list ...` output, skipping objects outside this schema
/// (`metainfo`, maps, counters and the like).
pub fn parse_listing(json: &str) -> Result<Vec<NfObject>, serde_json::Error> {
    let listing: Listing = serde_json::from_str(json)?;
    Ok(listing
        .nftables
        .into_iter()
        .filter_map(|object| serde_json::from_value(object).ok())
        .collect())
}
