//! Node kind registry
//!
//! The graph holds a closed set of node kinds grouped in three classes:
//! - Observables: technical values seen in the wild (IPs, hostnames, hashes)
//! - Indicators: detection patterns (regexes, YARA rules)
//! - Entities: actors, campaigns, malware families, companies
//!
//! Every kind knows how to bring a raw value into its canonical form, which
//! is what node identity is built on.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::{GraphError, GraphResult};

/// Top-level class of a node, as named by link creation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    Observable,
    Indicator,
    Entity,
}

impl NodeClass {
    /// Resolve a class name; unknown names are rejected explicitly
    pub fn from_name(name: &str) -> GraphResult<Self> {
        match name {
            "observable" => Ok(Self::Observable),
            "indicator" => Ok(Self::Indicator),
            "entity" => Ok(Self::Entity),
            other => Err(GraphError::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observable => "observable",
            Self::Indicator => "indicator",
            Self::Entity => "entity",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// IPv4 or IPv6 address
    Ip,
    /// DNS hostname or domain
    Hostname,
    /// URL with scheme and host
    Url,
    /// MD5 / SHA1 / SHA256 / SHA512 digest
    Hash,
    /// Email address
    Email,
    /// Bitcoin address
    Bitcoin,
    /// Free-form text
    Text,
    /// Regular expression indicator
    Regex,
    /// YARA rule indicator
    Yara,
    /// Threat actor
    Actor,
    /// Campaign
    Campaign,
    /// Malware family
    Malware,
    /// Company / organisation
    Company,
}

impl NodeKind {
    pub const ALL: [NodeKind; 13] = [
        NodeKind::Ip,
        NodeKind::Hostname,
        NodeKind::Url,
        NodeKind::Hash,
        NodeKind::Email,
        NodeKind::Bitcoin,
        NodeKind::Text,
        NodeKind::Regex,
        NodeKind::Yara,
        NodeKind::Actor,
        NodeKind::Campaign,
        NodeKind::Malware,
        NodeKind::Company,
    ];

    /// Class this kind belongs to
    pub fn class(&self) -> NodeClass {
        match self {
            NodeKind::Ip
            | NodeKind::Hostname
            | NodeKind::Url
            | NodeKind::Hash
            | NodeKind::Email
            | NodeKind::Bitcoin
            | NodeKind::Text => NodeClass::Observable,
            NodeKind::Regex | NodeKind::Yara => NodeClass::Indicator,
            NodeKind::Actor | NodeKind::Campaign | NodeKind::Malware | NodeKind::Company => {
                NodeClass::Entity
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Ip => "ip",
            NodeKind::Hostname => "hostname",
            NodeKind::Url => "url",
            NodeKind::Hash => "hash",
            NodeKind::Email => "email",
            NodeKind::Bitcoin => "bitcoin",
            NodeKind::Text => "text",
            NodeKind::Regex => "regex",
            NodeKind::Yara => "yara",
            NodeKind::Actor => "actor",
            NodeKind::Campaign => "campaign",
            NodeKind::Malware => "malware",
            NodeKind::Company => "company",
        }
    }

    /// Resolve a kind by name (case-insensitive)
    pub fn from_name(name: &str) -> GraphResult<Self> {
        let lowered = name.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == lowered)
            .ok_or_else(|| GraphError::UnknownKind(name.to_string()))
    }

    /// Bring a raw value into this kind's canonical form
    pub fn normalize(&self, raw: &str) -> GraphResult<String> {
        let value = raw.trim();
        let invalid = || GraphError::InvalidValue {
            kind: *self,
            value: raw.to_string(),
        };

        if value.is_empty() {
            return Err(invalid());
        }

        match self {
            NodeKind::Ip => value
                .parse::<IpAddr>()
                .map(|ip| ip.to_string())
                .map_err(|_| invalid()),
            NodeKind::Hostname => {
                let host = value.trim_end_matches('.').to_lowercase();
                if HOSTNAME_REGEX.is_match(&host) {
                    Ok(host)
                } else {
                    Err(invalid())
                }
            }
            NodeKind::Url => {
                if URL_REGEX.is_match(value) {
                    Ok(value.to_string())
                } else {
                    Err(invalid())
                }
            }
            NodeKind::Hash => {
                let hash = value.to_lowercase();
                if HEX_REGEX.is_match(&hash) && matches!(hash.len(), 32 | 40 | 64 | 128) {
                    Ok(hash)
                } else {
                    Err(invalid())
                }
            }
            NodeKind::Email => {
                let email = value.to_lowercase();
                if EMAIL_REGEX.is_match(&email) {
                    Ok(email)
                } else {
                    Err(invalid())
                }
            }
            NodeKind::Bitcoin => {
                if BITCOIN_REGEX.is_match(value) {
                    Ok(value.to_string())
                } else {
                    Err(invalid())
                }
            }
            NodeKind::Text
            | NodeKind::Regex
            | NodeKind::Yara
            | NodeKind::Actor
            | NodeKind::Campaign
            | NodeKind::Malware
            | NodeKind::Company => Ok(value.to_string()),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Patterns applied after lowercasing where the kind is case-insensitive
static HOSTNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9_](?:[a-z0-9_-]{0,61}[a-z0-9])?\.)+[a-z0-9-]{2,63}$").unwrap()
});

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/?#]+[^\s]*$").unwrap()
});

static HEX_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-f0-9]+$").unwrap());

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").unwrap()
});

static BITCOIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:bc1[a-z0-9]{25,87}|[13][a-km-zA-HJ-NP-Z1-9]{25,34})$").unwrap()
});
