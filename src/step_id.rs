// src/step_id.rs

//! Structured identifiers for steps and snapshots.
//!
//! ```text
//! data://garden/who/2024-01-01/gho           <scheme>://<channel>/<namespace>/<version>/<short_name>
//! snapshot://who/2024-01-01/gho.csv          <scheme>://<namespace>/<version>/<short_name>
//! ```
//!
//! The canonical rendering is used as the map key everywhere in the engine
//! and as the persistence key in the state store. Two identifiers are equal
//! iff every field matches; since the rendering is injective this is the same
//! as comparing canonical strings, which is also the ordering used for
//! deterministic tie-breaking.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::InvalidIdentifierError;

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("static regex"));
static SHORT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("static regex"));
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(v\d+(\.\d+){0,2}|\d+\.\d+(\.\d+)?)$").expect("static regex")
});

/// URI scheme of an identifier. Snapshot schemes name external, content
/// addressed inputs; every other scheme names a buildable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    Data,
    DataPrivate,
    Export,
    Snapshot,
    SnapshotPrivate,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Data => "data",
            Scheme::DataPrivate => "data-private",
            Scheme::Export => "export",
            Scheme::Snapshot => "snapshot",
            Scheme::SnapshotPrivate => "snapshot-private",
        }
    }

    pub fn is_snapshot(self) -> bool {
        matches!(self, Scheme::Snapshot | Scheme::SnapshotPrivate)
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(Scheme::Data),
            "data-private" => Ok(Scheme::DataPrivate),
            "export" => Ok(Scheme::Export),
            "snapshot" => Ok(Scheme::Snapshot),
            "snapshot-private" => Ok(Scheme::SnapshotPrivate),
            other => Err(format!("unknown scheme '{other}'")),
        }
    }
}

/// Version token of an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// `YYYY-MM-DD`
    Date(NaiveDate),
    /// The literal `latest`.
    Latest,
    /// `v1`, `v1.2`, `1.2.3`, ...
    Tag(String),
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "latest" {
            return Ok(Version::Latest);
        }
        if DATE_RE.is_match(s) {
            return NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Version::Date)
                .map_err(|e| format!("invalid date version '{s}': {e}"));
        }
        if TAG_RE.is_match(s) {
            return Ok(Version::Tag(s.to_string()));
        }
        Err(format!(
            "invalid version token '{s}' (expected YYYY-MM-DD, 'latest' or a semantic tag)"
        ))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Version::Latest => f.write_str("latest"),
            Version::Tag(t) => f.write_str(t),
        }
    }
}

/// Canonical identifier of a step or snapshot.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId {
    scheme: Scheme,
    channel: Option<String>,
    namespace: String,
    version: Version,
    short_name: String,
    canonical: String,
}

impl StepId {
    /// Parse a free-form string, ignoring surrounding whitespace.
    pub fn parse(input: &str) -> Result<Self, InvalidIdentifierError> {
        let err = |reason: String| InvalidIdentifierError::new(input, reason);
        let trimmed = input.trim();

        let (scheme_str, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| err("missing '<scheme>://' prefix".to_string()))?;
        let scheme = Scheme::from_str(scheme_str).map_err(err)?;

        let parts: Vec<&str> = rest.split('/').collect();
        let expected = if scheme.is_snapshot() { 3 } else { 4 };
        if parts.len() != expected {
            let layout = if scheme.is_snapshot() {
                "<namespace>/<version>/<short_name>"
            } else {
                "<channel>/<namespace>/<version>/<short_name>"
            };
            return Err(err(format!(
                "expected {layout} after '{}://', found {} segment(s)",
                scheme.as_str(),
                parts.len()
            )));
        }

        let (channel, rest) = if scheme.is_snapshot() {
            (None, &parts[..])
        } else {
            (Some(parts[0]), &parts[1..])
        };
        let (namespace, version, short_name) = (rest[0], rest[1], rest[2]);

        if let Some(channel) = channel {
            check_field("channel", channel, &LABEL_RE).map_err(err)?;
        }
        check_field("namespace", namespace, &LABEL_RE).map_err(err)?;
        if version.is_empty() {
            return Err(err("missing required field 'version'".to_string()));
        }
        let version = Version::from_str(version).map_err(err)?;
        check_field("short_name", short_name, &SHORT_NAME_RE).map_err(err)?;

        Ok(Self::from_parts(
            scheme,
            channel.map(str::to_string),
            namespace.to_string(),
            version,
            short_name.to_string(),
        ))
    }

    fn from_parts(
        scheme: Scheme,
        channel: Option<String>,
        namespace: String,
        version: Version,
        short_name: String,
    ) -> Self {
        let canonical = match &channel {
            Some(c) => format!(
                "{}://{}/{}/{}/{}",
                scheme.as_str(),
                c,
                namespace,
                version,
                short_name
            ),
            None => format!("{}://{}/{}/{}", scheme.as_str(), namespace, version, short_name),
        };
        Self {
            scheme,
            channel,
            namespace,
            version,
            short_name,
            canonical,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Processing stage (`meadow`, `garden`, ...). `None` for snapshots.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn is_snapshot(&self) -> bool {
        self.scheme.is_snapshot()
    }

    /// Canonical string rendering; stable map and persistence key.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

fn check_field(field: &str, value: &str, re: &Regex) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("missing required field '{field}'"));
    }
    if !re.is_match(value) {
        return Err(format!("invalid characters in {field} '{value}'"));
    }
    Ok(())
}

impl PartialEq for StepId {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for StepId {}

impl Hash for StepId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for StepId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StepId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepId({})", self.canonical)
    }
}

impl FromStr for StepId {
    type Err = InvalidIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::parse(s)
    }
}

impl TryFrom<String> for StepId {
    type Error = InvalidIdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StepId::parse(&value)
    }
}

impl From<StepId> for String {
    fn from(id: StepId) -> Self {
        id.canonical
    }
}
