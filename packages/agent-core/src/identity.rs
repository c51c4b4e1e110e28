//! Node identity and object path types (§3).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UsageError;

/// A cluster node's stable name: the lowercased hostname.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeName(String);

impl NodeName {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeName {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

/// `namespace/kind/name`. Namespace may be empty, in which case it is
/// displayed and parsed as the literal `root`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectPath {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl ObjectPath {
    pub fn parse(raw: &str) -> Result<Self, UsageError> {
        let parts: Vec<&str> = raw.split('/').collect();
        let (namespace, kind, name) = match parts.as_slice() {
            [kind, name] => (String::new(), (*kind).to_string(), (*name).to_string()),
            [ns, kind, name] => (
                if *ns == "root" { String::new() } else { (*ns).to_string() },
                (*kind).to_string(),
                (*name).to_string(),
            ),
            _ => return Err(UsageError::AmbiguousPath(raw.to_string())),
        };
        validate_component(&name)?;
        validate_component(&kind)?;
        Ok(Self { namespace, kind, name })
    }

    #[must_use]
    pub fn namespace_display(&self) -> &str {
        if self.namespace.is_empty() {
            "root"
        } else {
            &self.namespace
        }
    }
}

fn validate_component(s: &str) -> Result<(), UsageError> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(UsageError::AmbiguousPath(s.to_string()));
    }
    Ok(())
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace_display(), self.kind, self.name)
    }
}

impl FromStr for ObjectPath {
    type Err = UsageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = UsageError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectPath> for String {
    fn from(value: ObjectPath) -> Self {
        value.to_string()
    }
}

/// A resource identifier: `type#index`, opaque to the core beyond that shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid(pub String);

impl Rid {
    #[must_use]
    pub fn new(rtype: &str, index: u32) -> Self {
        Self(format!("{rtype}#{index}"))
    }

    #[must_use]
    pub fn rtype(&self) -> &str {
        self.0.split('#').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
