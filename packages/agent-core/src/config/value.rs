//! Typed values produced by converting a raw config string (§3 "Keyword
//! metadata", §4.1 rule 2).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::identity::NodeName;

/// The converter a keyword declares in its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    Boolean,
    Duration,
    Size,
    Integer,
    List,
    ListLower,
    Shlex,
    NodesSelector,
    String,
}

/// A value after conversion, ready for consumption by C9/C2/C4/C8.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    /// Seconds.
    Duration(f64),
    /// Bytes.
    Size(u64),
    Integer(i64),
    List(Vec<String>),
    NodesSelector(Vec<NodeName>),
    String(String),
}

impl ConfigValue {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }
}

/// Convert a raw string per the keyword's declared converter.
///
/// `section`/`keyword` are only used to build a useful `ConfigError`.
pub fn convert(
    converter: Converter,
    section: &str,
    keyword: &str,
    raw: &str,
) -> Result<ConfigValue, ConfigError> {
    let err = |name: &str| ConfigError::Conversion {
        section: section.to_string(),
        keyword: keyword.to_string(),
        converter: name.to_string(),
        value: raw.to_string(),
    };
    match converter {
        Converter::Boolean => match raw.trim() {
            "true" | "1" | "yes" | "on" => Ok(ConfigValue::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(ConfigValue::Bool(false)),
            _ => Err(err("boolean")),
        },
        Converter::Duration => parse_duration(raw).map(ConfigValue::Duration).ok_or_else(|| err("duration")),
        Converter::Size => parse_size(raw).map(ConfigValue::Size).ok_or_else(|| err("size")),
        Converter::Integer => raw.trim().parse::<i64>().map(ConfigValue::Integer).map_err(|_| err("integer")),
        Converter::List => Ok(ConfigValue::List(split_words(raw))),
        Converter::ListLower => Ok(ConfigValue::List(split_words(raw).into_iter().map(|s| s.to_lowercase()).collect())),
        Converter::Shlex => shlex_split(raw).map(ConfigValue::List).ok_or_else(|| err("shlex")),
        Converter::NodesSelector => {
            Ok(ConfigValue::NodesSelector(split_words(raw).into_iter().map(|s| NodeName::new(&s)).collect()))
        }
        Converter::String => Ok(ConfigValue::String(raw.to_string())),
    }
}

fn split_words(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// `90`, `90s`, `5m`, `2h`, `1d` -> seconds.
fn parse_duration(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (num, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-').unwrap_or(raw.len()));
    let num: f64 = num.parse().ok()?;
    let mult = match unit.trim() {
        "" | "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        "d" => 86400.0,
        _ => return None,
    };
    Some(num * mult)
}

/// `512`, `512k`, `10m`, `2g` -> bytes (binary multiples).
fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let split_at = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (num, unit) = raw.split_at(split_at);
    let num: u64 = num.parse().ok()?;
    let mult: u64 = match unit.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(num * mult)
}

/// Minimal POSIX-ish word splitting honoring single/double quotes; no
/// escape processing beyond quote stripping, sufficient for keyword
/// values that need embedded spaces (e.g. command lines).
fn shlex_split(raw: &str) -> Option<Vec<String>> {
    let mut out = Vec::new();
    let mut chars = raw.chars().peekable();
    let mut cur = String::new();
    let mut in_token = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                in_token = true;
                let quote = c;
                for c2 in chars.by_ref() {
                    if c2 == quote {
                        break;
                    }
                    cur.push(c2);
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    out.push(std::mem::take(&mut cur));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                cur.push(c);
            }
        }
    }
    if in_token {
        out.push(cur);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_variants() {
        assert_eq!(convert(Converter::Boolean, "s", "k", "true").unwrap(), ConfigValue::Bool(true));
        assert_eq!(convert(Converter::Boolean, "s", "k", "no").unwrap(), ConfigValue::Bool(false));
        assert!(convert(Converter::Boolean, "s", "k", "maybe").is_err());
    }

    #[test]
    fn duration_units() {
        assert_eq!(convert(Converter::Duration, "s", "k", "90").unwrap(), ConfigValue::Duration(90.0));
        assert_eq!(convert(Converter::Duration, "s", "k", "5m").unwrap(), ConfigValue::Duration(300.0));
        assert_eq!(convert(Converter::Duration, "s", "k", "2h").unwrap(), ConfigValue::Duration(7200.0));
    }

    #[test]
    fn size_units() {
        assert_eq!(convert(Converter::Size, "s", "k", "10m").unwrap(), ConfigValue::Size(10 * 1024 * 1024));
    }

    #[test]
    fn list_splits_whitespace() {
        let v = convert(Converter::List, "s", "k", "n1 n2  n3").unwrap();
        assert_eq!(v.as_list().unwrap(), &["n1", "n2", "n3"]);
    }

    #[test]
    fn shlex_honors_quotes() {
        let v = convert(Converter::Shlex, "s", "k", r#"echo "hello world" there"#).unwrap();
        assert_eq!(v.as_list().unwrap(), &["echo", "hello world", "there"]);
    }
}
