//! Keyword metadata registry (§3 "Keyword metadata", §4.1).
//!
//! Shape mirrors the per-keyword dict entries of a traditional OpenSVC-style
//! keyword store (`section`, `keyword`, `generic`, `at`, `candidates`,
//! `default`, `convert`) translated into a typed, process-wide, immutable
//! table built once at startup from static registration lists rather than
//! dynamic dict literals.

use std::collections::HashMap;

use crate::config::value::Converter;
use crate::error::ConfigError;

/// One keyword's full metadata.
#[derive(Debug, Clone)]
pub struct KeywordSpec {
    pub section: &'static str,
    pub keyword: &'static str,
    /// `true` for head keywords that apply once per section kind
    /// (`DEFAULT`-level identity/behavior), `false` for leaf keywords that
    /// may repeat per resource section.
    pub head: bool,
    /// Applies to any section, not just `section`.
    pub generic: bool,
    /// May be scoped with `@nodename`/`@nodes`/`@drpnodes`/… .
    pub scopable: bool,
    pub required: bool,
    pub default: Option<&'static str>,
    pub candidates: Option<&'static [&'static str]>,
    pub converter: Converter,
}

impl KeywordSpec {
    const fn new(section: &'static str, keyword: &'static str, converter: Converter) -> Self {
        Self {
            section,
            keyword,
            head: false,
            generic: false,
            scopable: false,
            required: false,
            default: None,
            candidates: None,
            converter,
        }
    }

    #[must_use]
    pub const fn head(mut self) -> Self {
        self.head = true;
        self
    }

    #[must_use]
    pub const fn generic(mut self) -> Self {
        self.generic = true;
        self
    }

    #[must_use]
    pub const fn scopable(mut self) -> Self {
        self.scopable = true;
        self
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub const fn default(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub const fn candidates(mut self, values: &'static [&'static str]) -> Self {
        self.candidates = Some(values);
        self
    }
}

/// Process-wide, immutable once built. Looks up by `(section_family, keyword)`
/// where `section_family` is the section name with any `#index` suffix
/// stripped (e.g. `ip#0` -> `ip`).
pub struct KeywordRegistry {
    by_section: HashMap<&'static str, HashMap<&'static str, KeywordSpec>>,
    generic: HashMap<&'static str, KeywordSpec>,
}

impl KeywordRegistry {
    #[must_use]
    pub fn new(specs: Vec<KeywordSpec>) -> Self {
        let mut by_section: HashMap<&'static str, HashMap<&'static str, KeywordSpec>> = HashMap::new();
        let mut generic = HashMap::new();
        for spec in specs {
            if spec.generic {
                generic.insert(spec.keyword, spec);
            } else {
                by_section.entry(spec.section).or_default().insert(spec.keyword, spec.clone());
            }
        }
        Self { by_section, generic }
    }

    /// Lookup metadata for `keyword` within `section_name`, where
    /// `section_name` may carry a `#index` suffix (stripped before lookup).
    #[must_use]
    pub fn lookup(&self, section_name: &str, keyword: &str) -> Option<&KeywordSpec> {
        let family = section_name.split('#').next().unwrap_or(section_name);
        self.by_section
            .get(family)
            .and_then(|m| m.get(keyword))
            .or_else(|| self.generic.get(keyword))
    }

    /// Validate a proposed raw value against metadata, without converting:
    /// candidate-set membership only (conversion failures are surfaced
    /// separately by `value::convert`).
    pub fn validate_candidates(&self, section: &str, keyword: &str, raw: &str) -> Result<(), ConfigError> {
        if let Some(spec) = self.lookup(section, keyword) {
            if let Some(candidates) = spec.candidates {
                if !candidates.contains(&raw) {
                    return Err(ConfigError::NotACandidate {
                        section: section.to_string(),
                        keyword: keyword.to_string(),
                        value: raw.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// All known keywords for `section_name`'s family, generic keywords
    /// included, for enumerating required-but-missing keys at load time.
    pub fn keywords_for(&self, section_name: &str) -> impl Iterator<Item = &KeywordSpec> {
        let family = section_name.split('#').next().unwrap_or(section_name);
        self.by_section.get(family).into_iter().flat_map(HashMap::values).chain(self.generic.values())
    }
}

/// Baseline keyword set covering the node/object metadata the core itself
/// relies on (identity, placement inputs, heartbeat/monitor tuning,
/// scheduling). Resource-driver-specific keywords (`ip`, `app`, `container`,
/// …) are registered by the drivers themselves, which are out of scope here;
/// this table only needs to satisfy C1/C4/C5/C9's own reads.
#[must_use]
pub fn builtin_keywords() -> Vec<KeywordSpec> {
    vec![
        KeywordSpec::new("DEFAULT", "id", Converter::String).head(),
        KeywordSpec::new("DEFAULT", "env", Converter::String)
            .head()
            .candidates(&["PRD", "INT", "DEV", "TMP", "TST", "STG"])
            .default("TST"),
        KeywordSpec::new("DEFAULT", "nodes", Converter::NodesSelector).head().scopable().default("{clusternodes}"),
        KeywordSpec::new("DEFAULT", "drpnodes", Converter::NodesSelector).head().scopable().default(""),
        KeywordSpec::new("DEFAULT", "cluster_type", Converter::String)
            .head()
            .candidates(&["failover", "flex"])
            .default("failover"),
        KeywordSpec::new("DEFAULT", "flex_min_nodes", Converter::Integer).head().default("1"),
        KeywordSpec::new("DEFAULT", "flex_max_nodes", Converter::Integer).head().default("10"),
        KeywordSpec::new("DEFAULT", "orchestrate", Converter::String)
            .head()
            .candidates(&["no", "start", "ha"])
            .default("no"),
        KeywordSpec::new("DEFAULT", "anti_affinity", Converter::List).head().default(""),
        KeywordSpec::new("DEFAULT", "monitor_action", Converter::String)
            .head()
            .candidates(&["reboot", "crash", "freezestop"])
            .default("freezestop"),
        KeywordSpec::new("cluster", "nodes", Converter::NodesSelector).head().default("{nodename}"),
        KeywordSpec::new("cluster", "name", Converter::String).head().required(),
        KeywordSpec::new("cluster", "secret", Converter::String).head().required(),
        KeywordSpec::new("cluster", "quorum", Converter::Boolean).head().default("true"),
        KeywordSpec::new("hb", "hb_period", Converter::Duration).generic().default("5s"),
        KeywordSpec::new("hb", "timeout", Converter::Duration).generic().default("15s"),
        KeywordSpec::new("listener", "addr", Converter::String).head().default("0.0.0.0"),
        KeywordSpec::new("listener", "port", Converter::Integer).head().default("1214"),
        KeywordSpec::new("node", "lock_timeout", Converter::Duration).head().default("60"),
        KeywordSpec::new("DEFAULT", "disable", Converter::Boolean).generic().scopable().default("false"),
        KeywordSpec::new("DEFAULT", "restart", Converter::Integer).generic().default("0"),
        KeywordSpec::new("DEFAULT", "monitor", Converter::Boolean).generic().default("false"),
        KeywordSpec::new("DEFAULT", "ready_period", Converter::Duration).head().default("5s"),
        KeywordSpec::new("DEFAULT", "rejoin_grace_period", Converter::Duration).head().default("90s"),
        KeywordSpec::new("DEFAULT", "maintenance_grace_period", Converter::Duration).head().default("60s"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_strips_section_index() {
        let reg = KeywordRegistry::new(builtin_keywords());
        let spec = reg.lookup("DEFAULT", "nodes").expect("nodes keyword");
        assert!(spec.head);
        assert_eq!(spec.default, Some("{clusternodes}"));
    }

    #[test]
    fn generic_keyword_applies_to_any_section() {
        let reg = KeywordRegistry::new(builtin_keywords());
        assert!(reg.lookup("ip#0", "disable").is_some());
        assert!(reg.lookup("app#1", "disable").is_some());
    }

    #[test]
    fn candidate_validation_rejects_unknown_value() {
        let reg = KeywordRegistry::new(builtin_keywords());
        assert!(reg.validate_candidates("DEFAULT", "env", "BOGUS").is_err());
        assert!(reg.validate_candidates("DEFAULT", "env", "PRD").is_ok());
    }
}
