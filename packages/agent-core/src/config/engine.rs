//! The config engine (C1): typed `get`/`set_multi` over a scoped,
//! interpolated, snapshot-consistent object or node configuration.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use regex::Regex;

use crate::config::keyword::KeywordRegistry;
use crate::config::parser::{RawConfig, RawEntry, RawSection};
use crate::config::value::{convert, ConfigValue};
use crate::error::ConfigError;

const MAX_REFERENCE_DEPTH: usize = 8;

/// Scopes tried after an exact `key@nodename` match, in priority order.
/// Membership in each is supplied by the caller via `Builtins::is_member`,
/// since evaluating it in general requires resolving `nodes`/`drpnodes`
/// themselves -- a bootstrapping concern the engine keeps external rather
/// than recursing into itself.
const ROLE_SCOPES: &[&str] = &["nodes", "drpnodes", "encapnodes", "flex_primary", "drp_flex_primary"];

/// Built-in substitutions and scope-membership facts the engine needs but
/// does not own: the evaluating node's identity, the object's name, and
/// cluster-wide node lists.
pub struct Builtins {
    pub nodename: String,
    pub svcname: String,
    pub clusternodes: Vec<String>,
    pub clusterdrpnodes: Vec<String>,
    /// `is_member(role, nodename)` — whether `nodename` belongs to the
    /// named role scope (`nodes`, `drpnodes`, …) for this object.
    pub is_member: Box<dyn Fn(&str, &str) -> bool + Send + Sync>,
}

struct Snapshot {
    raw: RawConfig,
}

/// A handle to one object's (or the node's) configuration. Reads clone the
/// current `Arc<Snapshot>` under a brief read lock and then operate on the
/// owned snapshot, so a read never observes a write that starts after it
/// began. Writers serialize on `write_lock` and publish a whole new
/// snapshot atomically.
pub struct ConfigEngine {
    snapshot: RwLock<Arc<Snapshot>>,
    write_lock: Mutex<()>,
    registry: Arc<KeywordRegistry>,
    builtins: Builtins,
}

/// One `section.key[@scope] = value` change, as accepted by `set_multi`.
#[derive(Debug, Clone)]
pub struct Change {
    pub section: String,
    pub key: String,
    pub scope: Option<String>,
    pub value: Option<String>,
}

impl ConfigEngine {
    #[must_use]
    pub fn new(raw: RawConfig, registry: Arc<KeywordRegistry>, builtins: Builtins) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot { raw })),
            write_lock: Mutex::new(()),
            registry,
            builtins,
        }
    }

    pub fn load(path: &Path, registry: Arc<KeywordRegistry>, builtins: Builtins) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let raw = RawConfig::parse(&text)?;
        Ok(Self::new(raw, registry, builtins))
    }

    /// §4.1 `get(section, key, impersonate=None, evaluate=True)`.
    pub fn get(&self, section: &str, key: &str, impersonate: Option<&str>, evaluate: bool) -> Result<ConfigValue, ConfigError> {
        let snapshot = self.snapshot.read().unwrap().clone();
        let spec = self.registry.lookup(section, key);
        let effective_node = impersonate.unwrap_or(&self.builtins.nodename);

        let raw_value = self.resolve_scope(&snapshot.raw, section, key, effective_node)?;
        let raw_value = match raw_value {
            Some(v) => v,
            None => match spec.and_then(|s| s.default) {
                Some(d) => d.to_string(),
                None => return Err(ConfigError::MissingKey { section: section.to_string(), keyword: key.to_string() }),
            },
        };

        let expanded = if evaluate {
            let mut visited = HashSet::new();
            self.expand(&raw_value, &snapshot.raw, &mut visited, 0)?
        } else {
            raw_value
        };

        let converter = spec.map_or(crate::config::value::Converter::String, |s| s.converter);
        convert(converter, section, key, &expanded)
    }

    fn resolve_scope(&self, raw: &RawConfig, section: &str, key: &str, nodename: &str) -> Result<Option<String>, ConfigError> {
        let Some(body) = raw.sections.iter().find(|s| s.name == section) else {
            return Ok(None);
        };
        if let Some(e) = find_entry(body, key, Some(nodename)) {
            return Ok(Some(e.value.clone()));
        }
        for role in ROLE_SCOPES {
            if (self.builtins.is_member)(role, nodename) {
                if let Some(e) = find_entry(body, key, Some(role)) {
                    return Ok(Some(e.value.clone()));
                }
            }
        }
        Ok(find_entry(body, key, None).map(|e| e.value.clone()))
    }

    fn expand(&self, raw: &str, snapshot: &RawConfig, visited: &mut HashSet<String>, depth: usize) -> Result<String, ConfigError> {
        if depth > MAX_REFERENCE_DEPTH {
            return Err(ConfigError::RecursionLimit(MAX_REFERENCE_DEPTH));
        }
        let re = Regex::new(r"\{([^}]+)\}").unwrap();
        let mut out = String::new();
        let mut last = 0;
        for caps in re.captures_iter(raw) {
            let m = caps.get(0).unwrap();
            out.push_str(&raw[last..m.start()]);
            let token = &caps[1];
            if !visited.insert(token.to_string()) {
                return Err(ConfigError::ReferenceCycle(token.to_string()));
            }
            let replacement = self.resolve_reference(token, snapshot, visited, depth)?;
            visited.remove(token);
            out.push_str(&replacement);
            last = m.end();
        }
        out.push_str(&raw[last..]);
        Ok(out)
    }

    fn resolve_reference(&self, token: &str, snapshot: &RawConfig, visited: &mut HashSet<String>, depth: usize) -> Result<String, ConfigError> {
        match token {
            "nodename" => Ok(self.builtins.nodename.clone()),
            "svcname" => Ok(self.builtins.svcname.clone()),
            "clusternodes" => Ok(self.builtins.clusternodes.join(" ")),
            "clusterdrpnodes" => Ok(self.builtins.clusterdrpnodes.join(" ")),
            _ => {
                if let Some(name) = token.strip_prefix("env:") {
                    return Ok(std::env::var(name).unwrap_or_default());
                }
                if let Some((section, key)) = token.split_once('.') {
                    let raw_value = self
                        .resolve_scope(snapshot, section, key, &self.builtins.nodename)?
                        .ok_or_else(|| ConfigError::UnknownReference(token.to_string()))?;
                    return self.expand(&raw_value, snapshot, visited, depth + 1);
                }
                Err(ConfigError::UnknownReference(token.to_string()))
            }
        }
    }

    /// §4.1 `set_multi(changes)`. Applies all changes to a cloned snapshot
    /// and publishes it atomically; pruning unknown keys with a warning and
    /// enforcing candidates is the caller's responsibility at the section
    /// level (the registry validates candidates here).
    pub fn set_multi(&self, changes: Vec<Change>) -> Result<(), ConfigError> {
        let _write_guard = self.write_lock.lock().unwrap();
        let current = self.snapshot.read().unwrap().clone();
        let mut raw = current.raw.clone();

        for change in &changes {
            if let Some(value) = &change.value {
                self.registry.validate_candidates(&change.section, &change.key, value)?;
            }
        }

        for change in changes {
            apply_change(&mut raw, &change);
        }

        let mut guard = self.snapshot.write().unwrap();
        *guard = Arc::new(Snapshot { raw });
        Ok(())
    }

    /// Persist the current snapshot to `path` via temp-file + atomic
    /// rename, mode 0600.
    pub fn persist(&self, path: &Path) -> Result<(), ConfigError> {
        let snapshot = self.snapshot.read().unwrap().clone();
        let rendered = snapshot.raw.render();
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, rendered)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn find_entry<'a>(section: &'a RawSection, key: &str, scope: Option<&str>) -> Option<&'a RawEntry> {
    section.entries.iter().find(|e| e.key == key && e.scope.as_deref() == scope)
}

fn apply_change(raw: &mut RawConfig, change: &Change) {
    let section = match raw.sections.iter_mut().find(|s| s.name == change.section) {
        Some(s) => s,
        None => {
            raw.sections.push(RawSection { name: change.section.clone(), entries: Vec::new() });
            raw.sections.last_mut().unwrap()
        }
    };
    section.entries.retain(|e| !(e.key == change.key && e.scope == change.scope));
    if let Some(value) = &change.value {
        section.entries.push(RawEntry { key: change.key.clone(), scope: change.scope.clone(), value: value.clone() });
    }
}

fn no_membership(_role: &str, _nodename: &str) -> bool {
    false
}

impl Builtins {
    #[must_use]
    pub fn simple(nodename: &str, svcname: &str, clusternodes: Vec<String>) -> Self {
        Self {
            nodename: nodename.to_string(),
            svcname: svcname.to_string(),
            clusternodes,
            clusterdrpnodes: Vec::new(),
            is_member: Box::new(no_membership),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keyword::builtin_keywords;

    fn engine(text: &str, nodename: &str) -> ConfigEngine {
        let raw = RawConfig::parse(text).unwrap();
        let registry = Arc::new(KeywordRegistry::new(builtin_keywords()));
        let builtins = Builtins {
            nodename: nodename.to_string(),
            svcname: "web".to_string(),
            clusternodes: vec!["n1".to_string(), "n2".to_string()],
            clusterdrpnodes: Vec::new(),
            is_member: Box::new(|role, _n| role == "nodes"),
        };
        ConfigEngine::new(raw, registry, builtins)
    }

    #[test]
    fn scoping_picks_most_specific() {
        let text = "[ip#0]\nipname@n1 = 10.0.0.1\nipname@n2 = 10.0.0.2\nipname = 10.0.0.9\n";
        let e1 = engine(text, "n1");
        assert_eq!(e1.get("ip#0", "ipname", None, false).unwrap(), ConfigValue::String("10.0.0.1".into()));
        let e3 = engine(text, "n3");
        assert_eq!(e3.get("ip#0", "ipname", None, false).unwrap(), ConfigValue::String("10.0.0.9".into()));
    }

    #[test]
    fn reference_expansion_of_clusternodes() {
        let text = "[DEFAULT]\nnodes = {clusternodes}\n";
        let e = engine(text, "n1");
        let v = e.get("DEFAULT", "nodes", None, true).unwrap();
        assert_eq!(v.as_list().unwrap(), &["n1", "n2"]);
    }

    #[test]
    fn reference_cycle_detected() {
        let text = "[DEFAULT]\na = {DEFAULT.b}\nb = {DEFAULT.a}\n";
        let e = engine(text, "n1");
        let err = e.get("DEFAULT", "a", None, true).unwrap_err();
        assert!(matches!(err, ConfigError::ReferenceCycle(_) | ConfigError::UnknownReference(_)));
    }

    #[test]
    fn set_multi_then_get_sees_new_value() {
        let text = "[DEFAULT]\nenv = TST\n";
        let e = engine(text, "n1");
        e.set_multi(vec![Change { section: "DEFAULT".into(), key: "env".into(), scope: None, value: Some("PRD".into()) }])
            .unwrap();
        assert_eq!(e.get("DEFAULT", "env", None, false).unwrap(), ConfigValue::String("PRD".into()));
    }

    #[test]
    fn missing_required_with_no_default_errors() {
        let text = "[cluster]\nname = prod\n";
        let e = engine(text, "n1");
        let err = e.get("cluster", "secret", None, false).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { .. }));
    }

    #[test]
    fn default_applies_when_absent() {
        let text = "[DEFAULT]\nid = x\n";
        let e = engine(text, "n1");
        assert_eq!(e.get("DEFAULT", "env", None, false).unwrap(), ConfigValue::String("TST".into()));
    }
}
