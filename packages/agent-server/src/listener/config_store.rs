//! Per-object `ConfigEngine` cache (C8 handler support): lazily loads and
//! caches one `agent_core::config::ConfigEngine` per `ObjectPath`, the way
//! `ServiceRegistry` caches one instance per service name -- a read
//! through the cache clones the cheap `Arc`, a miss loads from disk under
//! the object's `.conf` path.

use std::sync::Arc;

use agent_core::config::{builtin_keywords, Builtins, ConfigEngine, KeywordRegistry};
use agent_core::{ConfigError, ObjectPath};
use dashmap::DashMap;

use crate::config::AgentConfig;

pub struct ObjectConfigStore {
    config: Arc<AgentConfig>,
    registry: Arc<KeywordRegistry>,
    nodename: String,
    clusternodes: Vec<String>,
    cache: DashMap<ObjectPath, Arc<ConfigEngine>>,
}

impl ObjectConfigStore {
    #[must_use]
    pub fn new(config: Arc<AgentConfig>, nodename: String, clusternodes: Vec<String>) -> Self {
        Self { config, registry: Arc::new(KeywordRegistry::new(builtin_keywords())), nodename, clusternodes, cache: DashMap::new() }
    }

    /// # Errors
    /// Returns `ConfigError::Io` if the object's config file can't be
    /// read, or a parse error if it's malformed.
    pub fn get_or_load(&self, path: &ObjectPath) -> Result<Arc<ConfigEngine>, ConfigError> {
        if let Some(engine) = self.cache.get(path) {
            return Ok(engine.clone());
        }
        let namespace_display = if path.namespace.is_empty() { "root" } else { &path.namespace };
        let file_path = self.config.object_conf_path(namespace_display, &path.kind, &path.name);
        let builtins = Builtins {
            nodename: self.nodename.clone(),
            svcname: path.name.clone(),
            clusternodes: self.clusternodes.clone(),
            clusterdrpnodes: Vec::new(),
            is_member: Box::new({
                let clusternodes = self.clusternodes.clone();
                move |role, node| role == "nodes" && clusternodes.iter().any(|n| n == node)
            }),
        };
        let engine = Arc::new(ConfigEngine::load(&file_path, Arc::clone(&self.registry), builtins)?);
        self.cache.insert(path.clone(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Drops a cached engine so the next access reloads from disk --
    /// used after an out-of-band `config_set_multi` from a peer.
    pub fn invalidate(&self, path: &ObjectPath) {
        self.cache.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_conf(dir: &std::path::Path, namespace: &str, kind: &str, name: &str, body: &str) {
        let obj_dir = dir.join(namespace).join(kind);
        std::fs::create_dir_all(&obj_dir).unwrap();
        let mut f = std::fs::File::create(obj_dir.join(format!("{name}.conf"))).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn loads_and_caches_object_config() {
        let dir = tempfile::tempdir().unwrap();
        write_conf(dir.path(), "root", "svc", "app1", "[DEFAULT]\nid = app1-test\n");
        let config = Arc::new(AgentConfig { etc: dir.path().to_path_buf(), ..AgentConfig::parse_from(["clusterd-agent"]) });
        let store = ObjectConfigStore::new(config, "n1".to_string(), vec!["n1".to_string(), "n2".to_string()]);
        let path = ObjectPath { namespace: String::new(), kind: "svc".to_string(), name: "app1".to_string() };
        let engine = store.get_or_load(&path).unwrap();
        let id = engine.get("DEFAULT", "id", None, true).unwrap();
        assert_eq!(id.as_str().unwrap(), "app1-test");

        // Second call hits the cache -- same Arc pointer.
        let engine2 = store.get_or_load(&path).unwrap();
        assert!(Arc::ptr_eq(&engine, &engine2));
    }

    #[test]
    fn invalidate_forces_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_conf(dir.path(), "root", "svc", "app1", "[DEFAULT]\nid = app1\n");
        let config = Arc::new(AgentConfig { etc: dir.path().to_path_buf(), ..AgentConfig::parse_from(["clusterd-agent"]) });
        let store = ObjectConfigStore::new(config, "n1".to_string(), vec!["n1".to_string()]);
        let path = ObjectPath { namespace: String::new(), kind: "svc".to_string(), name: "app1".to_string() };
        let first = store.get_or_load(&path).unwrap();
        store.invalidate(&path);
        let second = store.get_or_load(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
