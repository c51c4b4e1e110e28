//! clusterd core -- envelope crypto, wire protocol, and the typed
//! configuration value/keyword system shared by every agent subsystem.
//!
//! - **Crypt** ([`crypt`]): the AES-256-CBC envelope (C3) wrapping all
//!   peer and relay traffic.
//! - **Identity** ([`identity`]): node names, object paths, resource ids.
//! - **Config** ([`config`]): keyword metadata, value conversion, the
//!   node-selector language, the on-disk grammar, and the config engine
//!   itself (C1).
//! - **Wire** ([`wire`]): request/response envelopes, heartbeat payloads,
//!   event records, JSON-delta patches, and `global_expect` (§6).
//! - **Error** ([`error`]): the exhaustive error taxonomy (§7).

pub mod config;
pub mod crypt;
pub mod error;
pub mod identity;
pub mod wire;

pub use config::{Builtins, Change, ConfigEngine, ConfigValue, Converter, KeywordRegistry, KeywordSpec, NodeSelector};
pub use crypt::{ClusterKey, Envelope};
pub use error::{AuthError, ConfigError, CoreError, DriverError, OrchestrationAbort, PeerUnreachable, QuorumLost, UsageError};
pub use identity::{NodeName, ObjectPath, Rid};
pub use wire::{EventKind, EventRecord, GlobalExpect, HeartbeatKind, HeartbeatPayload, Patch, PatchOp, Request, Response};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
