//! Error taxonomy shared by every core subsystem.
//!
//! Each variant here is one of the exhaustive error kinds: config, auth,
//! peer reachability, quorum, driver, orchestration, and caller usage
//! errors. Propagation policy (what recovers locally vs. what surfaces to
//! a caller vs. what triggers the suicide hook) is enforced by callers,
//! not by this type.

use thiserror::Error;

/// Keyword metadata / value-resolution failures (C1).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown section `{0}`")]
    UnknownSection(String),
    #[error("required keyword `{section}.{keyword}` has no value and no default")]
    MissingKey { section: String, keyword: String },
    #[error("value `{value}` for `{section}.{keyword}` is not a valid {converter}")]
    Conversion { section: String, keyword: String, converter: String, value: String },
    #[error("value `{value}` for `{section}.{keyword}` is not one of the allowed candidates")]
    NotACandidate { section: String, keyword: String, value: String },
    #[error("reference cycle detected while resolving `{0}`")]
    ReferenceCycle(String),
    #[error("reference expansion exceeded max depth ({0})")]
    RecursionLimit(usize),
    #[error("unknown reference `{0}`")]
    UnknownReference(String),
    #[error("malformed config file: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Envelope authentication/decryption failures (C3).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("cluster name mismatch")]
    ClusterNameMismatch,
    #[error("payload exceeds maximum size ({size} > {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("ciphertext padding or MAC check failed")]
    BadCiphertext,
    #[error("envelope is not valid UTF-8/JSON: {0}")]
    Malformed(String),
}

/// Transient failure contacting a peer over some heartbeat transport (C4).
#[derive(Debug, Error)]
#[error("peer {peer} unreachable via {driver}: {reason}")]
pub struct PeerUnreachable {
    pub peer: String,
    pub driver: &'static str,
    pub reason: String,
}

/// Consensus majority unreachable on this node's side of a partition (C10).
#[derive(Debug, Error)]
#[error("quorum lost: {live_votes} live votes out of {total_nodes} nodes")]
pub struct QuorumLost {
    pub live_votes: usize,
    pub total_nodes: usize,
}

/// An external resource driver returned a nonzero / failed result.
#[derive(Debug, Error)]
#[error("driver `{driver}` failed for rid `{rid}`: {reason}")]
pub struct DriverError {
    pub driver: String,
    pub rid: String,
    pub reason: String,
}

/// An orchestration action's preconditions no longer hold (e.g. preempted).
#[derive(Debug, Error)]
#[error("orchestration aborted for `{path}`: {reason}")]
pub struct OrchestrationAbort {
    pub path: String,
    pub reason: String,
}

/// Caller supplied invalid arguments to a listener action.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("missing required parameter `{0}`")]
    MissingParameter(String),
    #[error("parameter `{name}` value `{value}` is not a valid {expected}")]
    BadParameter { name: String, value: String, expected: String },
    #[error("ambiguous object reference `{0}`: use namespace/kind/name")]
    AmbiguousPath(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
}

/// Umbrella error crossing a subsystem boundary, used where a function can
/// fail for more than one taxonomy reason (e.g. the listener handler
/// contract). Kept separate from the per-subsystem enums so each remains a
/// closed set for its own owner.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    PeerUnreachable(#[from] PeerUnreachable),
    #[error(transparent)]
    QuorumLost(#[from] QuorumLost),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    OrchestrationAbort(#[from] OrchestrationAbort),
    #[error(transparent)]
    Usage(#[from] UsageError),
}
