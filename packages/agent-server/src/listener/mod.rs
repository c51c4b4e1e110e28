//! Framed TCP listener (C8, §4.8): accepts client and peer connections,
//! classifies and routes requests through the operation pipeline, and
//! exposes the ambient `/health` + `/metrics` HTTP surface.

pub mod config_store;
pub mod connection;
pub mod handler;
pub mod module;
pub mod router;

pub use config_store::ObjectConfigStore;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionKind, ConnectionRegistry};
pub use handler::handle_connection;
pub use module::ListenerModule;
pub use router::{NodeFreezeFlag, RequestRouter};
