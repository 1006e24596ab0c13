//! renterfs Network Layer
//!
//! - `protocol`: shard and host messages
//! - `framing`: length-delimited bincode frames over TCP
//! - `shard`: client for the host directory
//! - `session`: authenticated renter-to-host sessions
//! - `server`: reference host and shard servers

pub mod framing;
pub mod protocol;
pub mod server;
pub mod session;
pub mod shard;

pub use framing::FramedConnection;
pub use protocol::{HostTerms, PROTOCOL_VERSION};
pub use server::{HostServer, ShardServer};
pub use session::HostSession;
pub use shard::ShardClient;
