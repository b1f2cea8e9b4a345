pub mod artifact;
pub mod bitmap;
pub mod config;
pub mod error;
pub mod master;
pub mod message;
pub mod node;
pub mod shutdown;
pub mod sim;
pub mod worker;

/// Unique node identifier. Masters occupy `[0, master_count)`, workers the
/// range `[master_count, master_count + worker_count)`.
pub type NodeId = u32;
