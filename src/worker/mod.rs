//! Worker-side task execution.
//!
//! A worker knows nothing about elections. It broadcasts its task reports
//! to every master (it cannot know which one currently leads), executes
//! whatever the leader hands back, and retires on `EXIT`.
//!
//! - [`WorkerAgent`]: the claim/execute/report state machine
//! - [`Workload`]: the substitutable map/reduce computation, with the
//!   word-count job as the stock implementation

pub mod agent;
pub mod workload;

pub use agent::{WorkerAgent, WorkerPhase};
pub use workload::{WordCount, Workload};
