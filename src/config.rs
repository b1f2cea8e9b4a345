use std::ops::Range;
use std::time::Duration;

use crate::error::{MapredError, Result};
use crate::NodeId;

/// Immutable per-run cluster shape.
///
/// Node IDs are assigned from the counts: IDs `[0, master_count)` are
/// masters, `[master_count, master_count + worker_count)` are workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfig {
    pub master_count: u32,
    pub worker_count: u32,
    pub map_task_count: usize,
    pub reduce_task_count: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master_count: 5,
            worker_count: 7,
            map_task_count: 5,
            reduce_task_count: 10,
        }
    }
}

impl ClusterConfig {
    pub fn new(
        master_count: u32,
        worker_count: u32,
        map_task_count: usize,
        reduce_task_count: usize,
    ) -> Result<Self> {
        let config = Self {
            master_count,
            worker_count,
            map_task_count,
            reduce_task_count,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.master_count == 0 {
            return Err(MapredError::InvalidConfig(
                "master_count must be at least 1".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(MapredError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.map_task_count == 0 || self.reduce_task_count == 0 {
            return Err(MapredError::InvalidConfig(
                "map_task_count and reduce_task_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_nodes(&self) -> u32 {
        self.master_count + self.worker_count
    }

    pub fn is_master(&self, id: NodeId) -> bool {
        id < self.master_count
    }

    pub fn is_worker(&self, id: NodeId) -> bool {
        id >= self.master_count && id < self.total_nodes()
    }

    pub fn master_ids(&self) -> Range<NodeId> {
        0..self.master_count
    }

    pub fn worker_ids(&self) -> Range<NodeId> {
        self.master_count..self.total_nodes()
    }

    /// Votes required to win an election: a strict majority of masters.
    pub fn majority(&self) -> usize {
        (self.master_count as usize / 2) + 1
    }
}

/// All protocol timers, in simulated milliseconds.
///
/// The defaults keep the Raft proportions honest: heartbeats arrive several
/// times per minimum election timeout, and the per-task in-flight timeout is
/// long enough for a worker round trip.
#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// How long an assigned task stays reserved before it becomes
    /// assignable again.
    pub task_timeout_ms: u64,
    /// Simulated execution time of a single map or reduce task.
    pub exec_time_ms: u64,
    /// Cadence at which an idle worker (re-)reports to the masters.
    pub report_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            task_timeout_ms: 1000,
            exec_time_ms: 200,
            report_interval_ms: 100,
        }
    }
}

impl TimingConfig {
    pub fn with_election_timeout(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.election_timeout_min_ms = min_ms;
        self.election_timeout_max_ms = max_ms;
        self
    }

    pub fn with_heartbeat_interval(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn with_task_timeout(mut self, ms: u64) -> Self {
        self.task_timeout_ms = ms;
        self
    }

    pub fn with_exec_time(mut self, ms: u64) -> Self {
        self.exec_time_ms = ms;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// Transport behavior for the simulated network.
#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
    /// Base one-way transit time in simulated milliseconds.
    pub travel_time_ms: u64,
    /// Multiplicative jitter band applied to every message's transit time.
    pub jitter_min: f64,
    pub jitter_max: f64,
    /// Probability in `[0, 1]` that any given message is lost in transit.
    pub drop_rate: f64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            travel_time_ms: 10,
            jitter_min: 0.85,
            jitter_max: 1.15,
            drop_rate: 0.0,
        }
    }
}

impl NetConfig {
    pub fn with_travel_time(mut self, ms: u64) -> Self {
        self.travel_time_ms = ms;
        self
    }

    pub fn with_drop_rate(mut self, rate: f64) -> Self {
        self.drop_rate = rate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_config_default() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.master_count, 5);
        assert_eq!(cfg.worker_count, 7);
        assert_eq!(cfg.map_task_count, 5);
        assert_eq!(cfg.reduce_task_count, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn cluster_config_rejects_zero_masters() {
        assert!(ClusterConfig::new(0, 3, 5, 10).is_err());
        assert!(ClusterConfig::new(3, 0, 5, 10).is_err());
        assert!(ClusterConfig::new(3, 3, 0, 10).is_err());
        assert!(ClusterConfig::new(3, 3, 5, 0).is_err());
    }

    #[test]
    fn node_id_ranges() {
        let cfg = ClusterConfig::new(3, 4, 5, 10).unwrap();
        assert_eq!(cfg.total_nodes(), 7);
        assert!(cfg.is_master(0));
        assert!(cfg.is_master(2));
        assert!(!cfg.is_master(3));
        assert!(cfg.is_worker(3));
        assert!(cfg.is_worker(6));
        assert!(!cfg.is_worker(7));
        assert_eq!(cfg.master_ids().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(cfg.worker_ids().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn majority_is_strict() {
        // A 5-master cluster needs 3 votes, never 2.
        let cfg = ClusterConfig::new(5, 1, 1, 1).unwrap();
        assert_eq!(cfg.majority(), 3);
        let cfg = ClusterConfig::new(4, 1, 1, 1).unwrap();
        assert_eq!(cfg.majority(), 3);
        let cfg = ClusterConfig::new(1, 1, 1, 1).unwrap();
        assert_eq!(cfg.majority(), 1);
    }

    #[test]
    fn timing_config_builders() {
        let timing = TimingConfig::default()
            .with_election_timeout(50, 100)
            .with_heartbeat_interval(20)
            .with_task_timeout(400)
            .with_exec_time(30);
        assert_eq!(timing.election_timeout_min_ms, 50);
        assert_eq!(timing.election_timeout_max_ms, 100);
        assert_eq!(timing.heartbeat_interval_ms, 20);
        assert_eq!(timing.task_timeout_ms, 400);
        assert_eq!(timing.exec_time_ms, 30);
    }

    #[test]
    fn net_config_default_is_lossless() {
        let net = NetConfig::default();
        assert_eq!(net.drop_rate, 0.0);
        assert!(net.jitter_min < net.jitter_max);
    }
}
