//! The simulation driver.
//!
//! `SimCluster` owns every node and the transport, and is the only
//! scheduler: `step(dt)` advances the clock one tick, ticks every live
//! node, delivers due messages, and puts fresh outbox messages in transit.
//! Fault injection (crashes, broken links, partitions) lives here too.

pub mod transport;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifact::Artifact;
use crate::config::{ClusterConfig, NetConfig, TimingConfig};
use crate::error::{MapredError, Result};
use crate::master::MasterNode;
use crate::node::Node;
use crate::worker::{WordCount, WorkerAgent};
use crate::NodeId;

pub use transport::{Transport, TransportStats};

pub struct SimCluster {
    pub config: ClusterConfig,
    timing: TimingConfig,
    nodes: Vec<Node>,
    crashed: Vec<bool>,
    pub transport: Transport,
    seed: u64,
    restarts: u64,
    now: Duration,
    started_at: DateTime<Utc>,
}

impl SimCluster {
    /// Build the cluster at time zero. Master 0 is the bootstrap leader
    /// holding the base inputs (the node the job was submitted to); every
    /// other master starts as an uninitialized follower.
    pub fn new(
        config: ClusterConfig,
        timing: TimingConfig,
        net: NetConfig,
        seed: u64,
        inputs: Vec<Artifact>,
    ) -> Result<Self> {
        config.validate()?;
        if inputs.len() != config.map_task_count {
            return Err(MapredError::InvalidConfig(format!(
                "expected {} input artifacts for {} map tasks, got {}",
                config.map_task_count,
                config.map_task_count,
                inputs.len()
            )));
        }

        let mut nodes = Vec::with_capacity(config.total_nodes() as usize);
        for id in config.master_ids() {
            let node_seed = seed.wrapping_add(id as u64);
            let master = if id == 0 {
                MasterNode::bootstrap_leader(id, config, timing, node_seed, inputs.clone())
            } else {
                MasterNode::new(id, config, timing, node_seed)
            };
            nodes.push(Node::Master(master));
        }
        for id in config.worker_ids() {
            nodes.push(Node::Worker(WorkerAgent::new(
                id,
                config,
                timing,
                Box::new(WordCount),
            )));
        }

        Ok(Self {
            config,
            timing,
            nodes,
            crashed: vec![false; config.total_nodes() as usize],
            transport: Transport::new(net, seed.wrapping_add(0x1000)),
            seed,
            restarts: 0,
            now: Duration::ZERO,
            started_at: Utc::now(),
        })
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// One discrete time step: advance transit and node timers by `dt`,
    /// deliver due messages, collect what the nodes produced.
    pub fn step(&mut self, dt: Duration) {
        let due = self.transport.tick(dt);

        for node in &mut self.nodes {
            if !self.crashed[node.id() as usize] {
                node.tick(dt);
            }
        }

        for envelope in due {
            let to = envelope.to as usize;
            match self.nodes.get_mut(to) {
                Some(node) if !self.crashed[to] => node.handle_message(envelope),
                // A crashed or unknown destination swallows the message.
                _ => {}
            }
        }

        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if self.crashed[idx] {
                continue;
            }
            for envelope in node.take_outbox() {
                self.transport.send(envelope);
            }
        }

        self.now += dt;
    }

    /// Step until the job completes or `max` simulated time passes.
    /// Returns whether the job completed.
    pub fn run_until_complete(&mut self, tick: Duration, max: Duration) -> bool {
        let deadline = self.now + max;
        while self.now < deadline {
            if self.job_complete() {
                return true;
            }
            self.step(tick);
        }
        self.job_complete()
    }

    /// The job is complete once some live master has verified every task.
    pub fn job_complete(&self) -> bool {
        let total = (self.config.map_task_count + self.config.reduce_task_count) as u32;
        self.live_masters()
            .any(|m| m.ledger.all_done() && m.completed() == Some(total))
    }

    pub fn workers_retired(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(Node::as_worker)
            .filter(|w| w.retired())
            .count()
    }

    // === Inspection ===

    pub fn master(&self, id: NodeId) -> Option<&MasterNode> {
        self.nodes.get(id as usize)?.as_master()
    }

    pub fn master_mut(&mut self, id: NodeId) -> Option<&mut MasterNode> {
        self.nodes.get_mut(id as usize)?.as_master_mut()
    }

    pub fn worker(&self, id: NodeId) -> Option<&WorkerAgent> {
        self.nodes.get(id as usize)?.as_worker()
    }

    pub fn is_crashed(&self, id: NodeId) -> bool {
        self.crashed.get(id as usize).copied().unwrap_or(false)
    }

    fn live_masters(&self) -> impl Iterator<Item = &MasterNode> {
        self.nodes
            .iter()
            .filter(|n| !self.crashed[n.id() as usize])
            .filter_map(Node::as_master)
    }

    /// The current leader among live masters, if any.
    pub fn leader_id(&self) -> Option<NodeId> {
        self.live_masters().find(|m| m.is_leader()).map(|m| m.id)
    }

    pub fn count_leaders(&self) -> usize {
        self.live_masters().filter(|m| m.is_leader()).count()
    }

    // === Fault injection ===

    /// Stop a node cold: it no longer ticks, sends, or receives.
    pub fn crash(&mut self, id: NodeId) {
        if let Some(flag) = self.crashed.get_mut(id as usize) {
            tracing::info!(node_id = id, "Crashing node");
            *flag = true;
        }
    }

    /// Cold restart: volatile state is rebuilt from scratch, the artifact
    /// store (the node's disk) survives. A restarted master rejoins as an
    /// uninitialized follower and rediscovers job state via heartbeats.
    pub fn restart(&mut self, id: NodeId) {
        let idx = id as usize;
        if !self.crashed.get(idx).copied().unwrap_or(false) {
            return;
        }
        tracing::info!(node_id = id, "Restarting node");
        self.restarts += 1;
        let node_seed = self
            .seed
            .wrapping_add(id as u64)
            .wrapping_add(self.restarts << 32);

        let rebuilt = match &mut self.nodes[idx] {
            Node::Master(old) => {
                let store = std::mem::take(&mut old.store);
                Node::Master(MasterNode::with_store(
                    id,
                    self.config,
                    self.timing,
                    node_seed,
                    store,
                ))
            }
            Node::Worker(_) => Node::Worker(WorkerAgent::new(
                id,
                self.config,
                self.timing,
                Box::new(WordCount),
            )),
        };
        self.nodes[idx] = rebuilt;
        self.crashed[idx] = false;
    }

    pub fn break_link(&mut self, a: NodeId, b: NodeId) {
        self.transport.break_link(a, b);
    }

    pub fn heal_link(&mut self, a: NodeId, b: NodeId) {
        self.transport.heal_link(a, b);
    }

    /// Cut every link between the two groups.
    pub fn partition(&mut self, group_a: &[NodeId], group_b: &[NodeId]) {
        for &a in group_a {
            for &b in group_b {
                self.transport.break_link(a, b);
            }
        }
    }

    pub fn heal_partition(&mut self, group_a: &[NodeId], group_b: &[NodeId]) {
        for &a in group_a {
            for &b in group_b {
                self.transport.heal_link(a, b);
            }
        }
    }

    /// Cut a node off from every other node.
    pub fn isolate(&mut self, id: NodeId) {
        let others: Vec<NodeId> = (0..self.config.total_nodes()).filter(|&n| n != id).collect();
        self.partition(&[id], &others);
    }

    pub fn heal_node(&mut self, id: NodeId) {
        let others: Vec<NodeId> = (0..self.config.total_nodes()).filter(|&n| n != id).collect();
        self.heal_partition(&[id], &others);
    }

    // === Reporting ===

    pub fn report(&self) -> RunReport {
        let masters = self
            .nodes
            .iter()
            .filter_map(Node::as_master)
            .map(|m| MasterSummary {
                node_id: m.id,
                role: if self.is_crashed(m.id) {
                    "crashed".to_string()
                } else {
                    m.role().to_string()
                },
                term: m.term(),
                completed: crate::message::progress_to_wire(m.completed()),
            })
            .collect();

        let leader = self.leader_id();
        RunReport {
            finished: self.job_complete(),
            sim_elapsed_ms: self.now.as_millis() as u64,
            leader_id: leader,
            term: leader.and_then(|id| self.master(id)).map(MasterNode::term),
            masters,
            workers_retired: self.workers_retired(),
            worker_count: self.config.worker_count,
            transport: self.transport.stats,
            started_at: self.started_at,
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MasterSummary {
    pub node_id: NodeId,
    pub role: String,
    pub term: u64,
    /// Verified-complete task count; `-1` while uninitialized.
    pub completed: i64,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub finished: bool,
    pub sim_elapsed_ms: u64,
    pub leader_id: Option<NodeId>,
    pub term: Option<u64>,
    pub masters: Vec<MasterSummary>,
    pub workers_retired: usize,
    pub worker_count: u32,
    pub transport: TransportStats,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}
