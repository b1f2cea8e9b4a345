//! The simulated point-to-point network.
//!
//! Every message transits for a jittered amount of simulated time and may
//! be lost outright (broken link or random drop), but a channel never
//! reorders: messages between the same ordered pair of nodes deliver in
//! the order they were sent.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::NetConfig;
use crate::message::Envelope;
use crate::NodeId;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TransportStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug)]
struct InFlight {
    envelope: Envelope,
    remaining: Duration,
}

pub struct Transport {
    net: NetConfig,
    rng: SmallRng,
    /// Per ordered pair of nodes, a FIFO of messages in transit.
    channels: BTreeMap<(NodeId, NodeId), VecDeque<InFlight>>,
    /// Directed links that currently lose everything sent over them.
    broken: BTreeSet<(NodeId, NodeId)>,
    /// Extra one-way delay per directed link.
    extra_latency: BTreeMap<(NodeId, NodeId), Duration>,
    pub stats: TransportStats,
}

impl Transport {
    pub fn new(net: NetConfig, seed: u64) -> Self {
        Self {
            net,
            rng: SmallRng::seed_from_u64(seed),
            channels: BTreeMap::new(),
            broken: BTreeSet::new(),
            extra_latency: BTreeMap::new(),
            stats: TransportStats::default(),
        }
    }

    /// Put a message in transit. Loss is decided here, once; there is no
    /// retransmission at this layer.
    pub fn send(&mut self, envelope: Envelope) {
        if envelope.from == envelope.to {
            return;
        }
        self.stats.sent += 1;

        let link = (envelope.from, envelope.to);
        if self.broken.contains(&link) || self.rng.gen_bool(self.net.drop_rate) {
            tracing::trace!(
                from = envelope.from,
                to = envelope.to,
                kind = envelope.message.kind(),
                "Message dropped in transit"
            );
            self.stats.dropped += 1;
            return;
        }

        let jitter = self.rng.gen_range(self.net.jitter_min..=self.net.jitter_max);
        let transit = Duration::from_millis(self.net.travel_time_ms).mul_f64(jitter)
            + self.extra_latency.get(&link).copied().unwrap_or_default();
        self.channels.entry(link).or_default().push_back(InFlight {
            envelope,
            remaining: transit,
        });
    }

    /// Advance transit clocks and collect everything that has arrived.
    /// A message behind a slower head-of-line waits for it, preserving
    /// per-channel order.
    pub fn tick(&mut self, dt: Duration) -> Vec<Envelope> {
        let mut delivered = Vec::new();
        for queue in self.channels.values_mut() {
            for msg in queue.iter_mut() {
                msg.remaining = msg.remaining.saturating_sub(dt);
            }
            while queue.front().is_some_and(|m| m.remaining.is_zero()) {
                // Checked non-empty above.
                if let Some(msg) = queue.pop_front() {
                    self.stats.delivered += 1;
                    delivered.push(msg.envelope);
                }
            }
        }
        delivered
    }

    pub fn break_link(&mut self, from: NodeId, to: NodeId) {
        self.broken.insert((from, to));
        self.broken.insert((to, from));
    }

    pub fn heal_link(&mut self, from: NodeId, to: NodeId) {
        self.broken.remove(&(from, to));
        self.broken.remove(&(to, from));
    }

    pub fn set_link_latency(&mut self, from: NodeId, to: NodeId, extra: Duration) {
        self.extra_latency.insert((from, to), extra);
        self.extra_latency.insert((to, from), extra);
    }

    pub fn in_flight(&self) -> usize {
        self.channels.values().map(VecDeque::len).sum()
    }
}
