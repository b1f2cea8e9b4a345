//! Raft-derived leader election state.
//!
//! One leader per term is safe whenever a strict majority of masters are
//! reachable: each master grants at most one vote per term, and a candidate
//! needs more than half the masters to win. Liveness is probabilistic via
//! the randomized election deadline.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;

use crate::config::TimingConfig;
use crate::master::timer::random_election_timeout;
use crate::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

#[derive(Debug)]
pub struct ElectionState {
    pub role: Role,
    /// Monotonically non-decreasing election epoch, starting at 1.
    pub term: u64,
    /// Who we voted for in the current term. Cleared whenever the term
    /// advances, never by a role change alone.
    pub voted_for: Option<NodeId>,
    /// Grants received while Candidate, keyed by voter so duplicates
    /// cannot double-count.
    pub votes: HashSet<NodeId>,
    deadline: Duration,
    elapsed: Duration,
}

impl ElectionState {
    pub fn new<R: Rng>(rng: &mut R, timing: &TimingConfig) -> Self {
        Self {
            role: Role::Follower,
            term: 1,
            voted_for: None,
            votes: HashSet::new(),
            deadline: random_election_timeout(
                rng,
                timing.election_timeout_min_ms,
                timing.election_timeout_max_ms,
            ),
            elapsed: Duration::ZERO,
        }
    }

    /// Advance the local timer. Returns true when the deadline has passed;
    /// the caller decides what expiry means for the current role.
    pub fn tick(&mut self, dt: Duration) -> bool {
        self.elapsed += dt;
        self.elapsed >= self.deadline
    }

    /// Restart the current deadline without redrawing it (heartbeat seen).
    pub fn reset_timer(&mut self) {
        self.elapsed = Duration::ZERO;
    }

    /// Make the deadline fire on the next tick. Used when a stale leader's
    /// heartbeat should be answered with an immediate campaign or
    /// counter-heartbeat.
    pub fn expire_now(&mut self) {
        self.elapsed = self.deadline;
    }

    /// Adopt a newer term, clearing the vote. A no-op for older terms.
    pub fn observe_term(&mut self, term: u64) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
        }
    }

    pub fn become_follower<R: Rng>(&mut self, rng: &mut R, timing: &TimingConfig) {
        self.role = Role::Follower;
        self.votes.clear();
        self.deadline = random_election_timeout(
            rng,
            timing.election_timeout_min_ms,
            timing.election_timeout_max_ms,
        );
        self.elapsed = Duration::ZERO;
    }

    /// Start a campaign: advance the term, vote for self, re-arm the
    /// deadline with a fresh draw so a split vote re-elects.
    pub fn become_candidate<R: Rng>(&mut self, my_id: NodeId, rng: &mut R, timing: &TimingConfig) {
        self.role = Role::Candidate;
        self.term += 1;
        self.voted_for = Some(my_id);
        self.votes.clear();
        self.votes.insert(my_id);
        self.deadline = random_election_timeout(
            rng,
            timing.election_timeout_min_ms,
            timing.election_timeout_max_ms,
        );
        self.elapsed = Duration::ZERO;
    }

    /// Take leadership. The deadline becomes the heartbeat period, already
    /// expired so the first heartbeat goes out on the next tick boundary.
    pub fn become_leader(&mut self, timing: &TimingConfig) {
        self.role = Role::Leader;
        self.votes.clear();
        self.deadline = timing.heartbeat_interval();
        self.elapsed = self.deadline;
    }

    /// Record a vote grant. Only actionable while Candidate; returns the
    /// tally. Duplicate grants from the same voter are absorbed by the set.
    pub fn record_vote(&mut self, from: NodeId) -> usize {
        if self.role == Role::Candidate {
            self.votes.insert(from);
        }
        self.votes.len()
    }
}
