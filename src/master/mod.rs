//! Master node: leader election plus the replicated task ledger.
//!
//! Every master runs the same code; only the current leader assigns tasks
//! and answers file requests, while all masters passively absorb completion
//! state from heartbeats and worker reports. Convergence is purely
//! message-driven, there is no shared state between masters.

pub mod election;
pub mod ledger;
pub mod timer;

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::artifact::{intermediate_name, output_name, Artifact, ArtifactStore};
use crate::bitmap::TaskBitmap;
use crate::config::{ClusterConfig, TimingConfig};
use crate::message::{progress_to_wire, Envelope, FileRequest, FileToken, Message, TaskPhase};
use crate::NodeId;

pub use election::{ElectionState, Role};
pub use ledger::{TaskLedger, TaskRecord};

pub struct MasterNode {
    pub id: NodeId,
    config: ClusterConfig,
    timing: TimingConfig,
    pub election: ElectionState,
    pub ledger: TaskLedger,
    pub store: ArtifactStore,
    rng: SmallRng,
    outbox: Vec<Envelope>,
}

impl MasterNode {
    /// A fresh follower with no job state. It learns the job exists from
    /// the first initialized heartbeat it hears.
    pub fn new(id: NodeId, config: ClusterConfig, timing: TimingConfig, seed: u64) -> Self {
        Self::with_store(id, config, timing, seed, ArtifactStore::new())
    }

    /// Rebuild a master around a surviving artifact store. Used for cold
    /// restarts: all volatile state (role, term, ledger) starts over, the
    /// store stands in for the node's disk.
    pub fn with_store(
        id: NodeId,
        config: ClusterConfig,
        timing: TimingConfig,
        seed: u64,
        store: ArtifactStore,
    ) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let election = ElectionState::new(&mut rng, &timing);
        Self {
            id,
            config,
            timing,
            election,
            ledger: TaskLedger::new(config.map_task_count, config.reduce_task_count),
            store,
            rng,
            outbox: Vec::new(),
        }
    }

    /// The initial leader: the master the job was submitted to. Holds the
    /// base inputs and starts tracking progress at zero.
    pub fn bootstrap_leader(
        id: NodeId,
        config: ClusterConfig,
        timing: TimingConfig,
        seed: u64,
        inputs: Vec<Artifact>,
    ) -> Self {
        let mut node = Self::new(id, config, timing, seed);
        let names: Vec<String> = inputs.iter().map(|a| a.name.clone()).collect();
        node.store.insert_all(inputs);
        node.ledger.install_inputs(names);
        node.election.become_leader(&node.timing);
        node
    }

    pub fn role(&self) -> Role {
        self.election.role
    }

    pub fn is_leader(&self) -> bool {
        self.election.role == Role::Leader
    }

    pub fn term(&self) -> u64 {
        self.election.term
    }

    pub fn completed(&self) -> Option<u32> {
        self.ledger.completed
    }

    /// Make the election deadline fire on the next tick. Test hook for
    /// deterministic elections.
    pub fn force_timeout(&mut self) {
        self.election.expire_now();
    }

    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    /// Advance all local timers by one tick of simulated time.
    pub fn tick(&mut self, dt: Duration) {
        self.ledger.tick(dt);
        if self.election.tick(dt) {
            match self.election.role {
                Role::Leader => {
                    self.election.reset_timer();
                    self.send_heartbeats();
                }
                Role::Follower | Role::Candidate => self.start_election(),
            }
        }
    }

    pub fn handle_message(&mut self, envelope: Envelope) {
        let Envelope {
            from,
            message,
            artifacts,
            ..
        } = envelope;

        // Artifacts ride along with any message and land on our disk
        // before the message itself is interpreted.
        let artifact_names: Vec<String> = artifacts.iter().map(|a| a.name.clone()).collect();
        self.store.insert_all(artifacts);

        match message {
            Message::Heartbeat {
                term,
                completed,
                map_bits,
                reduce_bits,
            } => self.on_heartbeat(from, term, completed, &map_bits, &reduce_bits),
            Message::RequestVote { term, completed } => {
                self.on_request_vote(from, term, completed)
            }
            Message::Voted { granted } => self.on_voted(from, granted),
            Message::TaskFinished { finished } => self.on_task_finished(from, finished),
            Message::RequestFiles(request) => self.on_request_files(from, request),
            Message::StartingFiles => self.on_starting_files(artifact_names),
            Message::FileTransfer => {
                // Bundle already absorbed; see if it satisfies the recount.
                self.recount_and_request();
            }
            Message::GiveTask { .. } | Message::Wait | Message::Exit => {
                tracing::debug!(
                    node_id = self.id,
                    from,
                    kind = message.kind(),
                    "Ignoring worker-directed message"
                );
            }
        }
    }

    // === Election ===

    fn start_election(&mut self) {
        self.election
            .become_candidate(self.id, &mut self.rng, &self.timing);
        tracing::info!(
            node_id = self.id,
            term = self.election.term,
            "Election timeout, starting election"
        );

        let request = Message::RequestVote {
            term: self.election.term,
            completed: self.ledger.completed,
        };
        self.broadcast_masters(request);

        // A single-master cluster wins on its own vote.
        if self.election.votes.len() >= self.config.majority() {
            self.become_leader();
        }
    }

    fn become_leader(&mut self) {
        self.election.become_leader(&self.timing);
        tracing::info!(
            node_id = self.id,
            term = self.election.term,
            completed = progress_to_wire(self.ledger.completed),
            "Became leader"
        );
        self.election.reset_timer();
        self.send_heartbeats();
    }

    fn step_down(&mut self) {
        tracing::info!(
            node_id = self.id,
            term = self.election.term,
            "Stepping down to follower"
        );
        self.election.become_follower(&mut self.rng, &self.timing);
    }

    fn on_heartbeat(
        &mut self,
        from: NodeId,
        term: u64,
        completed: Option<u32>,
        map_bits: &TaskBitmap,
        reduce_bits: &TaskBitmap,
    ) {
        self.election.observe_term(term);
        let theirs = progress_to_wire(completed);
        let mine = progress_to_wire(self.ledger.completed);

        if self.election.role == Role::Leader {
            if theirs < mine {
                // The other leader is behind: reject their claim and
                // immediately remind them who has the fresher state.
                tracing::info!(
                    node_id = self.id,
                    from,
                    theirs,
                    mine,
                    "Heartbeat from stale leader, re-asserting"
                );
                self.election.reset_timer();
                self.send_heartbeats();
            } else {
                // At least as current as us: yield. On an exact tie both
                // sides yield and the next randomized election decides.
                self.step_down();
            }
            return;
        }

        if theirs < mine {
            // A leader that has lost progress relative to us is stale;
            // campaign at the next tick boundary instead of merging.
            tracing::info!(
                node_id = self.id,
                from,
                theirs,
                mine,
                "Heartbeat behind local progress, treating leader as stale"
            );
            self.election.expire_now();
            return;
        }

        if self.election.role == Role::Candidate {
            self.step_down();
        } else {
            self.election.reset_timer();
        }

        if mine < 0 {
            if theirs >= 0 {
                // The cluster has job state we lack; the bitmaps are
                // useless to us until we hold the base inputs.
                tracing::info!(node_id = self.id, from, "Requesting base input files");
                self.send(from, Message::RequestFiles(FileRequest::BaseInputs));
            }
            return;
        }

        self.ledger.merge_bitmaps(map_bits, reduce_bits);
        self.recount_and_request();
    }

    fn on_request_vote(&mut self, from: NodeId, term: u64, completed: Option<u32>) {
        if term < self.election.term {
            self.send(from, Message::Voted { granted: false });
            return;
        }
        self.election.observe_term(term);

        let theirs = progress_to_wire(completed);
        let mine = progress_to_wire(self.ledger.completed);

        let granted = theirs >= mine
            && (self.election.voted_for.is_none() || self.election.voted_for == Some(from));
        if granted {
            self.election.voted_for = Some(from);
            // Granting defers our own campaigning for a full fresh deadline.
            self.election.become_follower(&mut self.rng, &self.timing);
        }

        tracing::debug!(
            node_id = self.id,
            candidate = from,
            term,
            granted,
            "RequestVote response"
        );
        self.send(from, Message::Voted { granted });
    }

    fn on_voted(&mut self, from: NodeId, granted: bool) {
        if self.election.role != Role::Candidate || !granted {
            return;
        }
        let tally = self.election.record_vote(from);
        tracing::debug!(node_id = self.id, from, votes = tally, "Received vote");
        if tally >= self.config.majority() {
            self.become_leader();
        }
    }

    // === Task ledger ===

    fn on_task_finished(&mut self, from: NodeId, finished: Option<(TaskPhase, usize)>) {
        if let Some((phase, index)) = finished {
            self.ledger.mark_complete(phase, index);
        }
        self.recount_and_request();

        // Every master absorbs the completion; only the leader replies.
        if self.election.role != Role::Leader || !self.ledger.is_initialized() {
            return;
        }

        if !self.ledger.mapping_done() {
            self.assign_map_task(from);
        } else if !self.ledger.reducing_done() {
            self.assign_reduce_task(from);
        } else {
            tracing::info!(node_id = self.id, worker = from, "Job complete, retiring worker");
            self.send(from, Message::Exit);
        }
    }

    fn assign_map_task(&mut self, worker: NodeId) {
        let Some(index) = self.ledger.next_assignable(TaskPhase::Map) else {
            self.send(worker, Message::Wait);
            return;
        };
        // Hand out a task only with its input in hand; the recount path
        // has already asked around for anything missing.
        let input = self
            .ledger
            .map_input(index)
            .and_then(|name| self.store.get(name).cloned());
        let Some(input) = input else {
            self.send(worker, Message::Wait);
            return;
        };

        self.ledger
            .reserve(TaskPhase::Map, index, self.timing.task_timeout());
        tracing::debug!(node_id = self.id, worker, task = index, "Assigning map task");
        let name = input.name.clone();
        self.send_with(
            worker,
            Message::GiveTask {
                phase: TaskPhase::Map,
                index,
                input: Some(name),
            },
            vec![input],
        );
    }

    fn assign_reduce_task(&mut self, worker: NodeId) {
        let Some(index) = self.ledger.next_assignable(TaskPhase::Reduce) else {
            self.send(worker, Message::Wait);
            return;
        };

        // The reduce input is every map task's intermediate for this bucket.
        let mut bundle = Vec::with_capacity(self.ledger.map_count());
        for m in 0..self.ledger.map_count() {
            match self.store.get(&intermediate_name(index, m)) {
                Some(artifact) => bundle.push(artifact.clone()),
                None => {
                    self.send(worker, Message::Wait);
                    return;
                }
            }
        }

        self.ledger
            .reserve(TaskPhase::Reduce, index, self.timing.task_timeout());
        tracing::debug!(node_id = self.id, worker, task = index, "Assigning reduce task");
        self.send_with(
            worker,
            Message::GiveTask {
                phase: TaskPhase::Reduce,
                index,
                input: None,
            },
            bundle,
        );
    }

    /// Recompute the verified progress count and ask the cluster for any
    /// artifacts we consider complete but do not hold.
    fn recount_and_request(&mut self) {
        let needed = self.ledger.recount(&self.store);
        if !needed.is_empty() {
            tracing::debug!(
                node_id = self.id,
                missing = needed.len(),
                "Requesting missing task artifacts"
            );
            self.broadcast_masters(Message::RequestFiles(FileRequest::Tokens(needed)));
        }
    }

    // === File replication ===

    fn on_request_files(&mut self, from: NodeId, request: FileRequest) {
        // A non-leader cannot vouch for holding the authoritative files.
        if self.election.role != Role::Leader {
            tracing::debug!(node_id = self.id, from, "Dropping file request, not leader");
            return;
        }

        match request {
            FileRequest::BaseInputs => {
                if !self.ledger.is_initialized() {
                    return;
                }
                let inputs: Vec<Artifact> = self
                    .ledger
                    .map_inputs()
                    .filter_map(|name| self.store.get(name).cloned())
                    .collect();
                tracing::info!(node_id = self.id, to = from, "Sending base input files");
                self.send_with(from, Message::StartingFiles, inputs);
            }
            FileRequest::Tokens(tokens) => {
                let mut bundle = Vec::new();
                for token in &tokens {
                    match *token {
                        FileToken::Map(i) => {
                            for j in 0..self.ledger.reduce_count() {
                                match self.store.get(&intermediate_name(j, i)) {
                                    Some(artifact) => bundle.push(artifact.clone()),
                                    None => tracing::warn!(
                                        node_id = self.id,
                                        map_task = i,
                                        bucket = j,
                                        "Requested intermediate not held locally"
                                    ),
                                }
                            }
                        }
                        FileToken::Reduce(i) => match self.store.get(&output_name(i)) {
                            Some(artifact) => bundle.push(artifact.clone()),
                            None => tracing::warn!(
                                node_id = self.id,
                                reduce_task = i,
                                "Requested output not held locally"
                            ),
                        },
                    }
                }
                if !bundle.is_empty() {
                    tracing::debug!(
                        node_id = self.id,
                        to = from,
                        files = bundle.len(),
                        "Replicating task artifacts"
                    );
                    self.send_with(from, Message::FileTransfer, bundle);
                }
            }
        }
    }

    fn on_starting_files(&mut self, names: Vec<String>) {
        if self.ledger.install_inputs(names) {
            tracing::info!(node_id = self.id, "Received base inputs, joining job");
            self.recount_and_request();
        }
    }

    // === Outbox ===

    fn send_heartbeats(&mut self) {
        let heartbeat = Message::Heartbeat {
            term: self.election.term,
            completed: self.ledger.completed,
            map_bits: self.ledger.map_bitmap(),
            reduce_bits: self.ledger.reduce_bitmap(),
        };
        self.broadcast_masters(heartbeat);
    }

    fn send(&mut self, to: NodeId, message: Message) {
        self.outbox.push(Envelope::new(self.id, to, message));
    }

    fn send_with(&mut self, to: NodeId, message: Message, artifacts: Vec<Artifact>) {
        self.outbox
            .push(Envelope::new(self.id, to, message).with_artifacts(artifacts));
    }

    fn broadcast_masters(&mut self, message: Message) {
        for peer in self.config.master_ids() {
            if peer != self.id {
                self.outbox
                    .push(Envelope::new(self.id, peer, message.clone()));
            }
        }
    }
}
