//! Node role dispatch.
//!
//! A node's role is fixed at construction: IDs below `master_count` are
//! masters, the rest are workers. All simulation-facing behavior funnels
//! through the same `tick`/`handle_message`/`take_outbox` surface.

use std::time::Duration;

use crate::master::MasterNode;
use crate::message::Envelope;
use crate::worker::WorkerAgent;
use crate::NodeId;

pub enum Node {
    Master(MasterNode),
    Worker(WorkerAgent),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Master(m) => m.id,
            Node::Worker(w) => w.id,
        }
    }

    pub fn tick(&mut self, dt: Duration) {
        match self {
            Node::Master(m) => m.tick(dt),
            Node::Worker(w) => w.tick(dt),
        }
    }

    pub fn handle_message(&mut self, envelope: Envelope) {
        match self {
            Node::Master(m) => m.handle_message(envelope),
            Node::Worker(w) => w.handle_message(envelope),
        }
    }

    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        match self {
            Node::Master(m) => m.take_outbox(),
            Node::Worker(w) => w.take_outbox(),
        }
    }

    pub fn as_master(&self) -> Option<&MasterNode> {
        match self {
            Node::Master(m) => Some(m),
            Node::Worker(_) => None,
        }
    }

    pub fn as_master_mut(&mut self) -> Option<&mut MasterNode> {
        match self {
            Node::Master(m) => Some(m),
            Node::Worker(_) => None,
        }
    }

    pub fn as_worker(&self) -> Option<&WorkerAgent> {
        match self {
            Node::Worker(w) => Some(w),
            Node::Master(_) => None,
        }
    }
}
