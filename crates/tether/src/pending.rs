//! Correlation table for in-flight remote requests.
//!
//! Every request the volume sends is remembered here under its sequence
//! number until the matching answer arrives, an error answer replaces it,
//! or the connection dies and the table is drained. Continuations are a
//! closed set so dispatch can match exhaustively and each shape carries
//! exactly the scratch state it needs.

use indexmap::IndexMap;
use tether_proto::{MsgKind, NodeType};
use tracing::warn;

use crate::fs::{LockId, Ticket};

#[derive(Debug)]
pub enum Continuation {
    /// An open in flight; `path` becomes the lock's canonical path.
    Open {
        ticket: Ticket,
        path: String,
        /// When set, an answer of any other node type fails the call and
        /// releases the just-opened server handle.
        require: Option<NodeType>,
    },
    /// A directory enumeration step.
    ExamineNext { ticket: Ticket, lock: LockId },
    /// A multi-round read. `dest` accumulates delivered bytes until it
    /// holds `want` of them or the server answers short; the entry is then
    /// retired, otherwise it is re-registered under a fresh sequence
    /// number.
    Read { ticket: Ticket, lock: LockId, dest: Vec<u8>, want: usize },
}

#[derive(Debug)]
pub struct PendingOp {
    pub expected: MsgKind,
    pub continuation: Continuation,
}

#[derive(Default)]
pub struct PendingOps {
    ops: IndexMap<u32, PendingOp>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self { ops: IndexMap::new() }
    }

    /// Inserts under a sequence number that must not be in use; a clash is
    /// rejected since sequence numbers are never reused while registered.
    pub fn register(&mut self, seq: u32, op: PendingOp) -> bool {
        if self.ops.contains_key(&seq) {
            warn!("pending operation {seq} already registered, dropping duplicate");
            return false;
        }
        self.ops.insert(seq, op);
        true
    }

    pub fn lookup(&self, seq: u32) -> Option<&PendingOp> {
        self.ops.get(&seq)
    }

    pub fn remove(&mut self, seq: u32) -> Option<PendingOp> {
        self.ops.shift_remove(&seq)
    }

    /// Empties the table in registration order; used to fail everything
    /// when the connection dies.
    pub fn drain(&mut self) -> impl Iterator<Item = (u32, PendingOp)> + use<> {
        std::mem::take(&mut self.ops).into_iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
