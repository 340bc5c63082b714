#![allow(dead_code)]

use std::collections::VecDeque;

use tether::{Completion, LockId, MessageSink, Ticket, Volume, VolumeHost};
use tether_proto::{Message, NodeType, OpenMode};

/// Records outbound protocol messages for inspection.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: VecDeque<Message>,
}

impl MessageSink for RecordingSink {
    fn transmit(&mut self, msg: &Message) {
        self.sent.push_back(msg.clone());
    }
}

impl RecordingSink {
    pub fn pop(&mut self) -> Message {
        self.sent.pop_front().expect("expected an outbound message")
    }

    pub fn assert_quiet(&self) {
        assert!(self.sent.is_empty(), "unexpected outbound messages: {:?}", self.sent);
    }
}

/// Records completions in arrival order.
#[derive(Default)]
pub struct RecordingHost {
    pub completions: Vec<(Ticket, Completion)>,
}

impl VolumeHost for RecordingHost {
    fn complete(&mut self, ticket: Ticket, completion: Completion) {
        self.completions.push((ticket, completion));
    }
}

impl RecordingHost {
    pub fn pop(&mut self) -> (Ticket, Completion) {
        assert_eq!(self.completions.len(), 1, "expected exactly one completion");
        self.completions.remove(0)
    }
}

/// Opens a remote node and feeds the volume the server's answer.
pub fn open_lock(
    volume: &mut Volume,
    sink: &mut RecordingSink,
    host: &mut RecordingHost,
    path: &str,
    handle: u32,
    node_type: NodeType,
    size: u32,
) -> LockId {
    volume.open(sink, host, Ticket(0), None, path, OpenMode::READ, None);
    let Message::OpenHandleRequest { sequence_num, .. } = sink.pop() else {
        panic!("expected an open request");
    };
    volume
        .on_network_message(
            sink,
            host,
            Message::OpenHandleAnswer { in_reply_to: sequence_num, handle, node_type, size },
        )
        .unwrap();
    let (_, completion) = host.pop();
    match completion {
        Completion::Open(Ok(id)) => id,
        other => panic!("open failed: {other:?}"),
    }
}
