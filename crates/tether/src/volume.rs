//! Client-side virtual disk engine.
//!
//! The volume fronts the host platform's filesystem callbacks with the
//! remote protocol. Calls that can be answered from cached lock state
//! complete synchronously and return `Result`; calls that need the server
//! register a pending operation keyed by the request's sequence number and
//! complete later through [`VolumeHost`], when the answer arrives or the
//! connection dies.

use std::collections::HashMap;

use tether_net::HandlerError;
use tether_proto::{HANDLE_ROOT, Message, MsgKind, NodeType, OpenMode};
use tracing::{debug, warn};

use crate::{
    MessageSink,
    fs::{FileInfo, FsError, LockId, Ticket, VolumeInfo, Whence},
    pending::{Continuation, PendingOp, PendingOps},
};

/// Per-handle read-ahead buffer size. Read requests always ask for at
/// least this much so trailing small reads can be served locally.
pub const READ_AHEAD_SIZE: usize = 1024;

/// Completion of a remote call, delivered through [`VolumeHost`].
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    Open(Result<LockId, FsError>),
    Read(Result<Vec<u8>, FsError>),
    /// `Ok(None)` is the end of the directory.
    NextEntry(Result<Option<FileInfo>, FsError>),
}

/// Receives completions for remote calls. Implemented by the platform
/// filesystem integration sitting above the volume.
pub trait VolumeHost {
    fn complete(&mut self, ticket: Ticket, completion: Completion);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    File,
    Directory,
    /// The device root; resolved locally, never sent to the server.
    Device,
}

#[derive(Debug, Default)]
struct ReadAhead {
    start: u32,
    data: Vec<u8>,
}

impl ReadAhead {
    /// Offset into the window and byte count servable at `offset`, if the
    /// window overlaps it.
    fn overlap(&self, offset: u32, want: u32) -> Option<(usize, usize)> {
        let lo = self.start;
        let hi = self.start + self.data.len() as u32;
        if offset < lo || hi <= offset {
            return None;
        }
        let avail = hi - offset;
        Some(((offset - lo) as usize, avail.min(want) as usize))
    }
}

#[derive(Debug)]
pub struct Lock {
    handle_id: u32,
    kind: LockKind,
    path: String,
    offset: u32,
    size: u32,
    enum_in_progress: bool,
    read_ahead: ReadAhead,
}

impl Lock {
    pub fn handle_id(&self) -> u32 {
        self.handle_id
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Canonical server-relative path, forward-slash separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

pub struct Volume {
    device_name: String,
    seq: u32,
    next_lock: u32,
    locks: HashMap<u32, Lock>,
    pending: PendingOps,
}

impl Volume {
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            seq: 0,
            next_lock: 0,
            locks: HashMap::new(),
            pending: PendingOps::new(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn lock(&self, id: LockId) -> Option<&Lock> {
        self.locks.get(&id.0)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Sequence number for a request the embedder sends on this volume's
    /// connection, such as the launch-completion notification.
    pub fn allocate_seq(&mut self) -> u32 {
        self.next_seq()
    }

    fn insert_lock(&mut self, lock: Lock) -> LockId {
        let id = self.next_lock;
        self.next_lock = self.next_lock.wrapping_add(1);
        self.locks.insert(id, lock);
        LockId(id)
    }

    /// A fresh lock on the device root, resolved without a round-trip.
    pub fn alloc_root_lock(&mut self) -> LockId {
        self.insert_lock(Lock {
            handle_id: HANDLE_ROOT,
            kind: LockKind::Device,
            path: self.device_name.clone(),
            offset: 0,
            size: 0,
            enum_in_progress: false,
            read_ahead: ReadAhead::default(),
        })
    }

    /// Computes the server path for `name` looked up against `parent`.
    /// A name containing ':' is absolute: everything up to and including
    /// the colon is dropped and the lookup becomes root-relative.
    fn normalize(&self, parent: Option<LockId>, name: &str) -> Result<String, FsError> {
        let parent_lock = match parent {
            Some(id) => Some(self.locks.get(&id.0).ok_or(FsError::InvalidLock)?),
            None => None,
        };
        let (stripped, root_relative) = match name.find(':') {
            Some(pos) => (&name[pos + 1..], true),
            None => (name, false),
        };
        let base = if root_relative {
            None
        } else {
            parent_lock.filter(|l| l.kind != LockKind::Device)
        };
        Ok(match base {
            Some(lock) => {
                debug!("normalize: path '{stripped}' relative to parent '{}'", lock.path);
                format!("{}/{stripped}", lock.path)
            }
            None => stripped.to_string(),
        })
    }

    /// Opens `name` relative to `parent` on the server. An empty
    /// normalised path names the device root and completes without a
    /// round-trip. When `require` is set, an answer of any other node type
    /// fails the call and releases the just-opened server handle.
    pub fn open(
        &mut self,
        link: &mut dyn MessageSink,
        host: &mut dyn VolumeHost,
        ticket: Ticket,
        parent: Option<LockId>,
        name: &str,
        mode: OpenMode,
        require: Option<NodeType>,
    ) {
        let path = match self.normalize(parent, name) {
            Ok(path) => path,
            Err(e) => {
                host.complete(ticket, Completion::Open(Err(e)));
                return;
            }
        };
        debug!("open \"{name}\" -> \"{path}\"");

        if path.is_empty() {
            let id = self.alloc_root_lock();
            host.complete(ticket, Completion::Open(Ok(id)));
            return;
        }

        let seq = self.next_seq();
        self.pending.register(
            seq,
            PendingOp {
                expected: MsgKind::OpenHandleAnswer,
                continuation: Continuation::Open { ticket, path: path.clone(), require },
            },
        );
        link.transmit(&Message::OpenHandleRequest { sequence_num: seq, path, mode });
    }

    /// Reads `len` bytes at the lock's current offset. Overlap with the
    /// read-ahead window is served locally; anything further becomes a
    /// chain of server reads that always ask for at least a full window so
    /// trailing small reads stay local.
    pub fn read(
        &mut self,
        link: &mut dyn MessageSink,
        host: &mut dyn VolumeHost,
        ticket: Ticket,
        lock_id: LockId,
        len: u32,
    ) {
        let Some(lock) = self.locks.get_mut(&lock_id.0) else {
            host.complete(ticket, Completion::Read(Err(FsError::InvalidLock)));
            return;
        };
        debug!("read \"{}\", {len} bytes at {}", lock.path, lock.offset);

        let mut dest = Vec::with_capacity(len as usize);
        let mut remaining = len;
        if let Some((window_offset, count)) = lock.read_ahead.overlap(lock.offset, remaining) {
            dest.extend_from_slice(&lock.read_ahead.data[window_offset..window_offset + count]);
            lock.offset += count as u32;
            remaining -= count as u32;
            if remaining == 0 {
                debug!("served {count} bytes from the read-ahead window");
                host.complete(ticket, Completion::Read(Ok(dest)));
                return;
            }
        }

        let handle = lock.handle_id;
        let offset = lock.offset;
        let seq = self.next_seq();
        self.pending.register(
            seq,
            PendingOp {
                expected: MsgKind::ReadFileAnswer,
                continuation: Continuation::Read { ticket, lock: lock_id, dest, want: len as usize },
            },
        );
        link.transmit(&Message::ReadFileRequest {
            sequence_num: seq,
            handle,
            offset_hi: 0,
            offset_lo: offset,
            length: remaining.max(READ_AHEAD_SIZE as u32),
        });
    }

    /// Steps a directory enumeration. The resume token lives entirely on
    /// the server; the first step of an iteration sets the reset flag.
    pub fn examine_next(
        &mut self,
        link: &mut dyn MessageSink,
        host: &mut dyn VolumeHost,
        ticket: Ticket,
        lock_id: LockId,
    ) {
        let (handle, reset) = {
            let Some(lock) = self.locks.get_mut(&lock_id.0) else {
                host.complete(ticket, Completion::NextEntry(Err(FsError::InvalidLock)));
                return;
            };
            let reset = !lock.enum_in_progress;
            lock.enum_in_progress = true;
            (lock.handle_id, reset)
        };

        let seq = self.next_seq();
        self.pending.register(
            seq,
            PendingOp {
                expected: MsgKind::FindNextFileAnswer,
                continuation: Continuation::ExamineNext { ticket, lock: lock_id },
            },
        );
        link.transmit(&Message::FindNextFileRequest { sequence_num: seq, handle, reset });
    }

    /// Examines a lock from its cached state; no round-trip.
    pub fn examine(&self, lock_id: LockId) -> Result<FileInfo, FsError> {
        let lock = self.locks.get(&lock_id.0).ok_or(FsError::InvalidLock)?;
        Ok(match lock.kind {
            LockKind::Device => FileInfo {
                name: self.device_name.clone(),
                node_type: NodeType::Directory,
                size: 0,
            },
            LockKind::Directory => FileInfo {
                name: lock.path.clone(),
                node_type: NodeType::Directory,
                size: lock.size,
            },
            LockKind::File => FileInfo {
                name: lock.path.clone(),
                node_type: NodeType::File,
                size: lock.size,
            },
        })
    }

    /// Moves the virtual file position and returns the previous one. The
    /// offset is clamped to the cached file size.
    pub fn seek(&mut self, lock_id: LockId, amount: i32, whence: Whence) -> Result<u32, FsError> {
        let lock = self.locks.get_mut(&lock_id.0).ok_or(FsError::InvalidLock)?;
        debug!("seek \"{}\", {amount} bytes rel {whence:?}", lock.path);
        let old = lock.offset;
        let new = match whence {
            Whence::Start => amount as u32,
            Whence::Current => lock.offset.wrapping_add_signed(amount),
            Whence::End => lock.size.wrapping_add_signed(amount),
        };
        lock.offset = if new > lock.size { lock.size } else { new };
        Ok(old)
    }

    /// Releases a lock. The server handle is ownership-released with a
    /// fire-and-forget close: no answer is awaited, so rapid open/close
    /// churn can outrun the server's slot recycling.
    pub fn unlock(&mut self, link: &mut dyn MessageSink, lock_id: LockId) -> Result<(), FsError> {
        let lock = self.locks.remove(&lock_id.0).ok_or(FsError::NotFound)?;
        if lock.kind != LockKind::Device {
            debug!("transmitting close request for handle {}", lock.handle_id);
            let seq = self.next_seq();
            link.transmit(&Message::CloseHandleRequest {
                sequence_num: seq,
                handle: lock.handle_id,
            });
        }
        Ok(())
    }

    /// A second lock on the same object; fully local.
    pub fn duplicate(&mut self, lock_id: LockId) -> Result<LockId, FsError> {
        let src = self.locks.get(&lock_id.0).ok_or(FsError::InvalidLock)?;
        if src.kind == LockKind::Device {
            return Ok(self.alloc_root_lock());
        }
        let copy = Lock {
            handle_id: src.handle_id,
            kind: src.kind,
            path: src.path.clone(),
            offset: 0,
            size: src.size,
            enum_in_progress: false,
            read_ahead: ReadAhead::default(),
        };
        Ok(self.insert_lock(copy))
    }

    /// The parent directory, derived by dropping the last path component.
    /// A file sitting in the root gets a root lock; anything deeper gets a
    /// directory lock under the pseudo-root handle with no server lookup.
    pub fn parent(&mut self, lock_id: LockId) -> Result<LockId, FsError> {
        let src = self.locks.get(&lock_id.0).ok_or(FsError::InvalidLock)?;
        if src.kind == LockKind::Device {
            return Err(FsError::NotFound);
        }
        let path = src.path.clone();
        match path.rfind('/') {
            Some(pos) if pos > 0 => {
                debug!("parent lock from '{path}' to '{}'", &path[..pos]);
                let parent = Lock {
                    handle_id: HANDLE_ROOT,
                    kind: LockKind::Directory,
                    path: path[..pos].to_string(),
                    offset: 0,
                    size: 0,
                    enum_in_progress: false,
                    read_ahead: ReadAhead::default(),
                };
                Ok(self.insert_lock(parent))
            }
            _ => {
                debug!("returning root lock as parent of '{path}'");
                Ok(self.alloc_root_lock())
            }
        }
    }

    /// Volume statistics; only the device root carries them.
    pub fn info(&self, lock_id: LockId) -> Result<VolumeInfo, FsError> {
        let lock = self.locks.get(&lock_id.0).ok_or(FsError::InvalidLock)?;
        if lock.kind == LockKind::Device {
            Ok(VolumeInfo::default())
        } else {
            Err(FsError::NotFound)
        }
    }

    pub fn disk_info(&self) -> VolumeInfo {
        VolumeInfo::default()
    }

    /// Answer dispatch. Unmatched answers are dropped (the server may
    /// answer a request the client has already given up on); a matched
    /// answer of the wrong kind poisons the connection.
    pub fn on_network_message(
        &mut self,
        link: &mut dyn MessageSink,
        host: &mut dyn VolumeHost,
        msg: Message,
    ) -> Result<(), HandlerError> {
        let kind = msg.kind();
        let Some(reply_to) = msg.in_reply_to() else {
            warn!("unexpected {kind} on the virtual disk channel");
            return Ok(());
        };
        let Some(op) = self.pending.remove(reply_to) else {
            warn!("no pending operation for {kind} in reply to #{reply_to}");
            return Ok(());
        };

        if kind == op.expected {
            self.complete(link, host, op.continuation, msg);
            Ok(())
        } else if let Message::ErrorAnswer { error, .. } = msg {
            fail(host, op.continuation, FsError::from_net(error));
            Ok(())
        } else {
            warn!(
                "mismatched answer for sequence #{reply_to}: got {kind} but expected {}",
                op.expected
            );
            fail(host, op.continuation, FsError::DeviceNotMounted);
            Err(HandlerError)
        }
    }

    /// Connection death: every in-flight call completes with a transport
    /// failure and the table empties.
    pub fn fail_all_pending(&mut self, host: &mut dyn VolumeHost) {
        for (seq, op) in self.pending.drain() {
            debug!("failing pending operation #{seq}");
            fail(host, op.continuation, FsError::DeviceNotMounted);
        }
    }

    fn complete(
        &mut self,
        link: &mut dyn MessageSink,
        host: &mut dyn VolumeHost,
        continuation: Continuation,
        msg: Message,
    ) {
        match (continuation, msg) {
            (
                Continuation::Open { ticket, path, require },
                Message::OpenHandleAnswer { handle, node_type, size, .. },
            ) => {
                if let Some(required) = require
                    && node_type != required
                {
                    let seq = self.next_seq();
                    link.transmit(&Message::CloseHandleRequest { sequence_num: seq, handle });
                    host.complete(ticket, Completion::Open(Err(FsError::WrongType)));
                    return;
                }
                let kind = match node_type {
                    NodeType::File => LockKind::File,
                    NodeType::Directory => LockKind::Directory,
                };
                let id = self.insert_lock(Lock {
                    handle_id: handle,
                    kind,
                    path,
                    offset: 0,
                    size,
                    enum_in_progress: false,
                    read_ahead: ReadAhead::default(),
                });
                host.complete(ticket, Completion::Open(Ok(id)));
            }
            (
                Continuation::ExamineNext { ticket, lock },
                Message::FindNextFileAnswer { end_of_sequence, node_type, size, name, .. },
            ) => {
                if end_of_sequence {
                    if let Some(l) = self.locks.get_mut(&lock.0) {
                        l.enum_in_progress = false;
                    }
                    host.complete(ticket, Completion::NextEntry(Ok(None)));
                } else {
                    host.complete(
                        ticket,
                        Completion::NextEntry(Ok(Some(FileInfo { name, node_type, size }))),
                    );
                }
            }
            (
                Continuation::Read { ticket, lock, dest, want },
                Message::ReadFileAnswer { data, .. },
            ) => {
                self.complete_read(link, host, ticket, lock, dest, want, &data);
            }
            (continuation, msg) => {
                warn!("{} does not fit pending {continuation:?}", msg.kind());
            }
        }
    }

    /// One round of a multi-round read. A satisfied caller or a short
    /// answer retires the operation and turns the leftover bytes into the
    /// read-ahead window; otherwise the operation is re-registered under a
    /// fresh sequence number and another request goes out.
    fn complete_read(
        &mut self,
        link: &mut dyn MessageSink,
        host: &mut dyn VolumeHost,
        ticket: Ticket,
        lock_id: LockId,
        mut dest: Vec<u8>,
        want: usize,
        data: &[u8],
    ) {
        let Some(lock) = self.locks.get_mut(&lock_id.0) else {
            host.complete(ticket, Completion::Read(Err(FsError::InvalidLock)));
            return;
        };

        // The answer can be much larger than the caller asked for: a one
        // byte read still requests a whole window.
        let amount_read = data.len();
        let amount_left = want - dest.len();
        let slice_amount = amount_left.min(amount_read);
        dest.extend_from_slice(&data[..slice_amount]);
        lock.offset += slice_amount as u32;

        if dest.len() == want || amount_read == 0 {
            // Leftover answer bytes become the window at the new offset.
            // The window length is amount_read - slice_amount, unclamped;
            // in the short-answer path the bytes come from this same
            // answer, which keeps it within one request's worth.
            lock.read_ahead.start = lock.offset;
            lock.read_ahead.data.clear();
            lock.read_ahead.data.extend_from_slice(&data[slice_amount..]);
            debug!(
                "buffered {} bytes from offset {}",
                lock.read_ahead.data.len(),
                lock.read_ahead.start
            );
            host.complete(ticket, Completion::Read(Ok(dest)));
        } else {
            let handle = lock.handle_id;
            let offset = lock.offset;
            let remaining = (want - dest.len()) as u32;
            let seq = self.next_seq();
            self.pending.register(
                seq,
                PendingOp {
                    expected: MsgKind::ReadFileAnswer,
                    continuation: Continuation::Read { ticket, lock: lock_id, dest, want },
                },
            );
            link.transmit(&Message::ReadFileRequest {
                sequence_num: seq,
                handle,
                offset_hi: 0,
                offset_lo: offset,
                length: remaining.max(READ_AHEAD_SIZE as u32),
            });
        }
    }
}

fn fail(host: &mut dyn VolumeHost, continuation: Continuation, error: FsError) {
    match continuation {
        Continuation::Open { ticket, .. } => {
            host.complete(ticket, Completion::Open(Err(error)));
        }
        Continuation::ExamineNext { ticket, .. } => {
            host.complete(ticket, Completion::NextEntry(Err(error)));
        }
        Continuation::Read { ticket, .. } => {
            host.complete(ticket, Completion::Read(Err(error)));
        }
    }
}
