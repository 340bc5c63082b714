//! Server request layer.
//!
//! Dispatches inbound file requests against a bounded handle table backed
//! by the host filesystem adapter, and writes the answers. The wire handle
//! id is the slot index; the pseudo-root and the virtual stdio handles are
//! resolved before any indexing and are never slotted.

use std::io::Write;

use tether_proto::{
    HANDLE_ROOT, HANDLE_VIRTUAL_INPUT, HANDLE_VIRTUAL_OUTPUT, Message, NetError, NodeType,
    OpenMode,
};
use tracing::{debug, warn};

use crate::{MessageSink, fs::FileInfo};

/// Max number of simultaneously open server handles.
pub const MAX_FILE_HANDLES: usize = 16;

/// Read answers carry at most this much data each.
pub const READ_CHUNK: usize = 4096;

pub enum HostNode<F, D> {
    File(F),
    Dir(D),
}

/// Maps server paths to native OS file APIs. Paths arrive server-relative
/// with forward slashes; the empty path is the serving root.
pub trait HostFs {
    type File: HostFile;
    type Dir: HostDir;

    fn open(
        &mut self,
        path: &str,
        mode: OpenMode,
    ) -> Result<HostNode<Self::File, Self::Dir>, NetError>;
}

pub trait HostFile {
    fn size(&self) -> u32;
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, NetError>;
}

pub trait HostDir {
    /// Restarts the iteration from the first entry.
    fn rewind(&mut self) -> Result<(), NetError>;
    /// `Ok(None)` at the end of the directory.
    fn next_entry(&mut self) -> Result<Option<FileInfo>, NetError>;
}

struct ServerHandle<F, D> {
    node: HostNode<F, D>,
    path: String,
}

pub struct FileServer<A: HostFs> {
    fs: A,
    handles: [Option<ServerHandle<A::File, A::Dir>>; MAX_FILE_HANDLES],
    /// Enumeration state for the pseudo-root, opened lazily.
    root_dir: Option<A::Dir>,
    /// Where virtual-stdout writes land.
    stdout: Box<dyn Write + Send>,
}

impl<A: HostFs> FileServer<A> {
    pub fn new(fs: A) -> Self {
        Self::with_stdout(fs, Box::new(std::io::stdout()))
    }

    pub fn with_stdout(fs: A, stdout: Box<dyn Write + Send>) -> Self {
        Self { fs, handles: std::array::from_fn(|_| None), root_dir: None, stdout }
    }

    pub fn open_handles(&self) -> usize {
        self.handles.iter().filter(|h| h.is_some()).count()
    }

    /// Dispatches one inbound request and writes its answer. Anything the
    /// file server does not understand is answered with `bad_request`.
    pub fn serve(&mut self, link: &mut dyn MessageSink, msg: &Message) {
        match msg {
            Message::OpenHandleRequest { sequence_num, path, mode } => {
                self.open_handle(link, *sequence_num, path, *mode);
            }
            Message::ReadFileRequest { sequence_num, handle, offset_lo, length, .. } => {
                self.read_file(link, *sequence_num, *handle, *offset_lo, *length);
            }
            Message::WriteFileRequest { sequence_num, handle, data } => {
                self.write_file(link, *sequence_num, *handle, data);
            }
            Message::CloseHandleRequest { sequence_num, handle } => {
                self.close_handle(link, *sequence_num, *handle);
            }
            Message::FindNextFileRequest { sequence_num, handle, reset } => {
                self.find_next(link, *sequence_num, *handle, *reset);
            }
            other => {
                warn!("file server can't handle '{}'", other.kind());
                let seq = other.sequence_num().or_else(|| other.in_reply_to()).unwrap_or(0);
                reply_error(link, seq, NetError::BadRequest);
            }
        }
    }

    fn open_handle(&mut self, link: &mut dyn MessageSink, seq: u32, path: &str, mode: OpenMode) {
        let Some(slot) = self.handles.iter().position(Option::is_none) else {
            reply_error(link, seq, NetError::TooManyFilesOpen);
            return;
        };
        match self.fs.open(path, mode) {
            Ok(node) => {
                let (node_type, size) = match &node {
                    HostNode::File(f) => (NodeType::File, f.size()),
                    HostNode::Dir(_) => (NodeType::Directory, 0),
                };
                self.handles[slot] = Some(ServerHandle { node, path: path.to_string() });
                link.transmit(&Message::OpenHandleAnswer {
                    in_reply_to: seq,
                    handle: slot as u32,
                    node_type,
                    size,
                });
            }
            Err(error) => reply_error(link, seq, error),
        }
    }

    fn read_file(&mut self, link: &mut dyn MessageSink, seq: u32, handle: u32, offset: u32, length: u32) {
        // The root and the virtual stdio handles have no readable bytes.
        if handle == HANDLE_ROOT ||
            handle == HANDLE_VIRTUAL_INPUT ||
            handle == HANDLE_VIRTUAL_OUTPUT
        {
            reply_error(link, seq, NetError::NotAFile);
            return;
        }
        let Some(entry) = self.slot_mut(handle) else {
            reply_error(link, seq, NetError::InvalidValue);
            return;
        };
        let HostNode::File(file) = &mut entry.node else {
            reply_error(link, seq, NetError::NotAFile);
            return;
        };

        let mut buf = vec![0u8; (length as usize).min(READ_CHUNK)];
        match file.read_at(offset, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                debug!("read {n} bytes at offset {offset} from {}", entry.path);
                link.transmit(&Message::ReadFileAnswer { in_reply_to: seq, data: buf });
            }
            Err(error) => reply_error(link, seq, error),
        }
    }

    fn write_file(&mut self, link: &mut dyn MessageSink, seq: u32, handle: u32, data: &[u8]) {
        debug!("write {} bytes against handle {handle}", data.len());

        if handle == HANDLE_VIRTUAL_OUTPUT {
            // The launched program's output; forward and flush right away.
            if self.stdout.write_all(data).and_then(|()| self.stdout.flush()).is_err() {
                warn!("couldn't forward virtual output");
            }
        } else {
            warn!("generic file write not implemented");
        }

        link.transmit(&Message::WriteFileAnswer { in_reply_to: seq });
    }

    fn close_handle(&mut self, link: &mut dyn MessageSink, seq: u32, handle: u32) {
        // The virtual stdio files and the root are never closed on remote
        // request; no answer is expected either way.
        if handle == HANDLE_VIRTUAL_INPUT ||
            handle == HANDLE_VIRTUAL_OUTPUT ||
            handle == HANDLE_ROOT
        {
            return;
        }
        if (handle as usize) < MAX_FILE_HANDLES {
            self.handles[handle as usize] = None;
        } else {
            reply_error(link, seq, NetError::InvalidValue);
        }
    }

    fn find_next(&mut self, link: &mut dyn MessageSink, seq: u32, handle: u32, reset: bool) {
        if handle == HANDLE_VIRTUAL_INPUT || handle == HANDLE_VIRTUAL_OUTPUT {
            reply_error(link, seq, NetError::NotADirectory);
            return;
        }

        if handle == HANDLE_ROOT {
            if self.root_dir.is_none() {
                match self.fs.open("", OpenMode::READ) {
                    Ok(HostNode::Dir(dir)) => self.root_dir = Some(dir),
                    Ok(HostNode::File(_)) => {
                        reply_error(link, seq, NetError::NotADirectory);
                        return;
                    }
                    Err(error) => {
                        reply_error(link, seq, error);
                        return;
                    }
                }
            } else if reset {
                if let Some(dir) = self.root_dir.as_mut()
                    && let Err(error) = dir.rewind()
                {
                    reply_error(link, seq, error);
                    return;
                }
            }
            if let Some(dir) = self.root_dir.as_mut() {
                step_dir(link, seq, dir);
            }
            return;
        }

        let Some(entry) = self.slot_mut(handle) else {
            reply_error(link, seq, NetError::InvalidValue);
            return;
        };
        let HostNode::Dir(dir) = &mut entry.node else {
            reply_error(link, seq, NetError::NotADirectory);
            return;
        };
        if reset && let Err(error) = dir.rewind() {
            reply_error(link, seq, error);
            return;
        }
        step_dir(link, seq, dir);
    }

    fn slot_mut(&mut self, handle: u32) -> Option<&mut ServerHandle<A::File, A::Dir>> {
        if (handle as usize) < MAX_FILE_HANDLES {
            self.handles[handle as usize].as_mut()
        } else {
            None
        }
    }
}

fn step_dir<D: HostDir>(link: &mut dyn MessageSink, seq: u32, dir: &mut D) {
    match dir.next_entry() {
        Ok(Some(entry)) => link.transmit(&Message::FindNextFileAnswer {
            in_reply_to: seq,
            end_of_sequence: false,
            node_type: entry.node_type,
            size: entry.size,
            name: entry.name,
        }),
        Ok(None) => link.transmit(&Message::FindNextFileAnswer {
            in_reply_to: seq,
            end_of_sequence: true,
            node_type: NodeType::Directory,
            size: 0,
            name: String::new(),
        }),
        Err(error) => reply_error(link, seq, error),
    }
}

fn reply_error(link: &mut dyn MessageSink, in_reply_to: u32, error: NetError) {
    link.transmit(&Message::ErrorAnswer { in_reply_to, error });
}
