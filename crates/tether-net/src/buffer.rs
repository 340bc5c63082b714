//! Transport buffer primitives.
//!
//! `RecvBuffer` is the inbound reassembly area: a fixed region with a
//! `[read_pos, write_pos)` in-flight window that is compacted back to the
//! base after every drain. `FrameBuf` holds one fully encoded outbound
//! frame and remembers how much of it has reached the socket.

/// Inbound reassembly buffer capacity. Frames larger than this can never
/// be received.
pub const RECV_BUFFER_SIZE: usize = 32 * 1024;

/// Outbound frame buffers are allocated at this size; one encoded frame per
/// buffer.
pub const FRAME_BUFFER_SIZE: usize = 8 * 1024;

/// At most this many spent frame buffers are kept on the per-peer free
/// list; the rest are dropped.
pub const MAX_POOLED_BUFFERS: usize = 4;

pub struct RecvBuffer {
    buf: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { buf: vec![0; capacity].into_boxed_slice(), read_pos: 0, write_pos: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes received but not yet consumed.
    pub fn window(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// Free tail the next socket read may fill.
    pub fn free_space(&mut self) -> &mut [u8] {
        &mut self.buf[self.write_pos..]
    }

    pub fn advance_write(&mut self, n: usize) {
        debug_assert!(self.write_pos + n <= self.buf.len());
        self.write_pos += n;
    }

    pub fn consume(&mut self, n: usize) {
        debug_assert!(self.read_pos + n <= self.write_pos);
        self.read_pos += n;
    }

    /// Moves the residual window back to the base of the buffer.
    pub fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let len = self.write_pos - self.read_pos;
        if len > 0 {
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
        }
        self.read_pos = 0;
        self.write_pos = len;
    }
}

pub struct FrameBuf {
    buf: Vec<u8>,
    sent: usize,
}

impl FrameBuf {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(FRAME_BUFFER_SIZE), sent: 0 }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.sent = 0;
    }

    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encoded bytes still waiting to be written.
    pub fn unsent(&self) -> &[u8] {
        &self.buf[self.sent..]
    }

    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.sent + n <= self.buf.len());
        self.sent += n;
    }

    pub fn is_spent(&self) -> bool {
        self.sent == self.buf.len()
    }
}

impl Default for FrameBuf {
    fn default() -> Self {
        Self::new()
    }
}
