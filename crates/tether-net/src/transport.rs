//! Non-blocking framing transport.
//!
//! The transport owns one inbound reassembly buffer and a FIFO of pooled
//! outbound frame buffers. It never blocks: reads and writes are driven by
//! external readiness signals and bail out on `WouldBlock`. Frame
//! boundaries are found by peeking the length prefix; complete frames are
//! handed to a caller-supplied delivery closure.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
};

use bitflags::bitflags;
use tether_proto::DecodeError;
use tracing::{debug, warn};

use crate::buffer::{FrameBuf, MAX_POOLED_BUFFERS, RecvBuffer};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransportStatus: u8 {
        const NEED_OUTPUT  = 1 << 0;
        const DISCONNECTED = 1 << 1;
        const ERROR        = 1 << 2;
    }
}

/// Result of peeking the head of the inbound window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peek {
    /// Not enough bytes to tell the frame length yet.
    NeedMore,
    /// The head bytes can never start a frame.
    Garbage,
    /// Full length of the frame at the head of the window.
    Frame(usize),
}

/// Finds frame boundaries in the raw inbound stream.
pub trait FrameFormat {
    fn peek(&self, window: &[u8]) -> Peek;
}

/// Default wire framing: bytes 2-3, big-endian, give the full frame length.
/// Absurdly small declared lengths are still handed up so the decoder can
/// reject them and fail the connection.
pub struct WireFormat;

impl FrameFormat for WireFormat {
    fn peek(&self, window: &[u8]) -> Peek {
        if window.len() < 4 {
            return Peek::NeedMore;
        }
        Peek::Frame(u16::from_be_bytes([window[2], window[3]]) as usize)
    }
}

pub struct Transport {
    inbuf: RecvBuffer,
    out_queue: VecDeque<FrameBuf>,
    free_bufs: Vec<FrameBuf>,
    error: bool,
    disconnect: bool,
}

impl Transport {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inbuf: RecvBuffer::new(buffer_size),
            out_queue: VecDeque::new(),
            free_bufs: Vec::new(),
            error: false,
            disconnect: false,
        }
    }

    pub fn has_output(&self) -> bool {
        !self.out_queue.is_empty()
    }

    /// Readable readiness: appends whatever the source can give right now.
    /// A zero-byte read is an orderly close. Returns the bytes taken so the
    /// caller can keep alternating reads and drains until the source is dry
    /// (readiness is edge-style; stopping early would lose the wakeup).
    pub fn on_input_available<R: Read>(&mut self, src: &mut R) -> usize {
        let space = self.inbuf.free_space();
        if space.is_empty() {
            return 0;
        }
        match src.read(space) {
            Ok(0) => {
                self.disconnect = true;
                0
            }
            Ok(n) => {
                debug!(target: "net", bytes = n, "read");
                self.inbuf.advance_write(n);
                n
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                debug!(target: "net", error = %e, "read failed");
                self.error = true;
                0
            }
        }
    }

    /// Writable readiness: sends from the head of the queue until the sink
    /// blocks or the queue empties. Spent buffers return to the free list.
    pub fn on_output_possible<W: Write>(&mut self, dst: &mut W) {
        while let Some(front) = self.out_queue.front_mut() {
            match dst.write(front.unsent()) {
                Ok(0) => break,
                Ok(n) => {
                    debug!(target: "net", bytes = n, "wrote");
                    front.advance(n);
                    if front.is_spent()
                        && let Some(spent) = self.out_queue.pop_front()
                    {
                        self.recycle(spent);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(target: "net", error = %e, "write failed");
                    self.error = true;
                    break;
                }
            }
        }
    }

    /// Takes a frame buffer from the free list, or a fresh one.
    pub fn alloc_buffer(&mut self) -> FrameBuf {
        self.free_bufs.pop().map_or_else(FrameBuf::new, |mut buf| {
            buf.reset();
            buf
        })
    }

    /// Queues an encoded frame for transmission.
    pub fn submit(&mut self, buf: FrameBuf) {
        self.out_queue.push_back(buf);
    }

    pub fn recycle(&mut self, buf: FrameBuf) {
        if self.free_bufs.len() < MAX_POOLED_BUFFERS {
            self.free_bufs.push(buf);
        }
    }

    /// Delivers every complete frame in the inbound window, then compacts.
    ///
    /// A frame whose declared length exceeds the buffer capacity can never
    /// be received and fails the transport. A delivery rejection does the
    /// same. Both failure bits are sticky.
    pub fn drain_frames<F, D>(&mut self, format: &F, mut deliver: D) -> TransportStatus
    where
        F: FrameFormat,
        D: FnMut(&[u8]) -> Result<(), DecodeError>,
    {
        if self.error {
            return TransportStatus::ERROR;
        }
        if self.disconnect {
            return TransportStatus::DISCONNECTED;
        }

        loop {
            let window = self.inbuf.window();
            if window.is_empty() {
                break;
            }
            let frame_len = match format.peek(window) {
                Peek::NeedMore => break,
                Peek::Garbage => {
                    self.error = true;
                    return TransportStatus::ERROR;
                }
                Peek::Frame(len) => len,
            };
            if frame_len > self.inbuf.capacity() {
                warn!("frame of {frame_len} bytes will never fit the inbound buffer");
                self.error = true;
                return TransportStatus::ERROR;
            }
            if window.len() < frame_len {
                break;
            }
            if let Err(e) = deliver(&window[..frame_len]) {
                warn!("failed to decode incoming frame: {e}");
                self.error = true;
                return TransportStatus::ERROR;
            }
            self.inbuf.consume(frame_len);
        }

        self.inbuf.compact();

        if self.has_output() {
            TransportStatus::NEED_OUTPUT
        } else {
            TransportStatus::empty()
        }
    }
}
