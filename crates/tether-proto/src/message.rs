//! Typed protocol messages and the frame codec.
//!
//! Every frame starts with a four byte header `{type, flags, length}` where
//! `length` is big-endian and covers the whole frame, header included.
//! Requests carry a `sequence_num`, answers echo it back as `in_reply_to`.

use bitflags::bitflags;

use crate::{
    error::{DecodeError, EncodeError, NetError},
    wire::{Reader, Writer},
};

pub const HEADER_SIZE: usize = 4;

/// Largest frame the codec will produce; bounded further by the transport
/// buffer on the receiving side.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

bitflags! {
    /// Header flag bits. Informational on receive; the type byte is
    /// authoritative.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const REQUEST = 1 << 0;
        const ERROR   = 1 << 1;
    }
}

bitflags! {
    /// Open mode bits for `open_handle_request`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenMode: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const CREATE = 1 << 2;
    }
}

/// What an open handle points at on the serving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    File = 1,
    Directory = 2,
}

impl NodeType {
    fn from_wire(v: u8) -> Result<Self, DecodeError> {
        match v {
            1 => Ok(Self::File),
            2 => Ok(Self::Directory),
            other => Err(DecodeError::BadNodeType(other)),
        }
    }
}

/// Field-less message discriminants, used for expected-answer bookkeeping
/// and log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum MsgKind {
    HandshakeRequest = 1,
    PingRequest = 2,
    PingAnswer = 3,
    ErrorAnswer = 4,
    OpenHandleRequest = 5,
    OpenHandleAnswer = 6,
    CloseHandleRequest = 7,
    ReadFileRequest = 8,
    ReadFileAnswer = 9,
    WriteFileRequest = 10,
    WriteFileAnswer = 11,
    FindNextFileRequest = 12,
    FindNextFileAnswer = 13,
    LaunchExecutableRequest = 14,
    LaunchExecutableAnswer = 15,
    ExecutableDoneRequest = 16,
}

impl MsgKind {
    fn from_wire(v: u8) -> Result<Self, DecodeError> {
        Ok(match v {
            1 => Self::HandshakeRequest,
            2 => Self::PingRequest,
            3 => Self::PingAnswer,
            4 => Self::ErrorAnswer,
            5 => Self::OpenHandleRequest,
            6 => Self::OpenHandleAnswer,
            7 => Self::CloseHandleRequest,
            8 => Self::ReadFileRequest,
            9 => Self::ReadFileAnswer,
            10 => Self::WriteFileRequest,
            11 => Self::WriteFileAnswer,
            12 => Self::FindNextFileRequest,
            13 => Self::FindNextFileAnswer,
            14 => Self::LaunchExecutableRequest,
            15 => Self::LaunchExecutableAnswer,
            16 => Self::ExecutableDoneRequest,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

/// Handshake body, sent by both sides at connection setup. The password
/// hash travels on the wire for compatibility but is never validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub sequence_num: u32,
    pub version_major: u32,
    pub version_minor: u32,
    pub platform_name: String,
    pub node_name: String,
    pub platform_version: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    HandshakeRequest(Handshake),
    PingRequest {
        sequence_num: u32,
    },
    PingAnswer {
        in_reply_to: u32,
    },
    ErrorAnswer {
        in_reply_to: u32,
        error: NetError,
    },
    OpenHandleRequest {
        sequence_num: u32,
        path: String,
        mode: OpenMode,
    },
    OpenHandleAnswer {
        in_reply_to: u32,
        handle: u32,
        node_type: NodeType,
        size: u32,
    },
    /// No answer is expected for this request.
    CloseHandleRequest {
        sequence_num: u32,
        handle: u32,
    },
    ReadFileRequest {
        sequence_num: u32,
        handle: u32,
        offset_hi: u32,
        offset_lo: u32,
        length: u32,
    },
    ReadFileAnswer {
        in_reply_to: u32,
        data: Vec<u8>,
    },
    WriteFileRequest {
        sequence_num: u32,
        handle: u32,
        data: Vec<u8>,
    },
    WriteFileAnswer {
        in_reply_to: u32,
    },
    FindNextFileRequest {
        sequence_num: u32,
        handle: u32,
        reset: bool,
    },
    FindNextFileAnswer {
        in_reply_to: u32,
        end_of_sequence: bool,
        node_type: NodeType,
        size: u32,
        name: String,
    },
    LaunchExecutableRequest {
        sequence_num: u32,
        path: String,
        arguments: String,
    },
    LaunchExecutableAnswer {
        in_reply_to: u32,
    },
    ExecutableDoneRequest {
        sequence_num: u32,
        result_code: u32,
    },
}

impl Message {
    pub fn kind(&self) -> MsgKind {
        match self {
            Self::HandshakeRequest(_) => MsgKind::HandshakeRequest,
            Self::PingRequest { .. } => MsgKind::PingRequest,
            Self::PingAnswer { .. } => MsgKind::PingAnswer,
            Self::ErrorAnswer { .. } => MsgKind::ErrorAnswer,
            Self::OpenHandleRequest { .. } => MsgKind::OpenHandleRequest,
            Self::OpenHandleAnswer { .. } => MsgKind::OpenHandleAnswer,
            Self::CloseHandleRequest { .. } => MsgKind::CloseHandleRequest,
            Self::ReadFileRequest { .. } => MsgKind::ReadFileRequest,
            Self::ReadFileAnswer { .. } => MsgKind::ReadFileAnswer,
            Self::WriteFileRequest { .. } => MsgKind::WriteFileRequest,
            Self::WriteFileAnswer { .. } => MsgKind::WriteFileAnswer,
            Self::FindNextFileRequest { .. } => MsgKind::FindNextFileRequest,
            Self::FindNextFileAnswer { .. } => MsgKind::FindNextFileAnswer,
            Self::LaunchExecutableRequest { .. } => MsgKind::LaunchExecutableRequest,
            Self::LaunchExecutableAnswer { .. } => MsgKind::LaunchExecutableAnswer,
            Self::ExecutableDoneRequest { .. } => MsgKind::ExecutableDoneRequest,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::HandshakeRequest(_) |
                Self::PingRequest { .. } |
                Self::OpenHandleRequest { .. } |
                Self::CloseHandleRequest { .. } |
                Self::ReadFileRequest { .. } |
                Self::WriteFileRequest { .. } |
                Self::FindNextFileRequest { .. } |
                Self::LaunchExecutableRequest { .. } |
                Self::ExecutableDoneRequest { .. }
        )
    }

    /// Sequence number of a request, `None` for answers.
    pub fn sequence_num(&self) -> Option<u32> {
        match self {
            Self::HandshakeRequest(h) => Some(h.sequence_num),
            Self::PingRequest { sequence_num } |
            Self::OpenHandleRequest { sequence_num, .. } |
            Self::CloseHandleRequest { sequence_num, .. } |
            Self::ReadFileRequest { sequence_num, .. } |
            Self::WriteFileRequest { sequence_num, .. } |
            Self::FindNextFileRequest { sequence_num, .. } |
            Self::LaunchExecutableRequest { sequence_num, .. } |
            Self::ExecutableDoneRequest { sequence_num, .. } => Some(*sequence_num),
            _ => None,
        }
    }

    /// Originating sequence number of an answer, `None` for requests.
    pub fn in_reply_to(&self) -> Option<u32> {
        match self {
            Self::PingAnswer { in_reply_to } |
            Self::ErrorAnswer { in_reply_to, .. } |
            Self::OpenHandleAnswer { in_reply_to, .. } |
            Self::ReadFileAnswer { in_reply_to, .. } |
            Self::WriteFileAnswer { in_reply_to } |
            Self::FindNextFileAnswer { in_reply_to, .. } |
            Self::LaunchExecutableAnswer { in_reply_to } => Some(*in_reply_to),
            _ => None,
        }
    }

    fn flags(&self) -> HeaderFlags {
        let mut flags = HeaderFlags::empty();
        if self.is_request() {
            flags |= HeaderFlags::REQUEST;
        }
        if matches!(self, Self::ErrorAnswer { .. }) {
            flags |= HeaderFlags::ERROR;
        }
        flags
    }

    /// Appends one complete frame to `out`. The length prefix is patched
    /// after the body is written and always equals the bytes produced.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let start = out.len();
        out.push(self.kind() as u8);
        out.push(self.flags().bits());
        out.extend_from_slice(&[0, 0]);

        let mut w = Writer::new(out);
        match self {
            Self::HandshakeRequest(h) => {
                w.u32(h.sequence_num);
                w.u32(h.version_major);
                w.u32(h.version_minor);
                w.string(&h.platform_name)?;
                w.string(&h.node_name)?;
                w.string(&h.platform_version)?;
                w.string(&h.password_hash)?;
            }
            Self::PingRequest { sequence_num } => w.u32(*sequence_num),
            Self::PingAnswer { in_reply_to } => w.u32(*in_reply_to),
            Self::ErrorAnswer { in_reply_to, error } => {
                w.u32(*in_reply_to);
                w.u32(error.to_wire());
            }
            Self::OpenHandleRequest { sequence_num, path, mode } => {
                w.u32(*sequence_num);
                w.string(path)?;
                w.u32(mode.bits());
            }
            Self::OpenHandleAnswer { in_reply_to, handle, node_type, size } => {
                w.u32(*in_reply_to);
                w.u32(*handle);
                w.u8(*node_type as u8);
                w.u32(*size);
            }
            Self::CloseHandleRequest { sequence_num, handle } => {
                w.u32(*sequence_num);
                w.u32(*handle);
            }
            Self::ReadFileRequest { sequence_num, handle, offset_hi, offset_lo, length } => {
                w.u32(*sequence_num);
                w.u32(*handle);
                w.u32(*offset_hi);
                w.u32(*offset_lo);
                w.u32(*length);
            }
            Self::ReadFileAnswer { in_reply_to, data } => {
                w.u32(*in_reply_to);
                w.bytes(data);
            }
            Self::WriteFileRequest { sequence_num, handle, data } => {
                w.u32(*sequence_num);
                w.u32(*handle);
                w.bytes(data);
            }
            Self::WriteFileAnswer { in_reply_to } => w.u32(*in_reply_to),
            Self::FindNextFileRequest { sequence_num, handle, reset } => {
                w.u32(*sequence_num);
                w.u32(*handle);
                w.u8(u8::from(*reset));
            }
            Self::FindNextFileAnswer { in_reply_to, end_of_sequence, node_type, size, name } => {
                w.u32(*in_reply_to);
                w.u8(u8::from(*end_of_sequence));
                w.u8(*node_type as u8);
                w.u32(*size);
                w.string(name)?;
            }
            Self::LaunchExecutableRequest { sequence_num, path, arguments } => {
                w.u32(*sequence_num);
                w.string(path)?;
                w.string(arguments)?;
            }
            Self::LaunchExecutableAnswer { in_reply_to } => w.u32(*in_reply_to),
            Self::ExecutableDoneRequest { sequence_num, result_code } => {
                w.u32(*sequence_num);
                w.u32(*result_code);
            }
        }

        let total = out.len() - start;
        if total > MAX_FRAME_SIZE {
            out.truncate(start);
            return Err(EncodeError::FrameTooLarge(total));
        }
        out[start + 2..start + 4].copy_from_slice(&(total as u16).to_be_bytes());
        Ok(())
    }

    /// Parses exactly one frame. `frame` must span the declared length.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated);
        }
        let kind = MsgKind::from_wire(frame[0])?;
        let declared = u16::from_be_bytes([frame[2], frame[3]]) as usize;
        if declared != frame.len() {
            return Err(DecodeError::LengthMismatch { declared, actual: frame.len() });
        }

        let mut r = Reader::new(&frame[HEADER_SIZE..]);
        let msg = match kind {
            MsgKind::HandshakeRequest => Self::HandshakeRequest(Handshake {
                sequence_num: r.u32()?,
                version_major: r.u32()?,
                version_minor: r.u32()?,
                platform_name: r.string()?,
                node_name: r.string()?,
                platform_version: r.string()?,
                password_hash: r.string()?,
            }),
            MsgKind::PingRequest => Self::PingRequest { sequence_num: r.u32()? },
            MsgKind::PingAnswer => Self::PingAnswer { in_reply_to: r.u32()? },
            MsgKind::ErrorAnswer => Self::ErrorAnswer {
                in_reply_to: r.u32()?,
                error: NetError::from_wire(r.u32()?),
            },
            MsgKind::OpenHandleRequest => Self::OpenHandleRequest {
                sequence_num: r.u32()?,
                path: r.string()?,
                mode: OpenMode::from_bits_retain(r.u32()?),
            },
            MsgKind::OpenHandleAnswer => Self::OpenHandleAnswer {
                in_reply_to: r.u32()?,
                handle: r.u32()?,
                node_type: NodeType::from_wire(r.u8()?)?,
                size: r.u32()?,
            },
            MsgKind::CloseHandleRequest => Self::CloseHandleRequest {
                sequence_num: r.u32()?,
                handle: r.u32()?,
            },
            MsgKind::ReadFileRequest => Self::ReadFileRequest {
                sequence_num: r.u32()?,
                handle: r.u32()?,
                offset_hi: r.u32()?,
                offset_lo: r.u32()?,
                length: r.u32()?,
            },
            MsgKind::ReadFileAnswer => Self::ReadFileAnswer {
                in_reply_to: r.u32()?,
                data: r.bytes()?,
            },
            MsgKind::WriteFileRequest => Self::WriteFileRequest {
                sequence_num: r.u32()?,
                handle: r.u32()?,
                data: r.bytes()?,
            },
            MsgKind::WriteFileAnswer => Self::WriteFileAnswer { in_reply_to: r.u32()? },
            MsgKind::FindNextFileRequest => Self::FindNextFileRequest {
                sequence_num: r.u32()?,
                handle: r.u32()?,
                reset: r.u8()? != 0,
            },
            MsgKind::FindNextFileAnswer => Self::FindNextFileAnswer {
                in_reply_to: r.u32()?,
                end_of_sequence: r.u8()? != 0,
                node_type: NodeType::from_wire(r.u8()?)?,
                size: r.u32()?,
                name: r.string()?,
            },
            MsgKind::LaunchExecutableRequest => Self::LaunchExecutableRequest {
                sequence_num: r.u32()?,
                path: r.string()?,
                arguments: r.string()?,
            },
            MsgKind::LaunchExecutableAnswer => Self::LaunchExecutableAnswer {
                in_reply_to: r.u32()?,
            },
            MsgKind::ExecutableDoneRequest => Self::ExecutableDoneRequest {
                sequence_num: r.u32()?,
                result_code: r.u32()?,
            },
        };
        r.finish()?;
        Ok(msg)
    }
}
