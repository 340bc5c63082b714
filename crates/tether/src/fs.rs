//! Types shared between the client volume engine and the file server.

use tether_proto::{NetError, NodeType};
use thiserror::Error;

/// Opaque token the embedding host attaches to a remote call; handed back
/// unchanged with the completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(pub u64);

/// A client-side lock on an open file, directory or the device root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId(pub u32);

/// Local error space surfaced to the host filesystem callbacks. The host
/// adapter maps these onto its platform's native codes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("object not found")]
    NotFound,
    #[error("object in use")]
    InUse,
    #[error("object is of the wrong type")]
    WrongType,
    #[error("i/o error")]
    Io,
    #[error("invalid lock")]
    InvalidLock,
    #[error("device not mounted")]
    DeviceNotMounted,
}

impl FsError {
    /// Translation of the wire taxonomy into the local error space.
    pub fn from_net(error: NetError) -> Self {
        match error {
            NetError::AccessDenied => Self::InUse,
            NetError::NotFound => Self::NotFound,
            NetError::NotAFile | NetError::NotADirectory | NetError::InvalidValue => {
                Self::WrongType
            }
            NetError::IoError => Self::Io,
            _ => Self::DeviceNotMounted,
        }
    }
}

/// One examined object: an examine result on the client, a directory entry
/// on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub node_type: NodeType,
    pub size: u32,
}

/// Synthesised volume statistics for the mounted device. The device has no
/// real blocks; the numbers exist to satisfy host tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_blocks: u32,
    pub blocks_used: u32,
    pub bytes_per_block: u32,
}

impl Default for VolumeInfo {
    fn default() -> Self {
        Self { total_blocks: 1000, blocks_used: 500, bytes_per_block: 1 }
    }
}

/// Seek origin for the local seek call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}
