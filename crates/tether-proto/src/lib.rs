mod error;
mod message;
mod wire;

pub use error::{DecodeError, EncodeError, NetError};
pub use message::{
    HEADER_SIZE, Handshake, HeaderFlags, MAX_FRAME_SIZE, Message, MsgKind, NodeType, OpenMode,
};
pub use wire::{Reader, Writer, hex_dump};

/// Only the major version must match during the handshake; the minor
/// version is carried for diagnostics.
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;

/// The handshake password field is carried for wire compatibility and never
/// validated.
pub const PASSWORD_UNUSED: &str = "****";

/// Server-side pseudo-root handle, resolved without a round-trip.
pub const HANDLE_ROOT: u32 = 0xffff_ffff;
/// Virtual standard input of the launched program.
pub const HANDLE_VIRTUAL_INPUT: u32 = 0x7fff_fffe;
/// Virtual standard output of the launched program.
pub const HANDLE_VIRTUAL_OUTPUT: u32 = 0x7fff_fffd;

/// Names the virtual stdio files carry on the mounted device.
pub const VIRTUAL_INPUT_FILE: &str = "+virtual-input+";
pub const VIRTUAL_OUTPUT_FILE: &str = "+virtual-output+";

/// Mounted devices are named `TD<peer_index>`.
pub const BASE_DEVICE_NAME: &str = "TD";
