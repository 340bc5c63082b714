mod buffer;
mod ident;
mod peer;
mod transport;

pub use buffer::{FRAME_BUFFER_SIZE, FrameBuf, MAX_POOLED_BUFFERS, RECV_BUFFER_SIZE, RecvBuffer};
pub use ident::{PlatformIdent, platform_ident};
pub use peer::{HandlerError, PING_IDLE, Peer, PeerHandler, PeerState, Role, UpdateStatus};
pub use transport::{FrameFormat, Peek, Transport, TransportStatus, WireFormat};
