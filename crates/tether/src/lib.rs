mod controller;
mod fs;
mod launch;
pub mod logging;
mod native;
mod pending;
mod serve;
mod target;
mod volume;

pub use controller::{ControllerOptions, ControllerSession, run_controller};
pub use fs::{FileInfo, FsError, LockId, Ticket, VolumeInfo, Whence};
pub use launch::{LaunchDone, Launcher, ProcessLauncher};
pub use logging::LogMask;
pub use native::NativeFs;
pub use pending::{Continuation, PendingOp, PendingOps};
pub use serve::{FileServer, HostDir, HostFile, HostFs, HostNode, MAX_FILE_HANDLES, READ_CHUNK};
pub use target::{DiscardHost, TargetOptions, run_target};
pub use volume::{Completion, Lock, LockKind, READ_AHEAD_SIZE, Volume, VolumeHost};

use tether_proto::Message;

/// Where outbound protocol messages go. The peer is the production sink;
/// tests substitute recorders.
pub trait MessageSink {
    fn transmit(&mut self, msg: &Message);
}

impl MessageSink for tether_net::Peer {
    fn transmit(&mut self, msg: &Message) {
        tether_net::Peer::transmit(self, msg);
    }
}
