//! Controller session: connect, launch, serve files, exit with the
//! program's code.

use std::{
    io,
    net::ToSocketAddrs,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use mio::{Events, Interest, Poll, Token};
use tether_net::{HandlerError, Peer, PeerHandler, Role, UpdateStatus};
use tether_proto::Message;
use tracing::{info, warn};

use crate::{
    native::NativeFs,
    serve::{FileServer, HostFs},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerState {
    WaitLaunch,
    Serving,
    Failed,
}

pub struct ControllerSession<A: HostFs> {
    state: ControllerState,
    server: FileServer<A>,
    executable: String,
    arguments: String,
    seq: u32,
    exit_code: Option<u32>,
}

impl<A: HostFs> ControllerSession<A> {
    pub fn new(server: FileServer<A>, executable: &str, arguments: &str) -> Self {
        Self {
            state: ControllerState::WaitLaunch,
            server,
            executable: executable.to_string(),
            arguments: arguments.to_string(),
            seq: 0,
            exit_code: None,
        }
    }

    /// The launched program's exit code, once it has been reported.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }
}

impl<A: HostFs> PeerHandler for ControllerSession<A> {
    fn on_connected(&mut self, peer: &mut Peer) {
        info!(target: "console", "connected; launching '{}'", self.executable);
        let seq = self.seq;
        self.seq += 1;
        peer.transmit(&Message::LaunchExecutableRequest {
            sequence_num: seq,
            path: self.executable.clone(),
            arguments: self.arguments.clone(),
        });
        self.state = ControllerState::WaitLaunch;
    }

    fn on_message(&mut self, peer: &mut Peer, msg: Message) -> Result<(), HandlerError> {
        match self.state {
            ControllerState::WaitLaunch | ControllerState::Serving => match msg {
                Message::LaunchExecutableAnswer { .. } => {
                    info!(target: "console", "executable launched");
                    self.state = ControllerState::Serving;
                }
                Message::ExecutableDoneRequest { result_code, .. } => {
                    info!(target: "console", "executable finished with code {result_code}");
                    self.exit_code = Some(result_code);
                    peer.disconnect();
                }
                Message::ErrorAnswer { error, .. } if self.state == ControllerState::WaitLaunch => {
                    warn!(target: "console", "target couldn't launch the executable: {error:?}");
                    self.state = ControllerState::Failed;
                    peer.disconnect();
                }
                other => self.server.serve(peer, &other),
            },
            ControllerState::Failed => {
                warn!("message {} after controller failure", msg.kind());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub host: String,
    pub port: u16,
    /// The file serving directory; the executable path is relative to it.
    pub fsroot: PathBuf,
    pub executable: String,
    pub arguments: String,
}

const CONTROLLER_PEER: Token = Token(0);

/// Connects to the target, drives the session until the launched program
/// finishes or the connection dies, and returns the process exit code.
pub fn run_controller(opts: &ControllerOptions, shutdown: &AtomicBool) -> io::Result<i32> {
    let addr = (opts.host.as_str(), opts.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"))?;
    info!(target: "console", "connecting to {addr}");

    let stream = std::net::TcpStream::connect(addr)?;
    stream.set_nonblocking(true)?;
    let stream = mio::net::TcpStream::from_std(stream);

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(64);
    let mut peer = Peer::new(stream, addr, Role::Controller, 0, Instant::now());
    poll.registry().register(peer.stream_mut(), CONTROLLER_PEER, Interest::READABLE)?;

    let server = FileServer::new(NativeFs::new(&opts.fsroot));
    let mut session = ControllerSession::new(server, &opts.executable, &opts.arguments);

    let mut writable_armed = false;
    let mut first_turn = true;
    loop {
        if let Err(e) = poll.poll(&mut events, Some(Duration::from_secs(1)))
            && e.kind() != io::ErrorKind::Interrupted
        {
            return Err(e);
        }
        if shutdown.load(Ordering::Relaxed) {
            info!(target: "console", "interrupted");
            break;
        }

        let mut can_read = first_turn;
        let mut can_write = first_turn;
        first_turn = false;
        for ev in events.iter() {
            if ev.token() == CONTROLLER_PEER {
                can_read |= ev.is_readable();
                can_write |= ev.is_writable();
            }
        }

        let status = peer.update(Instant::now(), can_read, can_write, &mut session);
        if status.contains(UpdateStatus::REMOVE_ME) {
            break;
        }

        let want_write = status.contains(UpdateStatus::NEED_OUTPUT);
        if want_write != writable_armed {
            let interest = if want_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            poll.registry().reregister(peer.stream_mut(), CONTROLLER_PEER, interest)?;
            writable_armed = want_write;
        }
    }

    Ok(session.exit_code().map_or(1, |code| code as i32))
}
