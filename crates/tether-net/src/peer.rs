//! Per-connection protocol state machine.
//!
//! A peer wraps one socket and one transport and walks the states
//! `initial -> wait_handshake -> connected -> error/disconnected`. The
//! controller role transmits its handshake at construction; the target
//! role stays quiet until a valid handshake arrives and only then answers
//! with its own. Pings keep the connection alive while it idles; role
//! traffic is handed to a [`PeerHandler`].

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use bitflags::bitflags;
use mio::net::TcpStream;
use tether_proto::{
    Handshake, Message, PASSWORD_UNUSED, VERSION_MAJOR, VERSION_MINOR, hex_dump,
};
use tracing::{debug, info, trace, warn};

use crate::{
    buffer::RECV_BUFFER_SIZE,
    ident::platform_ident,
    transport::{Transport, TransportStatus, WireFormat},
};

/// Idle time after which a connected peer pings. The target waits one
/// second longer so the two sides do not ping in lockstep. No answer
/// within twice the local threshold fails the connection.
pub const PING_IDLE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiated the connection; owns the files being served.
    Controller,
    /// Accepted the connection; runs the launched executable.
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PeerState {
    Initial,
    WaitHandshake,
    Connected,
    Error,
    Disconnected,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UpdateStatus: u8 {
        const NEED_OUTPUT = 1 << 0;
        const REMOVE_ME   = 1 << 1;
    }
}

/// Returned by a role handler to fail the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerError;

/// Role adapter sitting on top of a peer. Completions may transmit through
/// the peer handed back into each callback.
pub trait PeerHandler {
    fn on_connected(&mut self, peer: &mut Peer);
    fn on_message(&mut self, peer: &mut Peer, msg: Message) -> Result<(), HandlerError>;
}

pub struct Peer {
    stream: TcpStream,
    ident: String,
    peer_index: usize,
    role: Role,
    state: PeerState,
    transport: Transport,
    last_activity: Instant,
    ping_on_wire: bool,
}

impl Peer {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        role: Role,
        peer_index: usize,
        now: Instant,
    ) -> Self {
        let _ = stream.set_nodelay(true);
        let mut peer = Self {
            stream,
            ident: addr.to_string(),
            peer_index,
            role,
            state: PeerState::Initial,
            transport: Transport::new(RECV_BUFFER_SIZE),
            last_activity: now,
            ping_on_wire: false,
        };
        debug!("{}: init peer", peer.ident);
        match role {
            Role::Controller => peer.transmit_handshake(),
            Role::Target => peer.set_state(PeerState::WaitHandshake),
        }
        peer
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn peer_index(&self) -> usize {
        self.peer_index
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    /// True while a ping awaits its answer.
    pub fn ping_outstanding(&self) -> bool {
        self.ping_on_wire
    }

    pub fn needs_output(&self) -> bool {
        self.transport.has_output()
    }

    /// The underlying socket, for readiness registration.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    fn set_state(&mut self, new_state: PeerState) {
        if self.state != new_state {
            info!("{}: [{}] => [{}]", self.ident, self.state, new_state);
            self.state = new_state;
        }
    }

    fn enqueue(&mut self, msg: &Message) {
        let mut buf = self.transport.alloc_buffer();
        if let Err(e) = msg.encode(buf.bytes_mut()) {
            warn!("{}: couldn't encode {}: {e}", self.ident, msg.kind());
            self.transport.recycle(buf);
            self.set_state(PeerState::Error);
            return;
        }
        trace!(target: "packet", "{}: out\n{}", self.ident, hex_dump(buf.bytes()));
        self.transport.submit(buf);
    }

    fn transmit_handshake(&mut self) {
        let ident = platform_ident();
        let msg = Message::HandshakeRequest(Handshake {
            sequence_num: 0,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            platform_name: ident.platform_name,
            node_name: ident.node_name,
            platform_version: ident.platform_version,
            password_hash: PASSWORD_UNUSED.to_string(),
        });
        self.enqueue(&msg);
        if self.state != PeerState::Error {
            self.set_state(PeerState::WaitHandshake);
        }
    }

    /// Sends an application message. Only legal while connected; anything
    /// else is a protocol violation and fails the peer.
    pub fn transmit(&mut self, msg: &Message) {
        if self.state == PeerState::Connected {
            trace!(target: "net", "{}: send {}", self.ident, msg.kind());
            self.enqueue(msg);
        } else {
            warn!("{}: [{}] can't transmit {}", self.ident, self.state, msg.kind());
            self.set_state(PeerState::Error);
        }
    }

    pub fn disconnect(&mut self) {
        self.set_state(PeerState::Disconnected);
    }

    fn receive_handshake(&mut self, hs: &Handshake, handler: &mut dyn PeerHandler) {
        info!(
            "{}: peer is {} running v{}.{} on {} ({})",
            self.ident,
            hs.node_name,
            hs.version_major,
            hs.version_minor,
            hs.platform_name,
            hs.platform_version
        );

        if hs.version_major == VERSION_MAJOR {
            if self.role == Role::Target {
                self.transmit_handshake();
                if self.state == PeerState::Error {
                    return;
                }
            }
            self.set_state(PeerState::Connected);
            handler.on_connected(self);
        } else {
            warn!(
                target: "console",
                "disconnecting peer {} with unsupported version {}.{} (local version {}.{})",
                hs.node_name, hs.version_major, hs.version_minor, VERSION_MAJOR, VERSION_MINOR
            );
            self.set_state(PeerState::Error);
        }
    }

    fn receive(&mut self, now: Instant, msg: Message, handler: &mut dyn PeerHandler) {
        self.last_activity = now;
        trace!(target: "net", "{}: recv {}", self.ident, msg.kind());

        match (self.state, msg) {
            (PeerState::WaitHandshake, Message::HandshakeRequest(hs)) => {
                self.receive_handshake(&hs, handler);
            }
            (PeerState::Connected, Message::HandshakeRequest(_)) => {
                warn!("{}: handshake on an established connection", self.ident);
                self.set_state(PeerState::Error);
            }
            (PeerState::Connected, Message::PingRequest { sequence_num }) => {
                let answer = Message::PingAnswer { in_reply_to: sequence_num };
                trace!(target: "net", "{}: send {}", self.ident, answer.kind());
                self.enqueue(&answer);
            }
            (PeerState::Connected, Message::PingAnswer { .. }) => {
                self.ping_on_wire = false;
            }
            (PeerState::Connected, msg) => {
                if handler.on_message(self, msg).is_err() {
                    self.set_state(PeerState::Error);
                }
            }
            (state, msg) => {
                warn!("{}: [{state}] no action for {}", self.ident, msg.kind());
                self.set_state(PeerState::Error);
            }
        }
    }

    fn ping_threshold(&self) -> Duration {
        match self.role {
            Role::Controller => PING_IDLE,
            Role::Target => PING_IDLE + Duration::from_secs(1),
        }
    }

    fn tick(&mut self, now: Instant) {
        if self.state != PeerState::Connected {
            return;
        }
        let idle = now.saturating_duration_since(self.last_activity);
        let threshold = self.ping_threshold();

        if self.ping_on_wire {
            if idle > threshold * 2 {
                warn!("{}: timeout on wire ping", self.ident);
                self.set_state(PeerState::Error);
            }
        } else if idle > threshold {
            let ping = Message::PingRequest { sequence_num: 0 };
            trace!(target: "net", "{}: send {}", self.ident, ping.kind());
            self.enqueue(&ping);
            self.ping_on_wire = true;
        }
    }

    /// One scheduling turn: pull and push socket bytes according to the
    /// readiness the caller observed, deliver complete messages, run the
    /// liveness timer, and flush anything the actions produced.
    pub fn update(
        &mut self,
        now: Instant,
        can_read: bool,
        can_write: bool,
        handler: &mut dyn PeerHandler,
    ) -> UpdateStatus {
        if can_write {
            self.transport.on_output_possible(&mut self.stream);
        }

        // Readiness is edge-style: alternate socket reads and frame drains
        // until the socket runs dry, so no wakeup is lost.
        let transport_status = loop {
            let taken =
                if can_read { self.transport.on_input_available(&mut self.stream) } else { 0 };

            let mut inbound = Vec::new();
            let ident = self.ident.clone();
            let status = self.transport.drain_frames(&WireFormat, |frame| {
                trace!(target: "packet", "{ident}: in\n{}", hex_dump(frame));
                inbound.push(Message::decode(frame)?);
                Ok(())
            });

            for msg in inbound {
                if matches!(self.state, PeerState::Error | PeerState::Disconnected) {
                    break;
                }
                self.receive(now, msg, handler);
            }

            if taken == 0 ||
                status.intersects(TransportStatus::ERROR | TransportStatus::DISCONNECTED)
            {
                break status;
            }
        };

        if transport_status.intersects(TransportStatus::ERROR | TransportStatus::DISCONNECTED) {
            self.set_state(PeerState::Disconnected);
        }

        self.tick(now);

        // Actions above may have queued output; push it while we can.
        self.transport.on_output_possible(&mut self.stream);

        if matches!(self.state, PeerState::Error | PeerState::Disconnected) {
            UpdateStatus::REMOVE_ME
        } else if self.transport.has_output() {
            UpdateStatus::NEED_OUTPUT
        } else {
            UpdateStatus::empty()
        }
    }
}
