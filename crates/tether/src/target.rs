//! Target node: accepts controller connections, mounts one virtual disk
//! per peer, and runs launched executables.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, mpsc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use mio::{Events, Interest, Poll, Token, Waker};
use tether_net::{HandlerError, Peer, PeerHandler, Role, UpdateStatus};
use tether_proto::{BASE_DEVICE_NAME, Message};
use tracing::{debug, info, warn};

use crate::{
    fs::Ticket,
    launch::{LaunchDone, Launcher},
    volume::{Completion, Volume, VolumeHost},
};

/// Volume host for nodes whose platform filesystem integration lives
/// elsewhere: completions are logged and dropped.
pub struct DiscardHost;

impl VolumeHost for DiscardHost {
    fn complete(&mut self, ticket: Ticket, completion: Completion) {
        debug!("dropping completion for {ticket:?}: {completion:?}");
    }
}

/// Role adapter for one accepted connection: launch requests go to the
/// launcher, everything else is an answer for the peer's virtual disk.
struct TargetHandler<'a, L: Launcher, H: VolumeHost> {
    volume: &'a mut Volume,
    launcher: &'a mut L,
    host: &'a mut H,
    peer_index: usize,
}

impl<L: Launcher, H: VolumeHost> PeerHandler for TargetHandler<'_, L, H> {
    fn on_connected(&mut self, peer: &mut Peer) {
        debug!("{}: session established", peer.ident());
    }

    fn on_message(&mut self, peer: &mut Peer, msg: Message) -> Result<(), HandlerError> {
        match msg {
            Message::LaunchExecutableRequest { sequence_num, path, arguments } => {
                info!("launch executable: '{path}'");
                match self.launcher.spawn(self.peer_index, &path, &arguments) {
                    Ok(()) => {
                        peer.transmit(&Message::LaunchExecutableAnswer {
                            in_reply_to: sequence_num,
                        });
                    }
                    Err(error) => {
                        peer.transmit(&Message::ErrorAnswer { in_reply_to: sequence_num, error });
                    }
                }
                Ok(())
            }
            other => self.volume.on_network_message(peer, self.host, other),
        }
    }
}

struct PeerSlot {
    peer: Peer,
    volume: Volume,
    writable_armed: bool,
}

#[derive(Debug, Clone)]
pub struct TargetOptions {
    pub address: String,
    pub port: u16,
}

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const PEER_BASE: usize = 2;

/// Accept loop: multiplexes the listener, every peer socket, and the
/// launch-completion waker; ticks once a second to drive liveness.
pub fn run_target<L, F>(
    opts: &TargetOptions,
    make_launcher: F,
    shutdown: &AtomicBool,
) -> io::Result<()>
where
    L: Launcher,
    F: FnOnce(Arc<Waker>) -> (L, mpsc::Receiver<LaunchDone>),
{
    let addr: SocketAddr = format!("{}:{}", opts.address, opts.port)
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut poll = Poll::new()?;
    let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
    let (mut launcher, done_rx) = make_launcher(Arc::clone(&waker));

    let mut listener = mio::net::TcpListener::bind(addr)?;
    poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
    info!(target: "console", "serving on {addr}");

    let mut events = Events::with_capacity(128);
    let mut slots: Vec<Option<PeerSlot>> = Vec::new();
    let mut next_peer_index = 0usize;
    let mut host = DiscardHost;

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

        let mut accept = false;
        let mut readable = vec![false; slots.len()];
        let mut writable = vec![false; slots.len()];
        for ev in events.iter() {
            match ev.token() {
                LISTENER => accept = true,
                WAKER => {}
                Token(t) => {
                    let index = t - PEER_BASE;
                    if index < slots.len() {
                        readable[index] |= ev.is_readable();
                        writable[index] |= ev.is_writable();
                    }
                }
            }
        }

        if accept {
            loop {
                match listener.accept() {
                    Ok((stream, peer_addr)) => {
                        info!(target: "console", "new connection from {peer_addr}");
                        let peer_index = next_peer_index;
                        next_peer_index += 1;

                        let slot_index = match slots.iter().position(Option::is_none) {
                            Some(i) => i,
                            None => {
                                slots.push(None);
                                readable.push(false);
                                writable.push(false);
                                slots.len() - 1
                            }
                        };
                        let mut peer =
                            Peer::new(stream, peer_addr, Role::Target, peer_index, Instant::now());
                        poll.registry().register(
                            peer.stream_mut(),
                            Token(PEER_BASE + slot_index),
                            Interest::READABLE,
                        )?;
                        let device = format!("{BASE_DEVICE_NAME}{peer_index}");
                        slots[slot_index] = Some(PeerSlot {
                            peer,
                            volume: Volume::new(&device),
                            writable_armed: false,
                        });
                        // Give the fresh connection an immediate turn.
                        readable[slot_index] = true;
                        writable[slot_index] = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("couldn't accept connection: {e}");
                        break;
                    }
                }
            }
        }

        // Completed launches notify the peer that asked for them; it may
        // have disconnected in the meantime.
        while let Ok(done) = done_rx.try_recv() {
            info!("launch completed; result {}", done.result_code);
            let slot = slots
                .iter_mut()
                .flatten()
                .find(|s| s.peer.peer_index() == done.peer_index && s.peer.is_connected());
            match slot {
                Some(slot) => {
                    let seq = slot.volume.allocate_seq();
                    slot.peer.transmit(&Message::ExecutableDoneRequest {
                        sequence_num: seq,
                        result_code: done.result_code,
                    });
                }
                None => warn!("no peer to notify about the completed launch"),
            }
        }

        // Every peer gets a turn each tick so idle connections still ping.
        for (index, entry) in slots.iter_mut().enumerate() {
            let Some(slot) = entry else { continue };
            let PeerSlot { peer, volume, writable_armed } = slot;
            let mut handler = TargetHandler {
                volume,
                launcher: &mut launcher,
                host: &mut host,
                peer_index: peer.peer_index(),
            };
            let status =
                peer.update(Instant::now(), readable[index], writable[index], &mut handler);

            if status.contains(UpdateStatus::REMOVE_ME) {
                info!("removing peer {}", peer.ident());
                volume.fail_all_pending(&mut host);
                let _ = poll.registry().deregister(peer.stream_mut());
                *entry = None;
                continue;
            }

            let want_write = status.contains(UpdateStatus::NEED_OUTPUT);
            if want_write != *writable_armed {
                let interest = if want_write {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                };
                poll.registry().reregister(
                    peer.stream_mut(),
                    Token(PEER_BASE + index),
                    interest,
                )?;
                *writable_armed = want_write;
            }
        }
    }

    for slot in slots.iter_mut().flatten() {
        slot.volume.fail_all_pending(&mut host);
        let _ = poll.registry().deregister(slot.peer.stream_mut());
    }
    Ok(())
}
