//! The client read path: read-ahead, buffered follow-ups, multi-round
//! reads against a server that answers short.

mod support;

use support::{RecordingHost, RecordingSink, open_lock};
use tether::{Completion, LockId, READ_AHEAD_SIZE, Ticket, Volume};
use tether_proto::{Message, NodeType};

/// Answers every outstanding read request the way the file server would:
/// `min(requested, file_len - offset)` bytes of `file`, capped per answer.
/// Returns how many requests were answered.
fn serve_reads(
    volume: &mut Volume,
    sink: &mut RecordingSink,
    host: &mut RecordingHost,
    file: &[u8],
    answer_cap: usize,
) -> usize {
    let mut answered = 0;
    while let Some(msg) = sink.sent.pop_front() {
        let Message::ReadFileRequest { sequence_num, offset_lo, length, .. } = msg else {
            panic!("expected a read request, got {msg:?}");
        };
        let start = (offset_lo as usize).min(file.len());
        let end = (start + (length as usize).min(answer_cap)).min(file.len());
        volume
            .on_network_message(
                sink,
                host,
                Message::ReadFileAnswer {
                    in_reply_to: sequence_num,
                    data: file[start..end].to_vec(),
                },
            )
            .unwrap();
        answered += 1;
    }
    answered
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn file_lock(
    volume: &mut Volume,
    sink: &mut RecordingSink,
    host: &mut RecordingHost,
    size: u32,
) -> LockId {
    open_lock(volume, sink, host, "data.bin", 3, NodeType::File, size)
}

fn completed_read(host: &mut RecordingHost) -> Vec<u8> {
    let (_, completion) = host.pop();
    match completion {
        Completion::Read(Ok(data)) => data,
        other => panic!("read failed: {other:?}"),
    }
}

#[test]
fn first_read_requests_a_full_window() {
    let file = pattern(10);
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();
    let lock = file_lock(&mut volume, &mut sink, &mut host, 10);

    volume.read(&mut sink, &mut host, Ticket(1), lock, 4);
    match sink.sent.front() {
        Some(Message::ReadFileRequest { offset_lo: 0, length, .. }) => {
            assert_eq!(*length as usize, READ_AHEAD_SIZE);
        }
        other => panic!("expected a read request, got {other:?}"),
    }

    serve_reads(&mut volume, &mut sink, &mut host, &file, usize::MAX);
    assert_eq!(completed_read(&mut host), &file[..4]);
    assert_eq!(volume.lock(lock).unwrap().offset(), 4);
}

#[test]
fn followup_read_is_served_from_the_buffer_without_a_request() {
    let file = pattern(10);
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();
    let lock = file_lock(&mut volume, &mut sink, &mut host, 10);

    volume.read(&mut sink, &mut host, Ticket(1), lock, 4);
    serve_reads(&mut volume, &mut sink, &mut host, &file, usize::MAX);
    assert_eq!(completed_read(&mut host), &file[..4]);

    // The answer held the whole file; the tail is buffered.
    volume.read(&mut sink, &mut host, Ticket(2), lock, 3);
    sink.assert_quiet();
    assert_eq!(completed_read(&mut host), &file[4..7]);
    assert_eq!(volume.lock(lock).unwrap().offset(), 7);
}

#[test]
fn every_requested_count_returns_exactly_that_many_pattern_bytes() {
    const SIZE: usize = 600;
    let file = pattern(SIZE);

    for step in [1usize, 7, 64, 250, 600] {
        let mut volume = Volume::new("TD0");
        let mut sink = RecordingSink::default();
        let mut host = RecordingHost::default();
        let lock = file_lock(&mut volume, &mut sink, &mut host, SIZE as u32);

        let mut collected = Vec::new();
        while collected.len() < SIZE {
            let want = step.min(SIZE - collected.len());
            volume.read(&mut sink, &mut host, Ticket(collected.len() as u64), lock, want as u32);
            serve_reads(&mut volume, &mut sink, &mut host, &file, usize::MAX);
            let data = completed_read(&mut host);
            assert_eq!(data.len(), want, "step {step}");
            collected.extend_from_slice(&data);
            assert_eq!(volume.lock(lock).unwrap().offset() as usize, collected.len());
        }
        assert_eq!(collected, file, "step {step}");
    }
}

#[test]
fn large_read_loops_until_the_caller_is_satisfied() {
    const SIZE: usize = 5000;
    let file = pattern(SIZE);
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();
    let lock = file_lock(&mut volume, &mut sink, &mut host, SIZE as u32);

    // The server never answers more than 4 KiB at a time, so a 5000 byte
    // read takes more than one round.
    volume.read(&mut sink, &mut host, Ticket(1), lock, SIZE as u32);
    let rounds = serve_reads(&mut volume, &mut sink, &mut host, &file, 4096);
    assert!(rounds >= 2, "expected a multi-round read, saw {rounds}");
    assert_eq!(completed_read(&mut host), file);
    assert_eq!(volume.lock(lock).unwrap().offset() as usize, SIZE);
}

#[test]
fn reading_past_the_end_returns_the_available_bytes() {
    const SIZE: usize = 10;
    let file = pattern(SIZE);
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();
    let lock = file_lock(&mut volume, &mut sink, &mut host, SIZE as u32);

    volume.read(&mut sink, &mut host, Ticket(1), lock, 64);
    serve_reads(&mut volume, &mut sink, &mut host, &file, usize::MAX);
    assert_eq!(completed_read(&mut host), file);
    assert_eq!(volume.lock(lock).unwrap().offset() as usize, SIZE);

    // At EOF the server answers zero bytes and the caller gets none.
    volume.read(&mut sink, &mut host, Ticket(2), lock, 4);
    serve_reads(&mut volume, &mut sink, &mut host, &file, usize::MAX);
    assert_eq!(completed_read(&mut host), Vec::<u8>::new());
}

#[test]
fn readahead_short_answer_window() {
    // A satisfied read whose answer carried extra bytes leaves exactly
    // answer_len - copied bytes in the window, starting at the post-copy
    // offset; the next read inside that window stays local.
    let file = pattern(8);
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();
    let lock = file_lock(&mut volume, &mut sink, &mut host, 8);

    volume.read(&mut sink, &mut host, Ticket(1), lock, 4);
    serve_reads(&mut volume, &mut sink, &mut host, &file, usize::MAX);
    assert_eq!(completed_read(&mut host), &file[..4]);

    // Window is [4, 8): both remaining bytes reads stay local.
    volume.read(&mut sink, &mut host, Ticket(2), lock, 2);
    sink.assert_quiet();
    assert_eq!(completed_read(&mut host), &file[4..6]);

    volume.read(&mut sink, &mut host, Ticket(3), lock, 2);
    sink.assert_quiet();
    assert_eq!(completed_read(&mut host), &file[6..8]);

    // The window is exhausted; the next read goes back to the server.
    volume.read(&mut sink, &mut host, Ticket(4), lock, 1);
    assert_eq!(sink.sent.len(), 1);
    serve_reads(&mut volume, &mut sink, &mut host, &file, usize::MAX);
    assert_eq!(completed_read(&mut host), Vec::<u8>::new());
}

#[test]
fn seeking_outside_the_window_forces_a_fresh_request() {
    let file = pattern(5000);
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();
    let lock = file_lock(&mut volume, &mut sink, &mut host, 5000);

    // The window after this read covers [4, 1024).
    volume.read(&mut sink, &mut host, Ticket(1), lock, 4);
    serve_reads(&mut volume, &mut sink, &mut host, &file, 1024);
    completed_read(&mut host);

    // Far outside the buffered window: a fresh request must go out.
    volume.seek(lock, 3000, tether::Whence::Start).unwrap();
    volume.read(&mut sink, &mut host, Ticket(2), lock, 5);
    assert_eq!(sink.sent.len(), 1);
    serve_reads(&mut volume, &mut sink, &mut host, &file, 1024);
    assert_eq!(completed_read(&mut host), &file[3000..3005]);
}
