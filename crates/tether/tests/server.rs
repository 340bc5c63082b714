//! File server against a real directory tree.

mod support;

use std::{
    fs,
    io::Write,
    sync::{Arc, Mutex},
};

use support::RecordingSink;
use tether::{FileServer, MAX_FILE_HANDLES, NativeFs};
use tether_proto::{
    HANDLE_ROOT, HANDLE_VIRTUAL_INPUT, HANDLE_VIRTUAL_OUTPUT, Message, NetError, NodeType,
    OpenMode,
};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn fixture() -> (tempfile::TempDir, FileServer<NativeFs>, SharedBuf) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("foo.txt"), b"0123456789").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub/inner.bin"), b"xyz").unwrap();

    let out = SharedBuf::default();
    let server = FileServer::with_stdout(NativeFs::new(dir.path()), Box::new(out.clone()));
    (dir, server, out)
}

fn open(server: &mut FileServer<NativeFs>, sink: &mut RecordingSink, path: &str) -> Message {
    server.serve(
        sink,
        &Message::OpenHandleRequest {
            sequence_num: 1,
            path: path.to_string(),
            mode: OpenMode::READ,
        },
    );
    sink.pop()
}

#[test]
fn open_read_close_roundtrip() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();

    let Message::OpenHandleAnswer { handle, node_type, size, .. } =
        open(&mut server, &mut sink, "foo.txt")
    else {
        panic!("open failed");
    };
    assert_eq!(node_type, NodeType::File);
    assert_eq!(size, 10);

    server.serve(
        &mut sink,
        &Message::ReadFileRequest {
            sequence_num: 2,
            handle,
            offset_hi: 0,
            offset_lo: 2,
            length: 4,
        },
    );
    match sink.pop() {
        Message::ReadFileAnswer { in_reply_to: 2, data } => assert_eq!(data, b"2345"),
        other => panic!("unexpected {other:?}"),
    }

    // Reading past the end returns the remaining bytes, then nothing.
    server.serve(
        &mut sink,
        &Message::ReadFileRequest {
            sequence_num: 3,
            handle,
            offset_hi: 0,
            offset_lo: 8,
            length: 100,
        },
    );
    match sink.pop() {
        Message::ReadFileAnswer { data, .. } => assert_eq!(data, b"89"),
        other => panic!("unexpected {other:?}"),
    }

    // Close is fire-and-forget; the slot frees and the handle goes stale.
    server.serve(&mut sink, &Message::CloseHandleRequest { sequence_num: 4, handle });
    sink.assert_quiet();
    assert_eq!(server.open_handles(), 0);

    server.serve(
        &mut sink,
        &Message::ReadFileRequest {
            sequence_num: 5,
            handle,
            offset_hi: 0,
            offset_lo: 0,
            length: 1,
        },
    );
    match sink.pop() {
        Message::ErrorAnswer { error, .. } => assert_eq!(error, NetError::InvalidValue),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn missing_files_answer_not_found() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();
    match open(&mut server, &mut sink, "nope.txt") {
        Message::ErrorAnswer { error, .. } => assert_eq!(error, NetError::NotFound),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn directories_open_as_directory_nodes() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();
    match open(&mut server, &mut sink, "sub") {
        Message::OpenHandleAnswer { node_type, size, .. } => {
            assert_eq!(node_type, NodeType::Directory);
            assert_eq!(size, 0);
        }
        other => panic!("unexpected {other:?}"),
    }
}

fn enumerate(server: &mut FileServer<NativeFs>, sink: &mut RecordingSink, handle: u32) -> Vec<String> {
    let mut names = Vec::new();
    let mut reset = true;
    loop {
        server.serve(
            sink,
            &Message::FindNextFileRequest { sequence_num: 9, handle, reset },
        );
        reset = false;
        match sink.pop() {
            Message::FindNextFileAnswer { end_of_sequence: true, .. } => break,
            Message::FindNextFileAnswer { name, .. } => names.push(name),
            other => panic!("unexpected {other:?}"),
        }
    }
    names.sort();
    names
}

#[test]
fn enumeration_lists_every_entry_and_restarts_on_reset() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();

    let Message::OpenHandleAnswer { handle, .. } = open(&mut server, &mut sink, "") else {
        panic!("root open failed");
    };
    assert_eq!(enumerate(&mut server, &mut sink, handle), vec!["foo.txt", "sub"]);
    // A fresh reset restarts from the top.
    assert_eq!(enumerate(&mut server, &mut sink, handle), vec!["foo.txt", "sub"]);
}

#[test]
fn the_pseudo_root_enumerates_without_an_open() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();
    assert_eq!(enumerate(&mut server, &mut sink, HANDLE_ROOT), vec!["foo.txt", "sub"]);
}

#[test]
fn find_next_on_a_file_is_not_a_directory() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();
    let Message::OpenHandleAnswer { handle, .. } = open(&mut server, &mut sink, "foo.txt") else {
        panic!("open failed");
    };
    server.serve(
        &mut sink,
        &Message::FindNextFileRequest { sequence_num: 9, handle, reset: true },
    );
    match sink.pop() {
        Message::ErrorAnswer { error, .. } => assert_eq!(error, NetError::NotADirectory),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn the_handle_table_is_bounded() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();

    let mut handles = Vec::new();
    for _ in 0..MAX_FILE_HANDLES {
        match open(&mut server, &mut sink, "foo.txt") {
            Message::OpenHandleAnswer { handle, .. } => handles.push(handle),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(server.open_handles(), MAX_FILE_HANDLES);

    match open(&mut server, &mut sink, "foo.txt") {
        Message::ErrorAnswer { error, .. } => assert_eq!(error, NetError::TooManyFilesOpen),
        other => panic!("unexpected {other:?}"),
    }

    // Freeing one slot makes it reusable.
    server.serve(&mut sink, &Message::CloseHandleRequest { sequence_num: 1, handle: handles[3] });
    match open(&mut server, &mut sink, "foo.txt") {
        Message::OpenHandleAnswer { handle, .. } => assert_eq!(handle, handles[3]),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn virtual_output_writes_reach_stdout_immediately() {
    let (_dir, mut server, out) = fixture();
    let mut sink = RecordingSink::default();

    server.serve(
        &mut sink,
        &Message::WriteFileRequest {
            sequence_num: 2,
            handle: HANDLE_VIRTUAL_OUTPUT,
            data: b"hello from afar".to_vec(),
        },
    );
    match sink.pop() {
        Message::WriteFileAnswer { in_reply_to: 2 } => {}
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(out.0.lock().unwrap().as_slice(), b"hello from afar");

    // Writes anywhere else are answered but go nowhere.
    server.serve(
        &mut sink,
        &Message::WriteFileRequest { sequence_num: 3, handle: 0, data: b"dropped".to_vec() },
    );
    assert!(matches!(sink.pop(), Message::WriteFileAnswer { .. }));
    assert_eq!(out.0.lock().unwrap().as_slice(), b"hello from afar");
}

#[test]
fn virtual_stdio_handles_never_close_or_read() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();

    server.serve(
        &mut sink,
        &Message::ReadFileRequest {
            sequence_num: 1,
            handle: HANDLE_VIRTUAL_INPUT,
            offset_hi: 0,
            offset_lo: 0,
            length: 16,
        },
    );
    match sink.pop() {
        Message::ErrorAnswer { error, .. } => assert_eq!(error, NetError::NotAFile),
        other => panic!("unexpected {other:?}"),
    }

    server.serve(
        &mut sink,
        &Message::CloseHandleRequest { sequence_num: 2, handle: HANDLE_VIRTUAL_OUTPUT },
    );
    server.serve(
        &mut sink,
        &Message::CloseHandleRequest { sequence_num: 3, handle: HANDLE_VIRTUAL_INPUT },
    );
    sink.assert_quiet();
}

#[test]
fn unknown_requests_answer_bad_request() {
    let (_dir, mut server, _out) = fixture();
    let mut sink = RecordingSink::default();

    server.serve(
        &mut sink,
        &Message::LaunchExecutableRequest {
            sequence_num: 11,
            path: "prog".into(),
            arguments: String::new(),
        },
    );
    match sink.pop() {
        Message::ErrorAnswer { in_reply_to, error } => {
            assert_eq!(in_reply_to, 11);
            assert_eq!(error, NetError::BadRequest);
        }
        other => panic!("unexpected {other:?}"),
    }
}
