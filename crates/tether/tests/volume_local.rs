//! Local volume calls: path normalisation, locks, seek, examine, parent,
//! duplicate, unlock.

mod support;

use support::{RecordingHost, RecordingSink, open_lock};
use tether::{Completion, FsError, LockKind, Ticket, Volume, Whence};
use tether_proto::{HANDLE_ROOT, Message, NodeType, OpenMode};

#[test]
fn colon_prefix_makes_the_lookup_root_relative() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    let dir = open_lock(&mut volume, &mut sink, &mut host, "sub", 1, NodeType::Directory, 0);

    volume.open(&mut sink, &mut host, Ticket(1), Some(dir), "vol:foo.txt", OpenMode::READ, None);
    match sink.pop() {
        Message::OpenHandleRequest { path, .. } => assert_eq!(path, "foo.txt"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn names_resolve_relative_to_the_parent_lock() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    let dir = open_lock(&mut volume, &mut sink, &mut host, "sub/dir", 1, NodeType::Directory, 0);

    volume.open(&mut sink, &mut host, Ticket(1), Some(dir), "leaf.txt", OpenMode::READ, None);
    match sink.pop() {
        Message::OpenHandleRequest { path, .. } => assert_eq!(path, "sub/dir/leaf.txt"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn empty_path_resolves_to_the_root_without_a_round_trip() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    volume.open(&mut sink, &mut host, Ticket(1), None, ":", OpenMode::READ, None);
    sink.assert_quiet();
    let (_, completion) = host.pop();
    let Completion::Open(Ok(root)) = completion else {
        panic!("root open failed: {completion:?}");
    };
    assert_eq!(volume.lock(root).unwrap().kind(), LockKind::Device);
    assert_eq!(volume.lock(root).unwrap().handle_id(), HANDLE_ROOT);
}

#[test]
fn required_node_type_rejects_and_releases_a_directory() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    volume.open(
        &mut sink,
        &mut host,
        Ticket(1),
        None,
        "subdir",
        OpenMode::READ,
        Some(NodeType::File),
    );
    let Message::OpenHandleRequest { sequence_num, .. } = sink.pop() else {
        panic!("expected an open request");
    };
    volume
        .on_network_message(
            &mut sink,
            &mut host,
            Message::OpenHandleAnswer {
                in_reply_to: sequence_num,
                handle: 5,
                node_type: NodeType::Directory,
                size: 0,
            },
        )
        .unwrap();

    let (_, completion) = host.pop();
    assert_eq!(completion, Completion::Open(Err(FsError::WrongType)));
    // The server handle just opened is released again.
    match sink.pop() {
        Message::CloseHandleRequest { handle, .. } => assert_eq!(handle, 5),
        other => panic!("expected a close request, got {other:?}"),
    }
}

#[test]
fn seek_returns_the_old_position_and_clamps_to_size() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();
    let lock = open_lock(&mut volume, &mut sink, &mut host, "f", 2, NodeType::File, 100);

    assert_eq!(volume.seek(lock, 10, Whence::Start).unwrap(), 0);
    assert_eq!(volume.seek(lock, 5, Whence::Current).unwrap(), 10);
    assert_eq!(volume.seek(lock, -3, Whence::End).unwrap(), 15);
    assert_eq!(volume.lock(lock).unwrap().offset(), 97);

    // Past the end clamps to the size.
    assert_eq!(volume.seek(lock, 500, Whence::Start).unwrap(), 97);
    assert_eq!(volume.lock(lock).unwrap().offset(), 100);

    // Backwards past the start wraps, which the size clamp also catches.
    volume.seek(lock, 0, Whence::Start).unwrap();
    volume.seek(lock, -1, Whence::Current).unwrap();
    assert_eq!(volume.lock(lock).unwrap().offset(), 100);
}

#[test]
fn examine_answers_from_cached_state() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    let root = volume.alloc_root_lock();
    let info = volume.examine(root).unwrap();
    assert_eq!(info.name, "TD0");
    assert_eq!(info.node_type, NodeType::Directory);

    let file = open_lock(&mut volume, &mut sink, &mut host, "a/b.txt", 2, NodeType::File, 42);
    let info = volume.examine(file).unwrap();
    assert_eq!(info.name, "a/b.txt");
    assert_eq!(info.node_type, NodeType::File);
    assert_eq!(info.size, 42);
    sink.assert_quiet();
}

#[test]
fn parent_of_a_nested_file_is_a_synthesised_directory_lock() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    let file = open_lock(&mut volume, &mut sink, &mut host, "a/b/c.txt", 2, NodeType::File, 1);
    let parent = volume.parent(file).unwrap();
    let lock = volume.lock(parent).unwrap();
    assert_eq!(lock.kind(), LockKind::Directory);
    assert_eq!(lock.path(), "a/b");
    // No server lookup backs the pseudo-parent.
    assert_eq!(lock.handle_id(), HANDLE_ROOT);
    sink.assert_quiet();
}

#[test]
fn parent_of_a_root_file_is_the_root_and_the_root_has_none() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    let file = open_lock(&mut volume, &mut sink, &mut host, "c.txt", 2, NodeType::File, 1);
    let parent = volume.parent(file).unwrap();
    assert_eq!(volume.lock(parent).unwrap().kind(), LockKind::Device);

    let root = volume.alloc_root_lock();
    assert_eq!(volume.parent(root), Err(FsError::NotFound));
}

#[test]
fn duplicate_copies_the_lock_with_a_fresh_cursor() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    let file = open_lock(&mut volume, &mut sink, &mut host, "f.bin", 2, NodeType::File, 50);
    volume.seek(file, 30, Whence::Start).unwrap();

    let copy = volume.duplicate(file).unwrap();
    assert_ne!(copy, file);
    let lock = volume.lock(copy).unwrap();
    assert_eq!(lock.handle_id(), 2);
    assert_eq!(lock.path(), "f.bin");
    assert_eq!(lock.offset(), 0);

    let root = volume.alloc_root_lock();
    let root_copy = volume.duplicate(root).unwrap();
    assert_eq!(volume.lock(root_copy).unwrap().kind(), LockKind::Device);
}

#[test]
fn unlock_fires_a_close_without_awaiting_an_answer() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    let file = open_lock(&mut volume, &mut sink, &mut host, "f.bin", 7, NodeType::File, 1);
    volume.unlock(&mut sink, file).unwrap();
    match sink.pop() {
        Message::CloseHandleRequest { handle, .. } => assert_eq!(handle, 7),
        other => panic!("expected a close request, got {other:?}"),
    }
    assert_eq!(volume.pending_len(), 0);
    assert!(volume.lock(file).is_none());

    // Releasing a root lock never touches the server.
    let root = volume.alloc_root_lock();
    volume.unlock(&mut sink, root).unwrap();
    sink.assert_quiet();

    assert_eq!(volume.unlock(&mut sink, file), Err(FsError::NotFound));
}

#[test]
fn volume_info_exists_only_on_the_root() {
    let mut volume = Volume::new("TD0");
    let mut sink = RecordingSink::default();
    let mut host = RecordingHost::default();

    let root = volume.alloc_root_lock();
    let info = volume.info(root).unwrap();
    assert_eq!(info, volume.disk_info());
    assert!(info.total_blocks > 0);

    let file = open_lock(&mut volume, &mut sink, &mut host, "f", 2, NodeType::File, 1);
    assert_eq!(volume.info(file), Err(FsError::NotFound));
}
