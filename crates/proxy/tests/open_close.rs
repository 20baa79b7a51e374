//! Integration tests for open/read/close behavior

mod common;

use proxy::prelude::*;

const KB: usize = 1024;

#[tokio::test]
async fn cold_read_fetches_and_installs() {
    let env = common::setup(1024 * KB as u64);
    let payload: Vec<u8> = (0..100 * KB).map(|i| (i % 251) as u8).collect();
    env.remote.add_file("a.txt", &payload);

    let mut session = env.session();
    let fd = session.open("a.txt", OpenOption::Read).await;
    assert!(fd >= 0);

    let mut collected = Vec::new();
    loop {
        let (code, data) = session.read(fd as u64, 64 * KB as u64).await;
        assert!(code >= 0);
        if code == 0 {
            break;
        }
        collected.extend_from_slice(&data);
    }
    assert_eq!(collected, payload);
    assert_eq!(session.close(fd as u64).await, 0);

    // one probe, one content chunk
    assert_eq!(env.remote.probe_count(), 1);
    assert_eq!(env.remote.chunk_download_count(), 1);

    let entry = env.entry("a.txt", 0).await.unwrap();
    assert_eq!(entry.size_bytes, 100 * KB as u64);
    assert_eq!(entry.ref_count, 0);
    assert!(!entry.stale);
    assert!(env.temp.path().join("a.txt_v0").exists());
}

#[tokio::test]
async fn cache_hit_moves_no_bytes() {
    let env = common::setup(1024 * KB as u64);
    env.remote.add_file("a.txt", &vec![5u8; 10 * KB]);

    let mut first = env.session();
    let fd = first.open("a.txt", OpenOption::Read).await;
    first.close(fd as u64).await;
    assert_eq!(env.remote.chunk_download_count(), 1);

    // the second open resolves against the probe alone
    let mut second = env.session();
    let fd = second.open("a.txt", OpenOption::Read).await;
    assert!(fd >= 0);
    assert_eq!(env.entry("a.txt", 0).await.unwrap().ref_count, 1);

    let (code, data) = second.read(fd as u64, 10 * KB as u64).await;
    assert_eq!(code, 10 * KB as i64);
    assert_eq!(data, vec![5u8; 10 * KB]);
    second.close(fd as u64).await;

    assert_eq!(env.remote.probe_count(), 2);
    assert_eq!(env.remote.chunk_download_count(), 1);

    let entry = env.entry("a.txt", 0).await.unwrap();
    assert_eq!(entry.ref_count, 0);
    assert_eq!(entry.lru_tick, 0);
}

#[tokio::test]
async fn written_bytes_visible_to_later_readers() {
    let env = common::setup(1024 * KB as u64);
    env.remote.add_file("w.txt", b"old contents");

    let mut writer = env.session();
    let fd = writer.open("w.txt", OpenOption::Write).await;
    assert!(fd >= 0);
    assert_eq!(writer.write(fd as u64, b"NEW").await, 3);
    assert_eq!(writer.close(fd as u64).await, 0);

    let mut reader = env.session();
    let fd = reader.open("w.txt", OpenOption::Read).await;
    assert!(fd >= 0);
    let (code, data) = reader.read(fd as u64, 64).await;
    assert_eq!(code, 12);
    assert_eq!(data, b"NEW contents");
    reader.close(fd as u64).await;
}

#[tokio::test]
async fn directory_open_yields_sentinel() {
    let env = common::setup(1024 * KB as u64);
    env.remote.add_dir("docs");

    let mut session = env.session();
    let fd = session.open("docs", OpenOption::Read).await;
    assert!(fd >= 0);

    let (code, data) = session.read(fd as u64, 16).await;
    assert_eq!(code, errno::EISDIR);
    assert!(data.is_empty());

    assert_eq!(session.close(fd as u64).await, 0);
}

#[tokio::test]
async fn descriptors_are_not_recycled() {
    let env = common::setup(1024 * KB as u64);
    env.remote.add_file("a.txt", b"x");

    let mut session = env.session();
    let first = session.open("a.txt", OpenOption::Read).await;
    session.close(first as u64).await;
    let second = session.open("a.txt", OpenOption::Read).await;
    assert!(second > first);
    session.close(second as u64).await;
}
