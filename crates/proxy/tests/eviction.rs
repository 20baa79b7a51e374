//! Integration tests for the eviction discipline under real sessions

mod common;

use proxy::prelude::*;

const KB: usize = 1024;

#[tokio::test]
async fn pinned_entries_survive_eviction() {
    let env = common::setup(300 * KB as u64);
    env.remote.add_file("f1", &vec![1u8; 200 * KB]);
    env.remote.add_file("f2", &vec![2u8; 200 * KB]);
    env.remote.add_file("f3", &vec![3u8; 200 * KB]);

    let mut a = env.session();
    let fd1 = a.open("f1", OpenOption::Read).await;
    assert!(fd1 >= 0);

    // f1 is pinned, so fetching f2 cannot evict it: the store runs over
    // budget rather than fail the open
    let mut b = env.session();
    let fd2 = b.open("f2", OpenOption::Read).await;
    assert!(fd2 >= 0);
    assert!(env.entry("f1", 0).await.is_some());
    assert!(env.entry("f2", 0).await.is_some());
    assert_eq!(env.cache_size().await, 400 * KB as u64);

    b.close(fd2 as u64).await;
    a.close(fd1 as u64).await;

    // with everything unpinned the next open squeezes back under budget
    let mut c = env.session();
    let fd3 = c.open("f3", OpenOption::Read).await;
    assert!(fd3 >= 0);
    assert!(env.entry("f3", 0).await.is_some());
    assert!(env.entry("f1", 0).await.is_none());
    assert!(!env.temp.path().join("f1_v0").exists());
    assert!(env.cache_size().await <= 300 * KB as u64);
    c.close(fd3 as u64).await;
}

#[tokio::test]
async fn quiescent_cache_respects_budget() {
    let env = common::setup(64 * KB as u64);
    for name in ["a", "b", "c", "d"] {
        env.remote.add_file(name, &vec![7u8; 30 * KB]);
    }

    // serial opens and closes; never more than one pin at a time
    for name in ["a", "b", "c", "d", "a", "c"] {
        let mut session = env.session();
        let fd = session.open(name, OpenOption::Read).await;
        assert!(fd >= 0);
        session.close(fd as u64).await;
        assert!(env.cache_size().await <= 64 * KB as u64);
    }
}

#[tokio::test]
async fn hit_after_eviction_refetches() {
    let env = common::setup(40 * KB as u64);
    env.remote.add_file("x", &vec![1u8; 30 * KB]);
    env.remote.add_file("y", &vec![2u8; 30 * KB]);

    let mut session = env.session();
    let fd = session.open("x", OpenOption::Read).await;
    session.close(fd as u64).await;
    assert_eq!(env.remote.chunk_download_count(), 1);

    // y displaces x
    let fd = session.open("y", OpenOption::Read).await;
    session.close(fd as u64).await;
    assert!(env.entry("x", 0).await.is_none());

    // x must be fetched again
    let fd = session.open("x", OpenOption::Read).await;
    assert!(fd >= 0);
    session.close(fd as u64).await;
    assert_eq!(env.remote.chunk_download_count(), 3);
}
