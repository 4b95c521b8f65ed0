//! End-to-end tests of the storage layer through the public surface.

use burrow_core::{EnvConfig, Environment, Registry, StoreError, LOG_BUFFER_SIZE};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn plugin_state_survives_a_bot_restart() {
    let dir = tempdir().unwrap();

    // first bot session
    {
        let registry = Registry::new(dir.path());

        let seen = registry.open_tree("seen", false).unwrap();
        seen.set("Alice", b"2026-08-07 #rust".to_vec()).unwrap();
        seen.set("bob", b"2026-08-06 #bots".to_vec()).unwrap();

        let cache = registry.open_hash("weather-cache", false).unwrap();
        cache.set(b"berlin", b"overcast".to_vec()).unwrap();
        cache.close().unwrap();

        registry.shutdown();
    }

    // second bot session
    {
        let registry = Registry::new(dir.path());

        let seen = registry.open_tree("seen", false).unwrap();
        assert_eq!(
            seen.get("ALICE").unwrap(),
            Some(b"2026-08-07 #rust".to_vec())
        );
        assert_eq!(seen.get("Bob").unwrap(), Some(b"2026-08-06 #bots".to_vec()));

        let cache = registry.open_hash("weather-cache", false).unwrap();
        assert_eq!(cache.get(b"berlin").unwrap(), Some(b"overcast".to_vec()));

        registry.shutdown();
    }
}

#[test]
fn case_equivalent_keys_resolve_to_one_slot() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path());
    let users = registry.open_tree("users", false).unwrap();

    users.set("Alice", b"admin".to_vec()).unwrap();
    users.set("ALICE", b"guest".to_vec()).unwrap();

    // one slot, last write wins, last spelling wins
    assert_eq!(users.len().unwrap(), 1);
    assert_eq!(users.get("alice").unwrap(), Some(b"guest".to_vec()));
    let entries: Vec<(String, Vec<u8>)> = users.iter().unwrap().collect();
    assert_eq!(entries, vec![("ALICE".to_string(), b"guest".to_vec())]);
}

#[test]
fn concurrent_writers_do_not_corrupt_shared_environment() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(Registry::new(dir.path()));

    const WRITERS: usize = 8;
    const KEYS_PER_WRITER: usize = 20;

    std::thread::scope(|scope| {
        for writer in 0..WRITERS {
            let registry = Arc::clone(&registry);
            scope.spawn(move || {
                let name = if writer % 2 == 0 { "polls" } else { "quotes" };
                let tree = registry.open_tree(name, false).unwrap();
                for i in 0..KEYS_PER_WRITER {
                    tree.set(&format!("writer{writer}-key{i}"), format!("value{i}"))
                        .unwrap();
                }
            });
        }
    });

    let polls = registry.open_tree("polls", false).unwrap();
    let quotes = registry.open_tree("quotes", false).unwrap();
    assert_eq!(polls.len().unwrap(), WRITERS / 2 * KEYS_PER_WRITER);
    assert_eq!(quotes.len().unwrap(), WRITERS / 2 * KEYS_PER_WRITER);

    for writer in 0..WRITERS {
        let tree = if writer % 2 == 0 { &polls } else { &quotes };
        for i in 0..KEYS_PER_WRITER {
            assert_eq!(
                tree.get(&format!("writer{writer}-key{i}")).unwrap(),
                Some(format!("value{i}").into_bytes()),
                "write from writer {writer} lost"
            );
        }
    }

    // everything above also survives a restart
    registry.shutdown();
    let registry = Registry::new(dir.path());
    let polls = registry.open_tree("polls", false).unwrap();
    assert_eq!(polls.len().unwrap(), WRITERS / 2 * KEYS_PER_WRITER);
}

#[test]
fn open_transaction_blocks_destructive_cleanup() {
    let dir = tempdir().unwrap();

    {
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let users = env.tree("users", false).unwrap();
        users.set("alice", b"admin".to_vec()).unwrap();

        // deliberately leave a transaction open across shutdown
        let mut txn = env.begin().unwrap();
        txn.put(&users, "pending", b"never-committed".to_vec())
            .unwrap();
        assert_eq!(env.active_transactions(), 1);

        env.shutdown().unwrap();

        // the working state must still be there
        assert!(dir.path().join("ENVIRONMENT").exists());
        assert!(dir.path().join("env.lock").exists());
    }

    // a fresh process recovers the committed data and sees a clean slate
    let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
    let users = env.tree("users", false).unwrap();
    assert_eq!(users.get("alice").unwrap(), Some(b"admin".to_vec()));
    assert_eq!(users.get("pending").unwrap(), None);
    assert_eq!(env.active_transactions(), 0);
    env.shutdown().unwrap();
}

#[test]
fn recycled_segments_are_gone_and_unneeded() {
    let dir = tempdir().unwrap();
    let config = EnvConfig::new().max_log_size(4 * LOG_BUFFER_SIZE as u64);
    let registry = Registry::with_config(dir.path(), config);

    let archive = registry.open_tree("archive", false).unwrap();
    let blob = vec![0xABu8; 16 * 1024];
    for i in 0..32 {
        archive.set(&format!("entry-{i:03}"), blob.clone()).unwrap();
    }

    let before = registry.stats().unwrap().log_segments;
    assert!(before > 1, "expected the log to have rotated");

    registry.checkpoint();
    let recycled = registry.recycle_logs();
    assert!(!recycled.is_empty());
    for path in &recycled {
        assert!(!Path::new(path).exists(), "recycled segment still on disk");
    }

    // recycling kept everything recovery needs
    registry.shutdown();
    let registry = Registry::new(dir.path());
    let archive = registry.open_tree("archive", false).unwrap();
    assert_eq!(archive.len().unwrap(), 32);
    assert_eq!(archive.get("entry-031").unwrap(), Some(blob));
}

#[test]
fn range_queries_follow_folded_order_across_restart() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path());
        let index = registry.open_tree("index", false).unwrap();
        for key in ["Zebra", "apple", "Mango", "banana", "CHERRY"] {
            index.set(key, key.to_lowercase().into_bytes()).unwrap();
        }
        registry.shutdown();
    }

    let registry = Registry::new(dir.path());
    let index = registry.open_tree("index", false).unwrap();

    let keys: Vec<String> = index.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["apple", "banana", "CHERRY", "Mango", "Zebra"]);

    let slice: Vec<String> = index
        .range("BANANA".."mango")
        .unwrap()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(slice, vec!["banana", "CHERRY"]);
}

#[test]
fn second_environment_on_one_directory_is_locked_out() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path());
    let registry2 = Registry::new(dir.path());

    let _first = registry.open_tree("contested", false).unwrap();

    // a second environment over the same directory is refused outright;
    // two-process access is unsupported and fails fast instead of corrupting
    let second = registry2.open_tree("contested", false);
    assert!(matches!(second, Err(StoreError::EnvironmentLocked)));
}

#[test]
fn absolute_identifiers_live_outside_the_config_dir() {
    let config_dir = tempdir().unwrap();
    let elsewhere = tempdir().unwrap();
    let target = elsewhere.path().join("shared.state");

    let registry = Registry::new(config_dir.path());
    let tree = registry
        .open_tree(target.to_str().unwrap(), true)
        .unwrap();
    tree.set("k", b"v".to_vec()).unwrap();

    assert!(target.exists());
    assert!(!config_dir.path().join("shared.state.db").exists());
    registry.shutdown();
}
