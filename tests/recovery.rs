use bitcaspy::{BitCaspy, Config, Error};
use test_log::test;

const KEYS: [&[u8]; 5] = [b"a", b"b", b"c", b"d", b"e"];

fn seed(folder: &std::path::Path) -> bitcaspy::Result<()> {
    let store = BitCaspy::open(Config::new(folder))?;

    for key in KEYS {
        let mut value = key.to_vec();
        value.extend_from_slice(b"-value");
        store.put(key, &value)?;
    }

    store.close()
}

fn assert_seeded(store: &BitCaspy) -> bitcaspy::Result<()> {
    for key in KEYS {
        let mut expected = key.to_vec();
        expected.extend_from_slice(b"-value");
        assert_eq!(expected, store.get(key)?);
    }

    Ok(())
}

#[test]
fn reopen_uses_hint_file() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    seed(folder.path())?;
    assert!(folder.path().join("bitcaspy.hints").try_exists()?);

    let store = BitCaspy::open(Config::new(folder.path()))?;
    assert_seeded(&store)?;

    store.close()
}

#[test]
fn reopen_without_hint_file_scans_segments() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let store = BitCaspy::open(Config::new(folder.path()))?;

        for key in KEYS {
            let mut value = key.to_vec();
            value.extend_from_slice(b"-value");
            store.put(key, &value)?;
        }

        store.put(b"a", b"a-final")?;
        store.delete(b"e")?;
        store.close()?;
    }

    std::fs::remove_file(folder.path().join("bitcaspy.hints"))?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    // latest write wins, tombstones suppress earlier records
    assert_eq!(b"a-final".to_vec(), store.get(b"a")?);
    assert!(matches!(store.get(b"e"), Err(Error::KeyNotFound)));

    for key in [b"b", b"c", b"d"] {
        let mut expected = key.to_vec();
        expected.extend_from_slice(b"-value");
        assert_eq!(expected, store.get(key)?);
    }

    store.close()
}

#[test]
fn reopen_with_corrupt_hint_file_scans_segments() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    seed(folder.path())?;

    std::fs::write(folder.path().join("bitcaspy.hints"), b"total garbage")?;

    let store = BitCaspy::open(Config::new(folder.path()))?;
    assert_seeded(&store)?;

    store.close()
}

#[test]
fn reopen_after_rotation() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let value = vec![42u8; 1_024];

    {
        let store = BitCaspy::open(
            Config::new(folder.path()).max_active_file_size(4 * 1_024),
        )?;

        for i in 0..50 {
            store.put(format!("key_{i}").as_bytes(), &value)?;
            store.rotate_if_needed()?;
        }

        store.close()?;
    }

    let store = BitCaspy::open(Config::new(folder.path()))?;

    for i in 0..50 {
        assert_eq!(value, store.get(format!("key_{i}").as_bytes())?);
    }

    store.close()
}

#[test]
fn stale_hint_file_triggers_scan() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let value = vec![9u8; 512];

    {
        let store = BitCaspy::open(
            Config::new(folder.path()).max_active_file_size(1_024),
        )?;

        for i in 0..20 {
            store.put(format!("key_{i}").as_bytes(), &value)?;
            store.rotate_if_needed()?;
        }

        store.close()?;
    }

    // hints now reference several segments
    let pre_merge_hints = std::fs::read(folder.path().join("bitcaspy.hints"))?;

    {
        let store = BitCaspy::open(Config::new(folder.path()))?;
        store.compact()?;
        store.close()?;
    }

    // simulate a crash between the merge and the hint rewrite: the hint
    // file still points at segment files the merge deleted
    std::fs::write(folder.path().join("bitcaspy.hints"), pre_merge_hints)?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    for i in 0..20 {
        assert_eq!(value, store.get(format!("key_{i}").as_bytes())?);
    }

    store.close()
}

#[test]
fn fresh_directory_is_empty() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path().join("nested").join("dirs")))?;

    assert!(store.is_empty()?);

    store.close()
}
