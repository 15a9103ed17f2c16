use bitcaspy::{BitCaspy, Config, Error};
use test_log::test;

#[test]
fn put_then_get() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    store.put(b"alpha", b"one")?;
    assert_eq!(b"one".to_vec(), store.get(b"alpha")?);

    store.close()
}

#[test]
fn overwrite_then_delete() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    store.put(b"k", b"v1")?;
    store.put(b"k", b"v2")?;
    assert_eq!(b"v2".to_vec(), store.get(b"k")?);

    store.delete(b"k")?;
    assert!(matches!(store.get(b"k"), Err(Error::KeyNotFound)));

    // deleting an absent key still succeeds
    store.delete(b"never existed")?;

    store.close()
}

#[test]
fn missing_key() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    assert!(matches!(store.get(b"nope"), Err(Error::KeyNotFound)));

    store.close()
}

#[test]
fn rejects_empty_key() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    assert!(matches!(store.put(b"", b"value"), Err(Error::EmptyKey)));

    // put rejects empty keys, so an empty key can never exist; deleting
    // one is the usual absent-key success
    store.delete(b"")?;
    assert!(matches!(store.get(b""), Err(Error::KeyNotFound)));

    store.close()
}

#[test]
fn binary_keys_and_values() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    let key = [0u8, 255, 1, 128];
    let value = (0..=255u8).collect::<Vec<_>>();

    store.put(&key, &value)?;
    assert_eq!(value, store.get(&key)?);

    store.close()
}

#[test]
fn always_fsync_round_trip() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()).always_fsync(true))?;

    store.put(b"durable", b"yes")?;
    assert_eq!(b"yes".to_vec(), store.get(b"durable")?);

    store.close()
}

#[test]
fn close_is_idempotent() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;
    store.put(b"k", b"v")?;

    store.close()?;
    store.close()?;

    assert!(matches!(store.get(b"k"), Err(Error::Closed)));
    assert!(matches!(store.put(b"k", b"v"), Err(Error::Closed)));
    assert!(matches!(store.sync(), Err(Error::Closed)));

    Ok(())
}

#[test]
fn explicit_sync() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    store.put(b"k", b"v")?;
    store.sync()?;

    assert_eq!(b"v".to_vec(), store.get(b"k")?);

    store.close()
}
