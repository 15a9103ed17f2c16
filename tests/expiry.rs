use bitcaspy::{BitCaspy, Config, Error};
use std::time::{Duration, SystemTime};
use test_log::test;

#[test]
fn get_after_expiry() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    store.put_with_expiry(b"e", b"x", SystemTime::now() + Duration::from_secs(1))?;
    assert_eq!(b"x".to_vec(), store.get(b"e")?);

    std::thread::sleep(Duration::from_secs(2));

    assert!(matches!(store.get(b"e"), Err(Error::KeyExpired)));

    store.close()
}

#[test]
fn unexpired_key_survives() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    store.put_with_expiry(b"later", b"v", SystemTime::now() + Duration::from_secs(3_600))?;
    assert_eq!(b"v".to_vec(), store.get(b"later")?);

    store.close()
}

#[test]
fn compaction_drops_expired_keys() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;

    store.put(b"keep", b"forever")?;
    store.put_with_expiry(b"gone", b"x", SystemTime::now() + Duration::from_secs(1))?;

    std::thread::sleep(Duration::from_secs(2));

    store.compact()?;

    assert!(matches!(store.get(b"gone"), Err(Error::KeyNotFound)));
    assert_eq!(b"forever".to_vec(), store.get(b"keep")?);

    store.close()
}

#[test]
fn expiry_survives_reopen() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let store = BitCaspy::open(Config::new(folder.path()))?;
        store.put_with_expiry(b"e", b"x", SystemTime::now() + Duration::from_secs(1))?;
        store.close()?;
    }

    std::thread::sleep(Duration::from_secs(2));

    let store = BitCaspy::open(Config::new(folder.path()))?;
    assert!(matches!(store.get(b"e"), Err(Error::KeyExpired)));

    store.close()
}
