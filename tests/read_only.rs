use bitcaspy::{BitCaspy, Config, Error};
use test_log::test;

#[test]
fn read_only_rejects_mutations() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let store = BitCaspy::open(Config::new(folder.path()))?;
        store.put(b"k", b"v")?;
        store.close()?;
    }

    let store = BitCaspy::open(Config::new(folder.path()).read_only(true))?;

    assert_eq!(b"v".to_vec(), store.get(b"k")?);

    assert!(matches!(store.put(b"x", b"y"), Err(Error::ReadOnly)));
    assert!(matches!(store.delete(b"k"), Err(Error::ReadOnly)));
    assert!(matches!(store.sync(), Err(Error::ReadOnly)));

    // a read-only store does not take the directory lock
    assert!(!folder.path().join("bitcaspy.lock").try_exists()?);

    store.close()
}

#[test]
fn second_writable_open_fails() -> bitcaspy::Result<()> {
    let folder = tempfile::tempdir()?;

    let store = BitCaspy::open(Config::new(folder.path()))?;
    store.put(b"k", b"v")?;

    assert!(matches!(
        BitCaspy::open(Config::new(folder.path())),
        Err(Error::AlreadyLocked)
    ));

    // a read-only open is still allowed next to a writer
    let reader = BitCaspy::open(Config::new(folder.path()).read_only(true))?;
    reader.close()?;

    store.close()?;

    // the lock dies with the store
    BitCaspy::open(Config::new(folder.path()))?.close()
}
