use bitcaspy::{BitCaspy, Config};
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};
use std::time::{Duration, Instant, SystemTime};

fn main() -> bitcaspy::Result<()> {
    let debug = std::env::args().any(|arg| arg == "--debug");

    TermLogger::init(
        if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .ok();

    let store = BitCaspy::open(Config::new("bitcaspy_data").debug(debug))?;

    store.put(b"hello", b"world")?;
    eprintln!("hello -> {:?}", String::from_utf8_lossy(&store.get(b"hello")?));

    store.put_with_expiry(
        b"ephemeral",
        b"gone soon",
        SystemTime::now() + Duration::from_secs(60),
    )?;

    for i in 0..1_000u32 {
        store.put(format!("key_{i}").as_bytes(), &i.to_le_bytes())?;
    }

    let count = store.fold(0usize, |_, _, acc| acc + 1)?;
    eprintln!("store holds {count} keys");

    for _ in 0..5 {
        let before = Instant::now();
        store.get(b"key_500")?;
        eprintln!("point read in {:?}ns", before.elapsed().as_nanos());
    }

    store.delete(b"hello")?;
    store.close()
}
