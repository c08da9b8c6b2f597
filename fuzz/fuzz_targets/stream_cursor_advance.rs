#![no_main]

use libfuzzer_sys::fuzz_target;
use srt_client::StreamCursor;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let mut cursor = StreamCursor::default();
    let mut snapshot = String::new();
    let mut emitted = String::new();

    // Each line extends the cumulative snapshot, as a well-behaved server would.
    for line in raw.split('\n') {
        snapshot.push_str(line);
        let delta = cursor.advance(&snapshot).expect("growing snapshot");
        emitted.push_str(&delta);
        assert_eq!(cursor.offset(), snapshot.len());
    }
    assert_eq!(emitted, snapshot);

    if let Some(space) = snapshot.find(' ') {
        assert_eq!(cursor.advance(&snapshot[..space]).expect("shrunk snapshot"), "");
    }
});
