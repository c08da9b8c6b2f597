#![no_main]

use libfuzzer_sys::fuzz_target;
use srt_client::{GenerateStream, SrtErrorKind};

fuzz_target!(|data: &[u8]| {
    let mut stream = GenerateStream::new(data);
    let mut emitted = String::new();
    for item in stream.by_ref() {
        match item {
            Ok(delta) => emitted.push_str(&delta.text),
            Err(error) => {
                assert_eq!(error.kind(), SrtErrorKind::Protocol);
                assert!(stream.is_finished());
            }
        }
    }
    assert!(stream.is_finished());
    assert!(stream.next().is_none());
    assert_eq!(stream.cursor().offset(), emitted.len());
});
