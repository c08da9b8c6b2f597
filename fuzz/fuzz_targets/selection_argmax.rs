#![no_main]

use libfuzzer_sys::fuzz_target;
use srt_client::argmax_first;

fuzz_target!(|data: &[u8]| {
    let scores: Vec<f64> = data
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0_u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect();

    match argmax_first(&scores) {
        Some(index) => {
            let best = scores[index];
            if best.is_nan() {
                assert_eq!(index, 0);
                assert!(scores.iter().all(|score| score.is_nan()));
                return;
            }
            for (position, score) in scores.iter().enumerate() {
                if score.is_nan() {
                    continue;
                }
                assert!(*score <= best);
                if position < index {
                    assert!(*score < best);
                }
            }
        }
        None => assert!(scores.is_empty()),
    }
});
