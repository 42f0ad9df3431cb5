#![no_main]
use libfuzzer_sys::fuzz_target;

use serlog::decode::Utf8Decoder;

fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(data.len());
    let (first, second) = data.split_at(split);

    let mut decoder = Utf8Decoder::new();
    let mut decoded = decoder.decode(first);
    decoded.push_str(&decoder.decode(second));
    assert!(decoder.pending() < 4);

    if let Ok(expected) = std::str::from_utf8(data) {
        assert_eq!(decoded, expected);
        assert_eq!(decoder.pending(), 0);
    }
});
