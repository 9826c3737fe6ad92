#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::stream::decode_memory;

fuzz_target!(|data: &[u8]| {
    // The decoder must never panic on arbitrary bytes — only return errors.
    let _ = decode_memory(data, &[]);

    // Also with a non-empty dictionary.
    if data.len() >= 2 {
        let split = data.len() / 2;
        let (dictionary, delta) = data.split_at(split);
        let _ = decode_memory(delta, dictionary);
    }
});
