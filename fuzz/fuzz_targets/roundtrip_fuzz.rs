#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::encoder::CodeTableWriter;
use vcdelta::format::VCD_FORMAT_INTERLEAVED;
use vcdelta::stream::decode_memory;

// Interpret fuzz input as (dictionary, instruction script), encode, decode,
// and require an exact roundtrip.
fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let (dictionary, script) = data.split_at(data.len() / 2);

    let mut delta = Vec::new();
    let mut w = CodeTableWriter::new(true);
    w.write_header(&mut delta, VCD_FORMAT_INTERLEAVED).unwrap();
    w.init(dictionary.len() as u64);

    let mut target = Vec::new();
    for chunk in script.chunks(3) {
        let (kind, a, b) = match chunk {
            [k, a, b] => (*k, *a, *b),
            _ => break,
        };
        let len = 1 + usize::from(a) % 32;
        match kind % 3 {
            0 => {
                let literal = vec![b; len];
                w.add(&literal).unwrap();
                target.extend_from_slice(&literal);
            }
            1 => {
                let space = dictionary.len() + target.len();
                if space == 0 {
                    continue;
                }
                let addr = (usize::from(a) << 8 | usize::from(b)) % space;
                w.copy(addr as u64, len as u32).unwrap();
                for i in 0..len {
                    let p = addr + i;
                    let byte = if p < dictionary.len() {
                        dictionary[p]
                    } else {
                        target[p - dictionary.len()]
                    };
                    target.push(byte);
                }
            }
            _ => {
                w.run(len as u32, b).unwrap();
                target.extend(std::iter::repeat_n(b, len));
            }
        }
    }
    w.output(&mut delta).unwrap();

    let decoded = decode_memory(&delta, dictionary).unwrap();
    assert_eq!(decoded, target);
});
