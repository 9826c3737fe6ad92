// Randomized properties over the codec.
//
// Instruction scripts are derived from raw generated tuples, clamped
// against the evolving dictionary+target state so every script is legal.

use proptest::prelude::*;

use vcdelta::address_cache::AddressCache;
use vcdelta::checksum::adler32;
use vcdelta::encoder::CodeTableWriter;
use vcdelta::format::{VCD_FORMAT_CHECKSUM, VCD_FORMAT_INTERLEAVED};
use vcdelta::stream::{StreamingDecoder, decode_memory};
use vcdelta::varint;

/// Raw op: (kind selector, length seed, position/byte seed).
type RawOp = (u8, u16, u16);

/// Materialize a raw script into writer calls, building the target as we
/// go.  Returns (delta, target).
fn encode_script(
    dictionary: &[u8],
    script: &[RawOp],
    interleaved: bool,
    with_checksum: bool,
) -> (Vec<u8>, Vec<u8>) {
    let mut delta = Vec::new();
    let mut w = CodeTableWriter::new(interleaved);
    let mut extensions = if interleaved { VCD_FORMAT_INTERLEAVED } else { 0 };
    if with_checksum {
        extensions |= VCD_FORMAT_CHECKSUM;
    }
    w.write_header(&mut delta, extensions).unwrap();
    w.init(dictionary.len() as u64);

    let mut target = Vec::new();
    for &(kind, len_seed, pos_seed) in script {
        let len = 1 + usize::from(len_seed) % 64;
        match kind % 3 {
            0 => {
                // ADD pseudo-random literals.
                let data: Vec<u8> = (0..len)
                    .map(|i| (usize::from(pos_seed) + i * 31) as u8)
                    .collect();
                w.add(&data).unwrap();
                target.extend_from_slice(&data);
            }
            1 => {
                // COPY from anywhere already addressable.
                let space = dictionary.len() + target.len();
                if space == 0 {
                    continue;
                }
                let addr = usize::from(pos_seed) % space;
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
                let byte = pos_seed as u8;
                w.run(len as u32, byte).unwrap();
                target.extend(std::iter::repeat_n(byte, len));
            }
        }
    }
    if with_checksum {
        w.add_checksum(adler32(&target));
    }
    w.output(&mut delta).unwrap();
    (delta, target)
}

proptest! {
    #[test]
    fn prop_roundtrip_both_layouts(
        dictionary in proptest::collection::vec(any::<u8>(), 0..1024),
        script in proptest::collection::vec(any::<RawOp>(), 1..40),
        with_checksum in any::<bool>(),
    ) {
        for interleaved in [false, true] {
            let (delta, target) = encode_script(&dictionary, &script, interleaved, with_checksum);
            let decoded = decode_memory(&delta, &dictionary).unwrap();
            prop_assert_eq!(&decoded, &target, "interleaved={}", interleaved);
        }
    }

    #[test]
    fn prop_chunked_equals_whole(
        dictionary in proptest::collection::vec(any::<u8>(), 0..512),
        script in proptest::collection::vec(any::<RawOp>(), 1..20),
        chunk_size in 1usize..48,
    ) {
        let (delta, target) = encode_script(&dictionary, &script, true, true);
        let mut d = StreamingDecoder::new();
        d.start_decoding(&dictionary);
        let mut out = Vec::new();
        for chunk in delta.chunks(chunk_size) {
            d.decode_chunk(chunk, &mut out).unwrap();
        }
        d.finish_decoding().unwrap();
        prop_assert_eq!(out, target);
    }

    #[test]
    fn prop_predicted_window_size_is_exact(
        dictionary in proptest::collection::vec(any::<u8>(), 1..512),
        script in proptest::collection::vec(any::<RawOp>(), 1..20),
    ) {
        let mut w = CodeTableWriter::new(true);
        w.init(dictionary.len() as u64);
        let mut target_len = 0u64;
        for &(kind, len_seed, pos_seed) in &script {
            let len = 1 + usize::from(len_seed) % 64;
            match kind % 3 {
                0 => w.add(&vec![pos_seed as u8; len]).unwrap(),
                1 => {
                    let space = dictionary.len() as u64 + target_len;
                    w.copy(u64::from(pos_seed) % space, len as u32).unwrap();
                }
                _ => w.run(len as u32, pos_seed as u8).unwrap(),
            }
            target_len += len as u64;
        }
        let predicted = w.delta_window_size();
        let mut out = Vec::new();
        w.output(&mut out).unwrap();
        prop_assert_eq!(out.len() as u64, predicted);
    }

    #[test]
    fn prop_varint_roundtrip(value in any::<u64>()) {
        let mut buf = Vec::new();
        varint::push_u64(&mut buf, value);
        let (decoded, consumed) = varint::read_u64(&buf).unwrap();
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(consumed, buf.len());
        prop_assert_eq!(varint::sizeof_u64(value), buf.len());
    }

    #[test]
    fn prop_address_cache_stays_in_lockstep(
        seeds in proptest::collection::vec((any::<u64>(), 1u64..1_000_000), 1..64),
    ) {
        let mut enc = AddressCache::new();
        let mut dec = AddressCache::new();
        let mut here = 1u64;
        for (addr_seed, gap) in seeds {
            let addr = addr_seed % here;
            let (mode, encoded) = enc.encode(addr, here);
            let (decoded, consumed) = dec.decode(mode, encoded.as_bytes(), here).unwrap();
            prop_assert_eq!(decoded, addr);
            prop_assert_eq!(consumed, encoded.len());
            here += gap;
        }
    }

    #[test]
    fn prop_checksum_rejects_payload_mutations(
        payload in proptest::collection::vec(any::<u8>(), 1..256),
        flip_pos in any::<proptest::sample::Index>(),
        flip_bit in 0u8..8,
    ) {
        // A delta carrying a checksum: ADD the payload outright.
        let mut delta = Vec::new();
        let mut w = CodeTableWriter::new(true);
        w.write_header(&mut delta, VCD_FORMAT_INTERLEAVED | VCD_FORMAT_CHECKSUM).unwrap();
        w.init(0);
        w.add(&payload).unwrap();
        w.add_checksum(adler32(&payload));
        let window_start = delta.len();
        w.output(&mut delta).unwrap();

        prop_assert_eq!(&decode_memory(&delta, &[]).unwrap(), &payload);

        // Locate the payload inside the window and flip one bit of it.
        let window = delta[window_start..].to_vec();
        let pos = window
            .windows(payload.len())
            .rposition(|candidate| candidate == payload.as_slice())
            .expect("payload bytes present in the window");
        let target_pos = window_start + pos + flip_pos.index(payload.len());
        let mut tampered = delta.clone();
        tampered[target_pos] ^= 1 << flip_bit;
        prop_assert!(decode_memory(&tampered, &[]).is_err());
    }
}
