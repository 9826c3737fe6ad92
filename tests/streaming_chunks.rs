// Chunked decoding tests: the decoder must accept input split at any byte
// boundary and produce output identical to a whole-file decode, and it must
// flag truncation only at finish time.

use vcdelta::checksum::adler32;
use vcdelta::encoder::CodeTableWriter;
use vcdelta::format::{VCD_FORMAT_CHECKSUM, VCD_FORMAT_INTERLEAVED};
use vcdelta::stream::{StreamingDecoder, decode_memory};

fn sample_delta(interleaved: bool) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let dictionary: Vec<u8> = (0..512u32).map(|i| (i * 7 % 256) as u8).collect();

    let mut target = Vec::new();
    let mut delta = Vec::new();
    let mut w = CodeTableWriter::new(interleaved);
    let mut extensions = VCD_FORMAT_CHECKSUM;
    if interleaved {
        extensions |= VCD_FORMAT_INTERLEAVED;
    }
    w.write_header(&mut delta, extensions).unwrap();
    w.init(dictionary.len() as u64);

    // Window 1: copies, a literal, a run.
    w.copy(0, 100).unwrap();
    target.extend_from_slice(&dictionary[..100]);
    w.add(b"interleaved streams tolerate any chunking").unwrap();
    target.extend_from_slice(b"interleaved streams tolerate any chunking");
    w.run(33, 0x5A).unwrap();
    target.extend(std::iter::repeat_n(0x5A, 33));
    w.add_checksum(adler32(&target));
    w.output(&mut delta).unwrap();

    // Window 2: self-referencing expansion.
    let start = target.len();
    w.run(1, b'=').unwrap();
    w.copy(512, 63).unwrap();
    w.copy(100, 50).unwrap();
    let mut window2 = vec![b'='; 64];
    window2.extend_from_slice(&dictionary[100..150]);
    target.extend_from_slice(&window2);
    w.add_checksum(adler32(&target[start..]));
    w.output(&mut delta).unwrap();

    (delta, dictionary, target)
}

#[test]
fn chunk_size_sweep_matches_whole_file() {
    for interleaved in [false, true] {
        let (delta, dictionary, target) = sample_delta(interleaved);
        let whole = decode_memory(&delta, &dictionary).unwrap();
        assert_eq!(whole, target);

        for chunk_size in 1..=delta.len() {
            let mut d = StreamingDecoder::new();
            d.start_decoding(&dictionary);
            let mut out = Vec::new();
            for chunk in delta.chunks(chunk_size) {
                d.decode_chunk(chunk, &mut out)
                    .unwrap_or_else(|e| panic!("chunk_size={chunk_size}: {e}"));
            }
            d.finish_decoding().unwrap();
            assert_eq!(out, target, "chunk_size={chunk_size}");
        }
    }
}

#[test]
fn single_byte_feed_never_fails_midstream() {
    let (delta, dictionary, target) = sample_delta(true);
    let mut d = StreamingDecoder::new();
    d.start_decoding(&dictionary);
    let mut out = Vec::new();
    for (i, &byte) in delta.iter().enumerate() {
        d.decode_chunk(&[byte], &mut out)
            .unwrap_or_else(|e| panic!("failed at byte {i}: {e}"));
    }
    d.finish_decoding().unwrap();
    assert_eq!(out, target);
}

#[test]
fn every_truncation_point_fails_finish() {
    let (delta, dictionary, _) = sample_delta(true);
    for cut in 0..delta.len() {
        let mut d = StreamingDecoder::new();
        d.start_decoding(&dictionary);
        let mut out = Vec::new();
        for &byte in &delta[..cut] {
            d.decode_chunk(&[byte], &mut out)
                .unwrap_or_else(|e| panic!("cut={cut}: mid-stream error {e}"));
        }
        assert!(d.finish_decoding().is_err(), "cut={cut} went unnoticed");
    }
}

#[test]
fn windows_are_emitted_as_they_complete() {
    let (delta, dictionary, target) = sample_delta(false);

    // Find how much output exists after feeding everything but the last
    // byte: the first window must already have been flushed.
    let mut d = StreamingDecoder::new();
    d.start_decoding(&dictionary);
    let mut out = Vec::new();
    d.decode_chunk(&delta[..delta.len() - 1], &mut out).unwrap();
    assert!(!out.is_empty(), "first window should be flushed eagerly");
    assert!(out.len() < target.len());
    assert_eq!(out[..], target[..out.len()]);

    d.decode_chunk(&delta[delta.len() - 1..], &mut out).unwrap();
    d.finish_decoding().unwrap();
    assert_eq!(out, target);
}

#[test]
fn interleaved_and_segregated_decode_identically() {
    let (delta_i, dictionary, target) = sample_delta(true);
    let (delta_s, _, target_s) = sample_delta(false);
    assert_eq!(target, target_s);
    assert_eq!(decode_memory(&delta_i, &dictionary).unwrap(), target);
    assert_eq!(decode_memory(&delta_s, &dictionary).unwrap(), target);
    // The layouts differ on the wire even though the content matches.
    assert_ne!(delta_i, delta_s);
}
