// Minimal walkthrough: encode a target against a dictionary, print the
// delta, decode it back.
//
//     cargo run --example basic_encode_decode

use vcdelta::checksum::adler32;
use vcdelta::encoder::CodeTableWriter;
use vcdelta::format::{VCD_FORMAT_CHECKSUM, VCD_FORMAT_INTERLEAVED};
use vcdelta::stream::decode_memory;

fn main() {
    let dictionary = b"The quick brown fox jumps over the lazy dog.";
    let target = b"The quick brown cat jumps over the lazy dog!";

    let mut delta = Vec::new();
    let mut writer = CodeTableWriter::new(true);
    writer
        .write_header(&mut delta, VCD_FORMAT_INTERLEAVED | VCD_FORMAT_CHECKSUM)
        .unwrap();
    writer.init(dictionary.len() as u64);

    writer.copy(0, 16).unwrap(); // "The quick brown "
    writer.add(b"cat").unwrap();
    writer.copy(19, 24).unwrap(); // " jumps over the lazy dog"
    writer.add(b"!").unwrap();
    writer.add_checksum(adler32(target));
    writer.output(&mut delta).unwrap();

    println!("dictionary: {} bytes", dictionary.len());
    println!("target:     {} bytes", target.len());
    println!("delta:      {} bytes", delta.len());
    println!("delta hex:  {}", hex(&delta));

    let decoded = decode_memory(&delta, dictionary).unwrap();
    assert_eq!(decoded, target);
    println!("decoded:    {:?}", String::from_utf8_lossy(&decoded));
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
