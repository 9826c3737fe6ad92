//! VCDIFF (RFC 3284) delta encoding and decoding, SDCH dialect.
//!
//! Given a shared *dictionary*, the encoder turns a sequence of
//! ADD/RUN/COPY instructions into a compact delta file; the decoder
//! reconstructs the target byte-for-byte.  On top of the draft standard
//! this crate speaks the SDCH extensions: the interleaved window layout,
//! per-window Adler32 checksums, and custom code tables embedded as nested
//! delta files.
//!
//! The crate deliberately stops at the format layer.  Choosing good
//! ADD/COPY/RUN boundaries (the matching engine), dictionary management
//! and any file or transport plumbing belong to the caller.
//!
//! - [`CodeTableWriter`] — accumulates instructions and emits framed delta
//!   windows (`init`, `add`, `run`, `copy`, `add_checksum`, `output`).
//! - [`StreamingDecoder`] — chunk-oriented decoder; input may be split at
//!   any byte boundary, including one byte at a time.
//! - [`decode_memory`] — one-shot decoding of an in-memory delta file.
//!
//! # Quick start
//!
//! ```
//! use vcdelta::{CodeTableWriter, decode_memory, format};
//!
//! let dictionary = b"hello old world";
//!
//! let mut delta = Vec::new();
//! let mut writer = CodeTableWriter::new(true);
//! writer
//!     .write_header(&mut delta, format::VCD_FORMAT_INTERLEAVED)
//!     .unwrap();
//! writer.init(dictionary.len() as u64);
//! writer.copy(0, 6).unwrap(); // "hello "
//! writer.add(b"new").unwrap();
//! writer.copy(9, 6).unwrap(); // " world"
//! writer.output(&mut delta).unwrap();
//!
//! let target = decode_memory(&delta, dictionary).unwrap();
//! assert_eq!(target, b"hello new world");
//! ```

pub mod address_cache;
pub mod checksum;
pub mod code_table;
pub mod decoder;
pub mod encoder;
pub mod format;
pub mod instruction_map;
pub mod stream;
pub mod varint;

pub use address_cache::AddressCache;
pub use code_table::{CodeTableData, CodeTableEntry, CodeTableError};
pub use decoder::DecodeError;
pub use encoder::{CodeTableWriter, EncodeError};
pub use instruction_map::InstructionMap;
pub use stream::{StreamingDecoder, decode_memory};
