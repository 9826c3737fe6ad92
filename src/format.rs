// VCDIFF delta file framing constants (RFC 3284, Section 4) and the SDCH
// format extensions layered on top of the draft standard.

/// First three bytes of every delta file: "VCD" with the high bit set.
pub const VCDIFF_MAGIC: [u8; 3] = [0xD6, 0xC3, 0xC4];

/// Fourth header byte of a draft-standard delta file.
pub const VCD_STANDARD_VERSION: u8 = 0x00;
/// Fourth header byte when SDCH format extensions are in use.
pub const VCD_SDCH_VERSION: u8 = b'S';

/// Delta file header length: magic, version byte, Hdr_Indicator.
pub const DELTA_FILE_HEADER_SIZE: usize = 5;

// ---------------------------------------------------------------------------
// Hdr_Indicator bits
// ---------------------------------------------------------------------------

/// Secondary compressor present (never emitted, rejected on decode).
pub const VCD_DECOMPRESS: u8 = 0x01;
/// A custom code table is embedded in the delta file.
pub const VCD_CODETABLE: u8 = 0x02;
/// Mask of reserved Hdr_Indicator bits.
pub const VCD_INVALID_HDR: u8 = !(VCD_DECOMPRESS | VCD_CODETABLE);

// ---------------------------------------------------------------------------
// Win_Indicator bits
// ---------------------------------------------------------------------------

/// The window copies from the dictionary.
pub const VCD_SOURCE: u8 = 0x01;
/// The window copies from the already-decoded target.
pub const VCD_TARGET: u8 = 0x02;
/// SDCH extension: an Adler32 of the target window follows the section sizes.
pub const VCD_CHECKSUM: u8 = 0x04;
/// Mask of reserved Win_Indicator bits.
pub const VCD_INVALID_WIN: u8 = !(VCD_SOURCE | VCD_TARGET | VCD_CHECKSUM);

// ---------------------------------------------------------------------------
// Format extension flags (encoder configuration, see `write_header`)
// ---------------------------------------------------------------------------

/// Emit windows in the interleaved (single-stream) layout.
pub const VCD_FORMAT_INTERLEAVED: u8 = 0x01;
/// Emit an Adler32 checksum with each window.
pub const VCD_FORMAT_CHECKSUM: u8 = 0x02;

// ---------------------------------------------------------------------------
// Decoder limits
// ---------------------------------------------------------------------------

/// Default cap on the total decoded target size (64 MiB).
pub const DEFAULT_MAX_TARGET_FILE_SIZE: u64 = 1 << 26;
/// Default cap on a single decoded target window (64 MiB).
pub const DEFAULT_MAX_TARGET_WINDOW_SIZE: u32 = 1 << 26;
/// Default cap on each of a window's three sections (64 MiB).
pub const DEFAULT_MAX_SECTION_SIZE: usize = 1 << 26;
