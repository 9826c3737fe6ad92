// VCDIFF window writer (RFC 3284, Section 4.3, SDCH dialect).
//
// `CodeTableWriter` turns a sequence of ADD/RUN/COPY instructions into
// framed delta windows.  Call sequence after construction:
//
//     init  {{add|run|copy}* [add_checksum] output}*
//
// Match-finding is the caller's job; this module is concerned only with
// format-level encoding.  `output` flushes one complete window and resets
// the writer for the next, so a single writer drives a whole session.
// Not thread-safe: one writer per encoding session.

use std::borrow::Cow;
use std::io::{self, Write};

use log::warn;

use crate::address_cache::AddressCache;
use crate::code_table::{
    CodeTableData, CodeTableError, DEFAULT_MAX_MODE, VCD_ADD, VCD_COPY, VCD_RUN, default_table,
};
use crate::format::{VCD_CHECKSUM, VCD_SOURCE, VCD_SDCH_VERSION, VCD_STANDARD_VERSION, VCDIFF_MAGIC};
use crate::instruction_map::{InstructionMap, default_instruction_map};
use crate::varint;

/// Five-byte header of a draft-standard delta file.
const HEADER_STANDARD_FORMAT: [u8; 5] = [
    VCDIFF_MAGIC[0],
    VCDIFF_MAGIC[1],
    VCDIFF_MAGIC[2],
    VCD_STANDARD_VERSION,
    0x00, // Hdr_Indicator: no secondary compression, no embedded code table
];

/// Five-byte header of a delta file using the SDCH format extensions.
const HEADER_EXTENDED_FORMAT: [u8; 5] = [
    VCDIFF_MAGIC[0],
    VCDIFF_MAGIC[1],
    VCDIFF_MAGIC[2],
    VCD_SDCH_VERSION,
    0x00,
];

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub struct CodeTableWriter<'table> {
    interleaved: bool,
    code_table: &'table CodeTableData,
    max_mode: u8,
    instruction_map: Option<Cow<'static, InstructionMap>>,
    address_cache: AddressCache,

    dictionary_size: u64,
    /// Target bytes described by the window so far; also the base for HERE
    /// addresses together with `dictionary_size`.
    target_length: u64,

    /// Opcodes and their explicit varint sizes, in emission order.  In
    /// interleaved layout this buffer also receives ADD/RUN payloads and
    /// COPY addresses.
    instructions_and_sizes: Vec<u8>,
    separate_data: Vec<u8>,
    separate_addresses: Vec<u8>,

    /// Index into `instructions_and_sizes` of the most recent
    /// single-instruction opcode, still eligible for a compound upgrade.
    /// An index rather than a reference: the buffer may reallocate.
    last_opcode_index: Option<usize>,

    emit_checksum: bool,
    checksum: u32,
    initialized: bool,
}

impl CodeTableWriter<'static> {
    /// Writer over the default RFC 3284 code table.
    pub fn new(interleaved: bool) -> Self {
        Self::build(
            interleaved,
            default_table(),
            DEFAULT_MAX_MODE,
            AddressCache::new(),
        )
    }
}

impl<'table> CodeTableWriter<'table> {
    /// Writer over a caller-provided code table and cache geometry.  The
    /// table is validated up front and borrowed for the writer's lifetime.
    /// `max_mode` is the highest COPY mode and must equal
    /// `1 + near_cache_size + same_cache_size`.
    pub fn with_code_table(
        interleaved: bool,
        near_cache_size: usize,
        same_cache_size: usize,
        code_table: &'table CodeTableData,
        max_mode: u8,
    ) -> Result<Self, CodeTableError> {
        if usize::from(max_mode) != 1 + near_cache_size + same_cache_size {
            return Err(CodeTableError::InvalidCacheSizes {
                near: near_cache_size,
                same: same_cache_size,
                max_mode,
            });
        }
        code_table.validate(max_mode)?;
        Ok(Self::build(
            interleaved,
            code_table,
            max_mode,
            AddressCache::with_sizes(near_cache_size, same_cache_size),
        ))
    }

    fn build(
        interleaved: bool,
        code_table: &'table CodeTableData,
        max_mode: u8,
        address_cache: AddressCache,
    ) -> Self {
        Self {
            interleaved,
            code_table,
            max_mode,
            instruction_map: None,
            address_cache,
            dictionary_size: 0,
            target_length: 0,
            instructions_and_sizes: Vec::with_capacity(1024),
            separate_data: Vec::with_capacity(1024),
            separate_addresses: Vec::with_capacity(1024),
            last_opcode_index: None,
            emit_checksum: false,
            checksum: 0,
            initialized: false,
        }
    }

    /// Prepare for encoding against a dictionary of `dictionary_size`
    /// bytes.  Re-callable: per-window state (address cache, target length,
    /// pending opcode) is reset; the instruction map is built on first use
    /// and kept.
    pub fn init(&mut self, dictionary_size: u64) {
        self.dictionary_size = dictionary_size;
        if self.instruction_map.is_none() {
            self.instruction_map = Some(if std::ptr::eq(self.code_table, default_table()) {
                Cow::Borrowed(default_instruction_map())
            } else {
                Cow::Owned(InstructionMap::new(self.code_table, self.max_mode))
            });
        }
        self.address_cache.init();
        self.target_length = 0;
        self.last_opcode_index = None;
        self.initialized = true;
    }

    /// Target bytes encoded into the current window so far.
    pub fn target_length(&self) -> u64 {
        self.target_length
    }

    /// Encode an ADD instruction carrying `data` literally.
    pub fn add(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if data.is_empty() {
            return Ok(());
        }
        let size = u32::try_from(data.len()).map_err(|_| EncodeError::OversizedInstruction)?;
        self.encode_instruction(VCD_ADD, size, 0)?;
        self.data_buf().extend_from_slice(data);
        self.target_length += data.len() as u64;
        Ok(())
    }

    /// Encode a RUN of `size` copies of `byte`.
    pub fn run(&mut self, size: u32, byte: u8) -> Result<(), EncodeError> {
        if size == 0 {
            return Ok(());
        }
        self.encode_instruction(VCD_RUN, size, 0)?;
        self.data_buf().push(byte);
        self.target_length += u64::from(size);
        Ok(())
    }

    /// Encode a COPY of `size` bytes from `offset` in the combined
    /// dictionary-plus-target address space.
    pub fn copy(&mut self, offset: u64, size: u32) -> Result<(), EncodeError> {
        if !self.initialized {
            return Err(EncodeError::NotInitialized);
        }
        if size == 0 {
            return Ok(());
        }
        debug_assert!(offset < self.dictionary_size + self.target_length);

        // The address is encoded first so the mode is known for opcode
        // selection, but its bytes are appended after the instruction: in
        // interleaved layout the address must follow the opcode and size.
        let here = self.dictionary_size + self.target_length;
        let (mode, encoded) = self.address_cache.encode(offset, here);
        self.encode_instruction(VCD_COPY, size, mode)?;
        self.addr_buf().extend_from_slice(encoded.as_bytes());
        self.target_length += u64::from(size);
        Ok(())
    }

    /// Record the Adler32 of the current target window.  Call at any point
    /// before `output`; the value is framed after the section lengths.
    pub fn add_checksum(&mut self, checksum: u32) {
        self.emit_checksum = true;
        self.checksum = checksum;
    }

    /// Exact byte count the next `output` call will write; 0 when no
    /// instructions are pending.
    pub fn delta_window_size(&self) -> u64 {
        if self.instructions_and_sizes.is_empty() {
            return 0;
        }
        let delta_len = self.length_of_the_delta_encoding();
        1 + varint::sizeof_u64(self.dictionary_size) as u64
            + varint::sizeof_u64(0) as u64
            + varint::sizeof_u64(delta_len) as u64
            + delta_len
    }

    /// Frame and flush the pending window, then reset for the next one.
    /// Nothing is written when no instructions were encoded.
    pub fn output<W: Write>(&mut self, out: &mut W) -> Result<(), EncodeError> {
        if !self.initialized {
            return Err(EncodeError::NotInitialized);
        }
        if self.instructions_and_sizes.is_empty() {
            warn!("output() with no encoded instructions; no delta window produced");
        } else {
            let delta_len = self.length_of_the_delta_encoding();
            let mut window = Vec::with_capacity(self.delta_window_size() as usize);

            window.push(if self.emit_checksum {
                VCD_SOURCE | VCD_CHECKSUM
            } else {
                VCD_SOURCE
            });
            varint::push_u64(&mut window, self.dictionary_size); // source segment size
            varint::push_u64(&mut window, 0); // source segment position
            varint::push_u64(&mut window, delta_len);

            let body_start = window.len();
            varint::push_u64(&mut window, self.target_length);
            window.push(0x00); // Delta_Indicator: no secondary compression
            varint::push_u64(&mut window, self.separate_data.len() as u64);
            varint::push_u64(&mut window, self.instructions_and_sizes.len() as u64);
            varint::push_u64(&mut window, self.separate_addresses.len() as u64);
            if self.emit_checksum {
                varint::push_u64(&mut window, u64::from(self.checksum));
            }
            window.extend_from_slice(&self.separate_data);
            window.extend_from_slice(&self.instructions_and_sizes);
            window.extend_from_slice(&self.separate_addresses);

            let written = (window.len() - body_start) as u64;
            if written != delta_len {
                return Err(EncodeError::LengthMismatch {
                    calculated: delta_len,
                    written,
                });
            }
            out.write_all(&window)?;

            self.instructions_and_sizes.clear();
            self.separate_data.clear();
            self.separate_addresses.clear();
        }

        // Reset per-window state, keeping dictionary and code table.  This
        // clears the address cache between windows as RFC 3284 Section 5.1
        // requires.
        let dictionary_size = self.dictionary_size;
        self.init(dictionary_size);
        self.emit_checksum = false;
        self.checksum = 0;
        Ok(())
    }

    /// Write the delta file header.  `extensions` is a bitmask of
    /// `VCD_FORMAT_*` flags: empty selects the draft-standard header,
    /// anything else the SDCH extended header.  The Hdr_Indicator is always
    /// zero — this writer never embeds a code table (a custom table is
    /// encoder configuration, not output) and never applies secondary
    /// compression.
    pub fn write_header<W: Write>(&self, out: &mut W, extensions: u8) -> io::Result<()> {
        if extensions == 0 {
            out.write_all(&HEADER_STANDARD_FORMAT)
        } else {
            out.write_all(&HEADER_EXTENDED_FORMAT)
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Pick the best opcode for (inst, size, mode) and append or substitute
    /// it in the instruction stream:
    ///
    /// 1. a compound opcode absorbing the pending single opcode, size
    ///    implicit;
    /// 2. a compound opcode with explicit size (varint follows);
    /// 3. a single opcode with implicit size (stays eligible for a later
    ///    compound upgrade);
    /// 4. a single opcode with explicit size.
    ///
    /// A table passing validation always offers step 4.
    fn encode_instruction(&mut self, inst: u8, size: u32, mode: u8) -> Result<(), EncodeError> {
        let Some(map) = self.instruction_map.as_deref() else {
            return Err(EncodeError::NotInitialized);
        };

        let byte_size = u8::try_from(size).ok();

        if let Some(idx) = self.last_opcode_index {
            let last_opcode = self.instructions_and_sizes[idx];
            // Two ADDs in a row decode fine but waste bytes; almost always
            // a bug in the instruction-producing layer.
            if inst == VCD_ADD && self.code_table.entry(last_opcode).inst1 == VCD_ADD {
                warn!("two consecutive ADD instructions; expected a single merged ADD");
            }

            let implicit =
                byte_size.and_then(|s| map.second_opcode(last_opcode, inst, s, mode));
            let explicit = map.second_opcode(last_opcode, inst, 0, mode);
            if let Some(compound) = implicit {
                self.instructions_and_sizes[idx] = compound;
                self.last_opcode_index = None;
                return Ok(());
            }
            if let Some(compound) = explicit {
                self.instructions_and_sizes[idx] = compound;
                self.last_opcode_index = None;
                varint::push_u32(&mut self.instructions_and_sizes, size);
                return Ok(());
            }
        }

        let implicit = byte_size.and_then(|s| map.first_opcode(inst, s, mode));
        let explicit = map.first_opcode(inst, 0, mode);
        if let Some(opcode) = implicit {
            self.instructions_and_sizes.push(opcode);
            self.last_opcode_index = Some(self.instructions_and_sizes.len() - 1);
            return Ok(());
        }
        let opcode = explicit.ok_or(EncodeError::NoMatchingOpcode { inst, mode })?;
        self.instructions_and_sizes.push(opcode);
        self.last_opcode_index = Some(self.instructions_and_sizes.len() - 1);
        varint::push_u32(&mut self.instructions_and_sizes, size);
        Ok(())
    }

    // Interleaved output routes ADD/RUN payloads and COPY addresses into
    // the instruction stream; the separate sections then stay empty and the
    // window header naturally advertises them as zero-length.

    fn data_buf(&mut self) -> &mut Vec<u8> {
        if self.interleaved {
            &mut self.instructions_and_sizes
        } else {
            &mut self.separate_data
        }
    }

    fn addr_buf(&mut self) -> &mut Vec<u8> {
        if self.interleaved {
            &mut self.instructions_and_sizes
        } else {
            &mut self.separate_addresses
        }
    }

    /// The "Length of the delta encoding" header field: everything from the
    /// target window length through the last section byte.
    fn length_of_the_delta_encoding(&self) -> u64 {
        let mut len = varint::sizeof_u64(self.target_length) as u64
            + 1 // Delta_Indicator
            + varint::sizeof_u64(self.separate_data.len() as u64) as u64
            + varint::sizeof_u64(self.instructions_and_sizes.len() as u64) as u64
            + varint::sizeof_u64(self.separate_addresses.len() as u64) as u64
            + self.separate_data.len() as u64
            + self.instructions_and_sizes.len() as u64
            + self.separate_addresses.len() as u64;
        if self.emit_checksum {
            len += varint::sizeof_u64(u64::from(self.checksum)) as u64;
        }
        len
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum EncodeError {
    /// add/run/copy/output called before `init`.
    NotInitialized,
    /// The code table offers no explicit-size opcode for (inst, mode); the
    /// table is unusable for encoding.
    NoMatchingOpcode { inst: u8, mode: u8 },
    /// An instruction size exceeded the 32-bit format limit.
    OversizedInstruction,
    /// Window framing produced a different byte count than calculated.
    LengthMismatch { calculated: u64, written: u64 },
    Io(io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "writer used before init()"),
            Self::NoMatchingOpcode { inst, mode } => {
                write!(
                    f,
                    "code table has no opcode for inst {inst}, mode {mode}, size 0"
                )
            }
            Self::OversizedInstruction => write!(f, "instruction size exceeds 32 bits"),
            Self::LengthMismatch {
                calculated,
                written,
            } => {
                write!(
                    f,
                    "delta encoding length mismatch: calculated {calculated}, wrote {written}"
                )
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
