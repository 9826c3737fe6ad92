// Streaming delta file decoder.
//
// Drives header and window decoding over arbitrarily chunked input; every
// parse is restartable at any byte boundary, so the decoder can be fed one
// byte at a time.  Unconsumed input stays buffered between calls, and a
// window is replayed only once its declared delta-encoding length has
// arrived.  Buffering is bounded by the configured caps.
//
// An embedded custom code table is itself a complete delta file whose
// dictionary is the serialized default table; it is decoded by a nested
// instance of this same decoder (recursion depth 1).

use crate::address_cache::AddressCache;
use crate::code_table::{CodeTableData, SERIALIZED_CODE_TABLE_SIZE, default_table};
use crate::decoder::{self, DecodeError, WindowLimits};
use crate::format::{
    DEFAULT_MAX_SECTION_SIZE, DEFAULT_MAX_TARGET_FILE_SIZE, DEFAULT_MAX_TARGET_WINDOW_SIZE,
    DELTA_FILE_HEADER_SIZE, VCD_CODETABLE, VCD_DECOMPRESS, VCD_INVALID_HDR, VCD_SDCH_VERSION,
    VCD_SOURCE, VCD_STANDARD_VERSION, VCD_TARGET, VCDIFF_MAGIC,
};
use crate::varint::{self, VarIntError};

// ---------------------------------------------------------------------------
// Driver state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the five-byte delta file header.
    FileHeader,
    /// The header announced a custom code table; waiting for the NEAR and
    /// SAME cache sizes.
    CustomCacheSizes,
    /// Feeding the embedded code table delta to the nested decoder.
    CustomCodeTable,
    /// Between windows.  The only state in which the stream may end.
    WindowHeader,
}

/// In-flight decode of an embedded custom code table.
struct NestedDecode {
    decoder: Box<StreamingDecoder>,
    image: Vec<u8>,
    near_cache_size: usize,
    same_cache_size: usize,
}

pub struct StreamingDecoder {
    dictionary: Vec<u8>,
    buffer: Vec<u8>,
    state: State,
    started: bool,
    poisoned: bool,
    /// Depth guard: set on the decoder parsing an embedded code table,
    /// which must not announce a further custom table.
    is_nested: bool,

    allow_vcd_target: bool,
    max_target_file_size: u64,
    max_target_window_size: u32,
    max_section_size: usize,
    /// Stop consuming input once this much target has been produced.
    /// Lets a nested table decode leave the outer stream's bytes
    /// untouched in its buffer; `u64::MAX` means no planned size.
    planned_target_size: u64,

    /// Total target bytes produced this session.
    total_decoded: u64,
    /// Decoded target retained for VCD_TARGET windows; kept empty while
    /// the gate is off.
    decoded_target: Vec<u8>,

    custom_table: Option<Box<CodeTableData>>,
    nested: Option<NestedDecode>,
    cache: AddressCache,
}

impl StreamingDecoder {
    pub fn new() -> Self {
        Self {
            dictionary: Vec::new(),
            buffer: Vec::new(),
            state: State::FileHeader,
            started: false,
            poisoned: false,
            is_nested: false,
            allow_vcd_target: true,
            max_target_file_size: DEFAULT_MAX_TARGET_FILE_SIZE,
            max_target_window_size: DEFAULT_MAX_TARGET_WINDOW_SIZE,
            max_section_size: DEFAULT_MAX_SECTION_SIZE,
            planned_target_size: u64::MAX,
            total_decoded: 0,
            decoded_target: Vec::new(),
            custom_table: None,
            nested: None,
            cache: AddressCache::new(),
        }
    }

    fn new_nested() -> Self {
        let mut d = Self::new();
        d.is_nested = true;
        d
    }

    /// Accept or reject windows that copy from the already-decoded target
    /// (default: accepted).  Disabling also stops the decoder retaining
    /// decoded output between windows.
    pub fn set_allow_vcd_target(&mut self, allow: bool) {
        self.allow_vcd_target = allow;
    }

    /// Cap the total decoded target size for one session.
    pub fn set_max_target_file_size(&mut self, max: u64) {
        self.max_target_file_size = max;
    }

    /// Cap the decoded size of a single window.
    pub fn set_max_target_window_size(&mut self, max: u32) {
        self.max_target_window_size = max;
    }

    /// Cap each of a window's three sections, bounding how much input the
    /// decoder will buffer for one window.
    pub fn set_max_section_size(&mut self, max: usize) {
        self.max_section_size = max;
    }

    /// Begin a new decoding session against `dictionary`.
    pub fn start_decoding(&mut self, dictionary: &[u8]) {
        self.reset_session();
        self.dictionary.clear();
        self.dictionary.extend_from_slice(dictionary);
        self.started = true;
    }

    fn reset_session(&mut self) {
        self.buffer.clear();
        self.state = State::FileHeader;
        self.started = false;
        self.poisoned = false;
        self.total_decoded = 0;
        self.decoded_target.clear();
        self.custom_table = None;
        self.nested = None;
        self.cache = AddressCache::new();
    }

    /// Feed `data`, appending any completely decoded windows to `output`.
    ///
    /// Input that stops mid-element is buffered and resumed on the next
    /// call, so chunk boundaries may fall anywhere — including single-byte
    /// feeds.  Every reported error is terminal for the session; truncation
    /// is only diagnosed by `finish_decoding`.
    pub fn decode_chunk(&mut self, data: &[u8], output: &mut Vec<u8>) -> Result<(), DecodeError> {
        if !self.started {
            return Err(DecodeError::InvalidState(
                "decode_chunk called before start_decoding",
            ));
        }
        if self.poisoned {
            return Err(DecodeError::InvalidState(
                "decode_chunk called after a terminal error",
            ));
        }
        self.buffer.extend_from_slice(data);
        match self.advance(output) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Declare end of input.  Succeeds only when the file header was seen
    /// and the stream stopped exactly between windows with nothing pending;
    /// the decoder is then reset for a new session.
    pub fn finish_decoding(&mut self) -> Result<(), DecodeError> {
        if !self.started {
            return Err(DecodeError::InvalidState(
                "finish_decoding called before start_decoding",
            ));
        }
        if self.poisoned {
            return Err(DecodeError::InvalidState(
                "finish_decoding called after a terminal error",
            ));
        }
        if self.state == State::WindowHeader && self.buffer.is_empty() {
            self.reset_session();
            Ok(())
        } else {
            self.poisoned = true;
            Err(DecodeError::InvalidDelta(
                "delta stream ended mid-element (truncated input)".into(),
            ))
        }
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    fn advance(&mut self, output: &mut Vec<u8>) -> Result<(), DecodeError> {
        loop {
            let progressed = match self.state {
                State::FileHeader => self.parse_file_header()?,
                State::CustomCacheSizes => self.parse_cache_sizes()?,
                State::CustomCodeTable => self.pump_nested()?,
                State::WindowHeader => self.decode_one_window(output)?,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn parse_file_header(&mut self) -> Result<bool, DecodeError> {
        if self.buffer.len() < DELTA_FILE_HEADER_SIZE {
            return Ok(false);
        }
        if self.buffer[..3] != VCDIFF_MAGIC {
            return Err(DecodeError::InvalidDelta(format!(
                "bad magic bytes {:02x} {:02x} {:02x}",
                self.buffer[0], self.buffer[1], self.buffer[2]
            )));
        }
        let version = self.buffer[3];
        if version != VCD_STANDARD_VERSION && version != VCD_SDCH_VERSION {
            return Err(DecodeError::InvalidDelta(format!(
                "unknown format version byte {version:#04x}"
            )));
        }
        let hdr_indicator = self.buffer[4];
        if hdr_indicator & VCD_INVALID_HDR != 0 {
            return Err(DecodeError::InvalidDelta(format!(
                "reserved Hdr_Indicator bits set: {hdr_indicator:#04x}"
            )));
        }
        if hdr_indicator & VCD_DECOMPRESS != 0 {
            return Err(DecodeError::Unsupported(
                "secondary compression (Hdr_Indicator)".into(),
            ));
        }
        self.buffer.drain(..DELTA_FILE_HEADER_SIZE);

        if hdr_indicator & VCD_CODETABLE != 0 {
            if self.is_nested {
                return Err(DecodeError::InvalidDelta(
                    "embedded code table may not declare a further custom code table".into(),
                ));
            }
            self.state = State::CustomCacheSizes;
        } else {
            self.state = State::WindowHeader;
        }
        Ok(true)
    }

    fn parse_cache_sizes(&mut self) -> Result<bool, DecodeError> {
        let mut pos = 0usize;
        let near = match read_u32_at(&self.buffer, &mut pos) {
            Some(result) => result?,
            None => return Ok(false),
        };
        let same = match read_u32_at(&self.buffer, &mut pos) {
            Some(result) => result?,
            None => return Ok(false),
        };
        if !AddressCache::valid_sizes(near, same) {
            return Err(DecodeError::InvalidDelta(format!(
                "invalid address cache sizes: near={near}, same={same}"
            )));
        }
        self.buffer.drain(..pos);

        let mut nested = Box::new(Self::new_nested());
        // The embedded delta has no terminator; the nested decoder stops
        // at the table image size and leaves the outer stream's bytes in
        // its buffer, to be reclaimed below.
        nested.planned_target_size = SERIALIZED_CODE_TABLE_SIZE as u64;
        nested.start_decoding(&default_table().to_bytes());
        self.nested = Some(NestedDecode {
            decoder: nested,
            image: Vec::with_capacity(SERIALIZED_CODE_TABLE_SIZE),
            near_cache_size: near as usize,
            same_cache_size: same as usize,
        });
        self.state = State::CustomCodeTable;
        Ok(true)
    }

    fn pump_nested(&mut self) -> Result<bool, DecodeError> {
        let Some(mut nested) = self.nested.take() else {
            return Err(DecodeError::InvalidState(
                "custom code table state without a nested decoder",
            ));
        };
        if !self.buffer.is_empty() {
            let chunk = std::mem::take(&mut self.buffer);
            nested
                .decoder
                .decode_chunk(&chunk, &mut nested.image)
                .map_err(|e| {
                    DecodeError::InvalidDelta(format!("embedded code table: {e}"))
                })?;
        }
        if nested.image.len() < SERIALIZED_CODE_TABLE_SIZE {
            self.nested = Some(nested);
            return Ok(false);
        }
        if nested.image.len() > SERIALIZED_CODE_TABLE_SIZE {
            return Err(DecodeError::InvalidDelta(format!(
                "embedded code table decoded to {} bytes, expected {}",
                nested.image.len(),
                SERIALIZED_CODE_TABLE_SIZE
            )));
        }

        // Bytes past the end of the embedded delta belong to the outer
        // stream; the nested decoder buffered but never consumed them.
        self.buffer = std::mem::take(&mut nested.decoder.buffer);

        let table = CodeTableData::from_bytes(&nested.image)
            .map_err(|e| DecodeError::InvalidDelta(format!("embedded code table: {e}")))?;
        let max_mode = (1 + nested.near_cache_size + nested.same_cache_size) as u8;
        table
            .validate(max_mode)
            .map_err(|e| DecodeError::InvalidDelta(format!("embedded code table: {e}")))?;

        self.cache = AddressCache::with_sizes(nested.near_cache_size, nested.same_cache_size);
        self.custom_table = Some(Box::new(table));
        self.state = State::WindowHeader;
        Ok(true)
    }

    fn decode_one_window(&mut self, output: &mut Vec<u8>) -> Result<bool, DecodeError> {
        if self.buffer.is_empty() || self.total_decoded >= self.planned_target_size {
            return Ok(false);
        }
        let max_delta = self.max_delta_encoding_len();
        let Some(header) = decoder::parse_window_header(&self.buffer, max_delta)? else {
            return Ok(false);
        };
        let total = header.header_len + header.delta_encoding_len as usize;
        if self.buffer.len() < total {
            return Ok(false);
        }

        if header.win_indicator & VCD_TARGET != 0 && !self.allow_vcd_target {
            return Err(DecodeError::Unsupported(
                "VCD_TARGET window while allow_vcd_target is disabled".into(),
            ));
        }

        let source_segment: &[u8] = match header.source_segment {
            None => &[],
            Some((len, position)) => {
                let (origin, what) = if header.win_indicator & VCD_SOURCE != 0 {
                    (&self.dictionary, "dictionary")
                } else {
                    (&self.decoded_target, "decoded target")
                };
                let end = position.checked_add(len).ok_or_else(|| {
                    DecodeError::InvalidDelta("source segment bounds overflow".into())
                })?;
                if end > origin.len() as u64 {
                    return Err(DecodeError::InvalidDelta(format!(
                        "source segment [{position}, {end}) outside the {what} ({} bytes)",
                        origin.len()
                    )));
                }
                &origin[position as usize..end as usize]
            }
        };

        let remaining_file = self.max_target_file_size.saturating_sub(self.total_decoded);
        let limits = WindowLimits {
            max_window_size: u64::from(self.max_target_window_size).min(remaining_file),
            max_section_size: self.max_section_size,
        };
        let code_table: &CodeTableData = match &self.custom_table {
            Some(table) => table,
            None => default_table(),
        };

        let body = &self.buffer[header.header_len..total];
        let start = output.len();
        decoder::decode_window_body(
            &header,
            body,
            source_segment,
            code_table,
            &mut self.cache,
            &limits,
            output,
        )?;

        let produced = output.len() - start;
        self.total_decoded += produced as u64;
        if self.allow_vcd_target {
            self.decoded_target.extend_from_slice(&output[start..]);
        }
        self.buffer.drain(..total);
        Ok(true)
    }

    /// Upper bound on a parseable "length of the delta encoding": body
    /// header fields plus three capped sections.
    fn max_delta_encoding_len(&self) -> u64 {
        (self.max_section_size as u64).saturating_mul(3).saturating_add(64)
    }
}

impl Default for StreamingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental u32 varint read: `None` on truncation, `Some(Err)` on
/// overflow.
fn read_u32_at(buf: &[u8], pos: &mut usize) -> Option<Result<u32, DecodeError>> {
    match varint::read_u32(&buf[*pos..]) {
        Ok((val, n)) => {
            *pos += n;
            Some(Ok(val))
        }
        Err(VarIntError::Truncated) => None,
        Err(VarIntError::Overflow) => Some(Err(DecodeError::InvalidDelta(
            "cache size integer overflow".into(),
        ))),
    }
}

// ---------------------------------------------------------------------------
// Convenience
// ---------------------------------------------------------------------------

/// Decode a complete in-memory delta file against `dictionary`.
pub fn decode_memory(delta: &[u8], dictionary: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = StreamingDecoder::new();
    decoder.start_decoding(dictionary);
    let mut output = Vec::new();
    decoder.decode_chunk(delta, &mut output)?;
    decoder.finish_decoding()?;
    Ok(output)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
