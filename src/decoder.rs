// Delta window decoding (RFC 3284, Sections 4.2-4.3, SDCH dialect).
//
// Two layers: a restartable window-header parse that signals "need more
// data" without consuming anything, and a body replay that runs only once
// the full delta encoding is in memory — which turns every truncation
// inside the body into a hard format error, as it should be.

use crate::address_cache::{AddressCache, AddressCacheError};
use crate::checksum;
use crate::code_table::{CodeTableData, VCD_ADD, VCD_COPY, VCD_NOOP, VCD_RUN};
use crate::format::{VCD_CHECKSUM, VCD_INVALID_WIN, VCD_SOURCE, VCD_TARGET};
use crate::varint::{self, VarIntError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum DecodeError {
    /// The delta stream violates the format.
    InvalidDelta(String),
    /// The delta uses a feature this decoder does not implement or allow.
    Unsupported(String),
    /// A configured size cap was exceeded.
    LimitExceeded(String),
    /// The decoded window does not match its declared Adler32.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// API misuse: wrong call order or reuse after a terminal error.
    InvalidState(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDelta(msg) => write!(f, "invalid delta: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
                )
            }
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

// ---------------------------------------------------------------------------
// Window header
// ---------------------------------------------------------------------------

/// Parsed fixed part of a delta window: everything before the delta
/// encoding itself.
#[derive(Debug, Clone)]
pub(crate) struct WindowHeader {
    pub win_indicator: u8,
    /// (length, position) of the source segment, present when VCD_SOURCE
    /// or VCD_TARGET is set.
    pub source_segment: Option<(u64, u64)>,
    pub delta_encoding_len: u64,
    /// Size of the window header itself.
    pub header_len: usize,
}

/// Parse a window header from the front of `buf`.  `Ok(None)` means more
/// input is needed; nothing has been consumed and the caller retries with
/// a longer buffer.
pub(crate) fn parse_window_header(
    buf: &[u8],
    max_delta_encoding_len: u64,
) -> Result<Option<WindowHeader>, DecodeError> {
    let Some(&win_indicator) = buf.first() else {
        return Ok(None);
    };
    if win_indicator & VCD_INVALID_WIN != 0 {
        return Err(DecodeError::InvalidDelta(format!(
            "reserved window indicator bits set: {win_indicator:#04x}"
        )));
    }
    if win_indicator & VCD_SOURCE != 0 && win_indicator & VCD_TARGET != 0 {
        return Err(DecodeError::InvalidDelta(
            "VCD_SOURCE and VCD_TARGET are mutually exclusive".into(),
        ));
    }

    let mut pos = 1usize;
    let source_segment = if win_indicator & (VCD_SOURCE | VCD_TARGET) != 0 {
        let Some(len) = read_varint_at(buf, &mut pos)? else {
            return Ok(None);
        };
        let Some(offset) = read_varint_at(buf, &mut pos)? else {
            return Ok(None);
        };
        Some((len, offset))
    } else {
        None
    };

    let Some(delta_encoding_len) = read_varint_at(buf, &mut pos)? else {
        return Ok(None);
    };
    if delta_encoding_len > max_delta_encoding_len {
        return Err(DecodeError::LimitExceeded(format!(
            "delta encoding of {delta_encoding_len} bytes exceeds the section caps"
        )));
    }

    Ok(Some(WindowHeader {
        win_indicator,
        source_segment,
        delta_encoding_len,
        header_len: pos,
    }))
}

/// Incremental varint read for the restartable header parse: `Ok(None)`
/// on truncation, hard error on overflow.
fn read_varint_at(buf: &[u8], pos: &mut usize) -> Result<Option<u64>, DecodeError> {
    match varint::read_u64(&buf[*pos..]) {
        Ok((val, n)) => {
            *pos += n;
            Ok(Some(val))
        }
        Err(VarIntError::Truncated) => Ok(None),
        Err(VarIntError::Overflow) => Err(DecodeError::InvalidDelta(
            "integer overflow in window header".into(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Window body
// ---------------------------------------------------------------------------

pub(crate) struct WindowLimits {
    /// Cap on this window's decoded size (already reduced by the remaining
    /// file allowance).
    pub max_window_size: u64,
    /// Cap on each of the three sections.
    pub max_section_size: usize,
}

/// Decode one complete window body (`delta_encoding_len` bytes) against
/// the resolved source segment, appending the reconstructed window to
/// `output`.
pub(crate) fn decode_window_body(
    header: &WindowHeader,
    body: &[u8],
    source_segment: &[u8],
    code_table: &CodeTableData,
    cache: &mut AddressCache,
    limits: &WindowLimits,
    output: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let mut pos = 0usize;

    let target_window_len = read_body_varint(body, &mut pos)?;
    if target_window_len > limits.max_window_size {
        return Err(DecodeError::LimitExceeded(format!(
            "target window of {target_window_len} bytes exceeds the window or file cap"
        )));
    }

    let delta_indicator = *body
        .get(pos)
        .ok_or_else(|| truncated("Delta_Indicator"))?;
    pos += 1;
    if delta_indicator & 0x07 != 0 {
        return Err(DecodeError::Unsupported(
            "secondary section compression (Delta_Indicator)".into(),
        ));
    }
    if delta_indicator != 0 {
        return Err(DecodeError::InvalidDelta(format!(
            "reserved Delta_Indicator bits set: {delta_indicator:#04x}"
        )));
    }

    let data_len = read_section_len(body, &mut pos, limits, "data")?;
    let inst_len = read_section_len(body, &mut pos, limits, "instructions")?;
    let addr_len = read_section_len(body, &mut pos, limits, "addresses")?;

    let expected_checksum = if header.win_indicator & VCD_CHECKSUM != 0 {
        let raw = read_body_varint(body, &mut pos)?;
        let value = u32::try_from(raw).map_err(|_| {
            DecodeError::InvalidDelta("window checksum does not fit in 32 bits".into())
        })?;
        Some(value)
    } else {
        None
    };

    // Redundancy check: the declared delta encoding length must cover this
    // header portion plus the three sections exactly.
    let declared = pos as u64 + data_len as u64 + inst_len as u64 + addr_len as u64;
    if declared != body.len() as u64 {
        return Err(DecodeError::InvalidDelta(format!(
            "delta encoding length mismatch: sections end at {declared}, header says {}",
            body.len()
        )));
    }

    let data_start = pos;
    let inst_start = data_start + data_len;
    let addr_start = inst_start + inst_len;
    let mut sections = Sections {
        data: &body[data_start..inst_start],
        inst: &body[inst_start..addr_start],
        addr: &body[addr_start..],
        data_pos: 0,
        inst_pos: 0,
        addr_pos: 0,
        // Zero-length data and address sections advertise the interleaved
        // layout: all three byte kinds share the instruction stream.
        interleaved: data_len == 0 && addr_len == 0,
    };

    cache.init();
    let base = output.len();
    output.reserve(target_window_len as usize);

    while sections.inst_pos < sections.inst.len() {
        let opcode = sections.inst[sections.inst_pos];
        sections.inst_pos += 1;
        let entry = *code_table.entry(opcode);
        execute_half(
            entry.inst1,
            entry.size1,
            entry.mode1,
            &mut sections,
            source_segment,
            cache,
            target_window_len,
            base,
            output,
        )?;
        execute_half(
            entry.inst2,
            entry.size2,
            entry.mode2,
            &mut sections,
            source_segment,
            cache,
            target_window_len,
            base,
            output,
        )?;
    }

    if !sections.fully_consumed() {
        return Err(DecodeError::InvalidDelta(
            "window sections not fully consumed".into(),
        ));
    }
    let produced = (output.len() - base) as u64;
    if produced != target_window_len {
        return Err(DecodeError::InvalidDelta(format!(
            "target window length mismatch: declared {target_window_len}, produced {produced}"
        )));
    }

    if let Some(expected) = expected_checksum {
        let actual = checksum::adler32(&output[base..]);
        if actual != expected {
            return Err(DecodeError::ChecksumMismatch { expected, actual });
        }
    }
    Ok(())
}

fn read_body_varint(body: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    match varint::read_u64(&body[*pos..]) {
        Ok((val, n)) => {
            *pos += n;
            Ok(val)
        }
        Err(VarIntError::Truncated) => Err(truncated("window body integer")),
        Err(VarIntError::Overflow) => Err(DecodeError::InvalidDelta(
            "integer overflow in window body".into(),
        )),
    }
}

fn read_section_len(
    body: &[u8],
    pos: &mut usize,
    limits: &WindowLimits,
    what: &str,
) -> Result<usize, DecodeError> {
    let len = read_body_varint(body, pos)?;
    if len > limits.max_section_size as u64 {
        return Err(DecodeError::LimitExceeded(format!(
            "{what} section of {len} bytes exceeds the section cap"
        )));
    }
    Ok(len as usize)
}

fn truncated(what: &str) -> DecodeError {
    DecodeError::InvalidDelta(format!("delta encoding ends inside {what}"))
}

// ---------------------------------------------------------------------------
// Section cursors
// ---------------------------------------------------------------------------

/// Cursors over a window's three sections.  In interleaved layout, data
/// and address reads are served from the instruction cursor instead.
struct Sections<'a> {
    data: &'a [u8],
    inst: &'a [u8],
    addr: &'a [u8],
    data_pos: usize,
    inst_pos: usize,
    addr_pos: usize,
    interleaved: bool,
}

impl<'a> Sections<'a> {
    /// Read an explicit instruction size.
    fn read_size(&mut self) -> Result<u32, DecodeError> {
        match varint::read_u32(&self.inst[self.inst_pos..]) {
            Ok((val, n)) => {
                self.inst_pos += n;
                Ok(val)
            }
            Err(_) => Err(DecodeError::InvalidDelta(
                "bad instruction size".into(),
            )),
        }
    }

    /// Read `len` payload bytes for ADD/RUN.
    fn read_data(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let (buf, pos) = if self.interleaved {
            (self.inst, &mut self.inst_pos)
        } else {
            (self.data, &mut self.data_pos)
        };
        let end = pos
            .checked_add(len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| truncated("the data section"))?;
        let out = &buf[*pos..end];
        *pos = end;
        Ok(out)
    }

    fn addr_remaining(&self) -> &'a [u8] {
        if self.interleaved {
            &self.inst[self.inst_pos..]
        } else {
            &self.addr[self.addr_pos..]
        }
    }

    fn advance_addr(&mut self, n: usize) {
        if self.interleaved {
            self.inst_pos += n;
        } else {
            self.addr_pos += n;
        }
    }

    fn fully_consumed(&self) -> bool {
        self.inst_pos == self.inst.len()
            && self.data_pos == self.data.len()
            && self.addr_pos == self.addr.len()
    }
}

// ---------------------------------------------------------------------------
// Instruction execution
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn execute_half(
    inst: u8,
    table_size: u8,
    mode: u8,
    sections: &mut Sections<'_>,
    source_segment: &[u8],
    cache: &mut AddressCache,
    target_window_len: u64,
    base: usize,
    output: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    if inst == VCD_NOOP {
        return Ok(());
    }
    let size = if table_size == 0 {
        sections.read_size()?
    } else {
        u32::from(table_size)
    };

    let produced = (output.len() - base) as u64;
    if produced + u64::from(size) > target_window_len {
        return Err(DecodeError::InvalidDelta(
            "instructions overrun the declared target window length".into(),
        ));
    }

    match inst {
        VCD_ADD => {
            let bytes = sections.read_data(size as usize)?;
            output.extend_from_slice(bytes);
        }
        VCD_RUN => {
            let byte = sections.read_data(1)?[0];
            output.resize(output.len() + size as usize, byte);
        }
        VCD_COPY => {
            let seg_len = source_segment.len() as u64;
            let here = seg_len + produced;
            let (addr, consumed) = cache
                .decode(mode, sections.addr_remaining(), here)
                .map_err(|e| match e {
                    AddressCacheError::Truncated => truncated("the address section"),
                    other => DecodeError::InvalidDelta(format!("COPY address: {other}")),
                })?;
            sections.advance_addr(consumed);

            if addr + u64::from(size) <= seg_len {
                let start = addr as usize;
                output.extend_from_slice(&source_segment[start..start + size as usize]);
            } else {
                // The range reaches into the window being produced: copy
                // byte-wise so reads observe bytes written earlier by this
                // same instruction (overlapping COPY, RFC 3284 Section 3).
                for i in 0..u64::from(size) {
                    let p = addr + i;
                    let byte = if p < seg_len {
                        source_segment[p as usize]
                    } else {
                        output[base + (p - seg_len) as usize]
                    };
                    output.push(byte);
                }
            }
        }
        other => {
            return Err(DecodeError::InvalidDelta(format!(
                "unknown instruction code {other}"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_table::default_table;
    use crate::format::DEFAULT_MAX_SECTION_SIZE;

    fn limits() -> WindowLimits {
        WindowLimits {
            max_window_size: 1 << 26,
            max_section_size: DEFAULT_MAX_SECTION_SIZE,
        }
    }

    fn decode(header: &WindowHeader, body: &[u8], segment: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut cache = AddressCache::new();
        let mut out = Vec::new();
        decode_window_body(
            header,
            body,
            segment,
            default_table(),
            &mut cache,
            &limits(),
            &mut out,
        )?;
        Ok(out)
    }

    fn header_for(win_indicator: u8, segment_len: u64, body: &[u8]) -> WindowHeader {
        WindowHeader {
            win_indicator,
            source_segment: Some((segment_len, 0)),
            delta_encoding_len: body.len() as u64,
            header_len: 0,
        }
    }

    #[test]
    fn parse_header_needs_more_data() {
        // VCD_SOURCE window cut inside the segment-size varint.
        let hdr = parse_window_header(&[0x01, 0x8D], u64::MAX).unwrap();
        assert!(hdr.is_none());
        assert!(parse_window_header(&[], u64::MAX).unwrap().is_none());
    }

    #[test]
    fn parse_header_complete() {
        let hdr = parse_window_header(&[0x01, 0x0D, 0x00, 0x07], u64::MAX)
            .unwrap()
            .unwrap();
        assert_eq!(hdr.win_indicator, 0x01);
        assert_eq!(hdr.source_segment, Some((13, 0)));
        assert_eq!(hdr.delta_encoding_len, 7);
        assert_eq!(hdr.header_len, 4);
    }

    #[test]
    fn parse_header_rejects_reserved_bits() {
        assert!(parse_window_header(&[0x88], u64::MAX).is_err());
    }

    #[test]
    fn parse_header_rejects_source_and_target() {
        assert!(parse_window_header(&[0x03], u64::MAX).is_err());
    }

    #[test]
    fn parse_header_applies_the_cap() {
        // delta_encoding_len = 0x4000 with a cap of 100.
        let buf = [0x00, 0x81, 0x80, 0x00];
        assert!(matches!(
            parse_window_header(&buf, 100),
            Err(DecodeError::LimitExceeded(_))
        ));
    }

    #[test]
    fn decode_segregated_copy_window() {
        // target 13, no compression, data 0 / inst 1 / addr 1,
        // COPY mode 0 size 13 (opcode 29), address 0.
        let body = [0x0D, 0x00, 0x00, 0x01, 0x01, 0x1D, 0x00];
        let out = decode(&header_for(0x01, 13, &body), &body, b"Hello, world!").unwrap();
        assert_eq!(out, b"Hello, world!");
    }

    #[test]
    fn decode_interleaved_copy_window() {
        let body = [0x0D, 0x00, 0x00, 0x02, 0x00, 0x1D, 0x00];
        let out = decode(&header_for(0x01, 13, &body), &body, b"Hello, world!").unwrap();
        assert_eq!(out, b"Hello, world!");
    }

    #[test]
    fn decode_overlapping_self_copy() {
        // No source segment: ADD(1) 'a', then COPY mode 0 size 3 from
        // address 0 — the RLE expansion relies on byte-wise copying.
        // Interleaved: opcode 2, 'a', opcode 19 (explicit size), 3, addr 0.
        let body = [0x04, 0x00, 0x00, 0x05, 0x00, 0x02, b'a', 0x13, 0x03, 0x00];
        let hdr = WindowHeader {
            win_indicator: 0,
            source_segment: None,
            delta_encoding_len: body.len() as u64,
            header_len: 0,
        };
        let out = decode(&hdr, &body, b"").unwrap();
        assert_eq!(out, b"aaaa");
    }

    #[test]
    fn decode_rejects_secondary_compression() {
        let body = [0x01, 0x01, 0x00, 0x01, 0x00, 0x02, b'x'];
        let hdr = header_for(0x01, 0, &body);
        assert!(matches!(
            decode(&hdr, &body, b""),
            Err(DecodeError::Unsupported(_))
        ));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        // Sections say 0/1/0 but two instruction bytes are present.
        let body = [0x01, 0x00, 0x00, 0x01, 0x00, 0x02, b'x'];
        let hdr = WindowHeader {
            win_indicator: 0,
            source_segment: None,
            delta_encoding_len: body.len() as u64,
            header_len: 0,
        };
        assert!(matches!(
            decode(&hdr, &body, b""),
            Err(DecodeError::InvalidDelta(_))
        ));
    }

    #[test]
    fn decode_rejects_target_length_mismatch() {
        // Window declares 5 target bytes but encodes ADD(1).
        let body = [0x05, 0x00, 0x00, 0x02, 0x00, 0x02, b'x'];
        let hdr = WindowHeader {
            win_indicator: 0,
            source_segment: None,
            delta_encoding_len: body.len() as u64,
            header_len: 0,
        };
        assert!(matches!(
            decode(&hdr, &body, b""),
            Err(DecodeError::InvalidDelta(_))
        ));
    }

    #[test]
    fn decode_rejects_target_overrun() {
        // Window declares 1 target byte but encodes ADD(2).
        let body = [0x01, 0x00, 0x00, 0x03, 0x00, 0x03, b'x', b'y'];
        let hdr = WindowHeader {
            win_indicator: 0,
            source_segment: None,
            delta_encoding_len: body.len() as u64,
            header_len: 0,
        };
        assert!(matches!(
            decode(&hdr, &body, b""),
            Err(DecodeError::InvalidDelta(_))
        ));
    }

    #[test]
    fn decode_verifies_checksum() {
        let target = b"Hello, world!";
        let good = checksum::adler32(target);
        let mut body = vec![0x0D, 0x00, 0x00, 0x02, 0x00];
        crate::varint::push_u64(&mut body, u64::from(good));
        body.extend_from_slice(&[0x1D, 0x00]);
        let hdr = header_for(VCD_SOURCE | VCD_CHECKSUM, 13, &body);
        let out = decode(&hdr, &body, target).unwrap();
        assert_eq!(out, target);

        // Flip a bit in the declared checksum.
        let mut bad_body = vec![0x0D, 0x00, 0x00, 0x02, 0x00];
        crate::varint::push_u64(&mut bad_body, u64::from(good ^ 1));
        bad_body.extend_from_slice(&[0x1D, 0x00]);
        let hdr = header_for(VCD_SOURCE | VCD_CHECKSUM, 13, &bad_body);
        assert!(matches!(
            decode(&hdr, &bad_body, target),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }
}
