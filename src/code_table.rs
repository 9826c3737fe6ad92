// VCDIFF instruction code tables (RFC 3284, Sections 5.4-5.6).
//
// A code table maps each of the 256 opcodes to one or two half-instructions
// (type, size, mode).  The default table is the standard RFC 3284
// assignment; custom tables travel inside a delta file as a 1536-byte
// image, itself delta-encoded against the serialized default table.

use std::sync::LazyLock;

/// Instruction type codes (RFC 3284, Section 5.4).
pub const VCD_NOOP: u8 = 0;
pub const VCD_ADD: u8 = 1;
pub const VCD_RUN: u8 = 2;
pub const VCD_COPY: u8 = 3;

/// Default NEAR/SAME address cache sizes (RFC 3284, Section 5.1).
pub const DEFAULT_NEAR_CACHE_SIZE: usize = 4;
pub const DEFAULT_SAME_CACHE_SIZE: usize = 3;
/// Highest COPY mode of the default table: SELF, HERE, 4 NEAR, 3 SAME.
pub const DEFAULT_MAX_MODE: u8 = 8;

/// Number of opcodes in every code table.
pub const CODE_TABLE_ROWS: usize = 256;
/// Length of the serialized wire image: six 256-byte planes.
pub const SERIALIZED_CODE_TABLE_SIZE: usize = CODE_TABLE_ROWS * 6;

// ---------------------------------------------------------------------------
// Table data
// ---------------------------------------------------------------------------

/// One opcode row.  `inst2 == VCD_NOOP` means the opcode encodes a single
/// instruction.  A size of 0 means the actual size follows the opcode in
/// the instruction stream as a variable-length integer.  Modes are
/// meaningful only for COPY.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodeTableEntry {
    pub inst1: u8,
    pub size1: u8,
    pub mode1: u8,
    pub inst2: u8,
    pub size2: u8,
    pub mode2: u8,
}

/// A complete 256-row code table.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeTableData {
    entries: [CodeTableEntry; CODE_TABLE_ROWS],
}

impl CodeTableData {
    pub fn new(entries: [CodeTableEntry; CODE_TABLE_ROWS]) -> Self {
        Self { entries }
    }

    #[inline]
    pub fn entries(&self) -> &[CodeTableEntry; CODE_TABLE_ROWS] {
        &self.entries
    }

    #[inline]
    pub fn entry(&self, opcode: u8) -> &CodeTableEntry {
        &self.entries[opcode as usize]
    }

    /// Serialize to the wire image: six planes of 256 bytes each, in the
    /// order inst1, inst2, size1, size2, mode1, mode2.  The image of the
    /// *default* table doubles as the dictionary against which embedded
    /// custom tables are delta-encoded.
    pub fn to_bytes(&self) -> [u8; SERIALIZED_CODE_TABLE_SIZE] {
        let mut out = [0u8; SERIALIZED_CODE_TABLE_SIZE];
        for (i, e) in self.entries.iter().enumerate() {
            out[i] = e.inst1;
            out[CODE_TABLE_ROWS + i] = e.inst2;
            out[2 * CODE_TABLE_ROWS + i] = e.size1;
            out[3 * CODE_TABLE_ROWS + i] = e.size2;
            out[4 * CODE_TABLE_ROWS + i] = e.mode1;
            out[5 * CODE_TABLE_ROWS + i] = e.mode2;
        }
        out
    }

    /// Rebuild a table from its wire image.
    pub fn from_bytes(image: &[u8]) -> Result<Self, CodeTableError> {
        if image.len() != SERIALIZED_CODE_TABLE_SIZE {
            return Err(CodeTableError::BadImageSize { len: image.len() });
        }
        let mut entries = [CodeTableEntry::default(); CODE_TABLE_ROWS];
        for (i, e) in entries.iter_mut().enumerate() {
            e.inst1 = image[i];
            e.inst2 = image[CODE_TABLE_ROWS + i];
            e.size1 = image[2 * CODE_TABLE_ROWS + i];
            e.size2 = image[3 * CODE_TABLE_ROWS + i];
            e.mode1 = image[4 * CODE_TABLE_ROWS + i];
            e.mode2 = image[5 * CODE_TABLE_ROWS + i];
        }
        Ok(Self { entries })
    }

    /// Check that the table is usable with COPY modes `0..=max_mode`.
    ///
    /// Beyond per-row well-formedness, encoding requires an explicit-size
    /// (size 0) single-instruction opcode for ADD, for RUN, and for every
    /// COPY mode, and compound opcodes must carry an implicit size in
    /// their first half (a size varint between the two halves would
    /// separate a later compound upgrade from its payload).
    pub fn validate(&self, max_mode: u8) -> Result<(), CodeTableError> {
        let mut has_add = false;
        let mut has_run = false;
        let mut has_copy = vec![false; max_mode as usize + 1];

        for (opcode, e) in self.entries.iter().enumerate() {
            let opcode = opcode as u8;
            if !half_is_valid(e.inst1, e.size1, e.mode1, max_mode)
                || !half_is_valid(e.inst2, e.size2, e.mode2, max_mode)
            {
                return Err(CodeTableError::InvalidEntry { opcode });
            }
            if e.inst1 != VCD_NOOP && e.inst2 != VCD_NOOP {
                if e.size1 == 0 {
                    return Err(CodeTableError::CompoundExplicitSize { opcode });
                }
                continue;
            }
            // Single-instruction rows (either half may hold the instruction).
            let (inst, size, mode) = if e.inst2 == VCD_NOOP {
                (e.inst1, e.size1, e.mode1)
            } else {
                (e.inst2, e.size2, e.mode2)
            };
            if size == 0 {
                match inst {
                    VCD_ADD => has_add = true,
                    VCD_RUN => has_run = true,
                    VCD_COPY => has_copy[mode as usize] = true,
                    _ => {}
                }
            }
        }

        if !has_add {
            return Err(CodeTableError::MissingExplicitSizeOpcode {
                inst: VCD_ADD,
                mode: 0,
            });
        }
        if !has_run {
            return Err(CodeTableError::MissingExplicitSizeOpcode {
                inst: VCD_RUN,
                mode: 0,
            });
        }
        if let Some(mode) = has_copy.iter().position(|&ok| !ok) {
            return Err(CodeTableError::MissingExplicitSizeOpcode {
                inst: VCD_COPY,
                mode: mode as u8,
            });
        }
        Ok(())
    }
}

fn half_is_valid(inst: u8, size: u8, mode: u8, max_mode: u8) -> bool {
    match inst {
        VCD_NOOP => size == 0 && mode == 0,
        VCD_ADD | VCD_RUN => mode == 0,
        VCD_COPY => mode <= max_mode,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Default table (RFC 3284, Section 5.6)
// ---------------------------------------------------------------------------

/// Build the standard RFC 3284 code table.  The layout is fixed by the RFC:
///
/// ```text
///   0         RUN, explicit size
///   1..=18    ADD, explicit size then implicit 1..=17
///   19..=162  COPY per mode 0..=8: explicit size then implicit 4..=18
///   163..=234 ADD(1..=4) + COPY(4..=6) for modes 0..=5
///   235..=246 ADD(1..=4) + COPY(4)    for modes 6..=8
///   247..=255 COPY(4) + ADD(1)        per mode
/// ```
pub fn build_default_code_table() -> CodeTableData {
    const ADD_SIZES: u8 = 17;
    const COPY_SIZES: u8 = 15;
    const MIN_COPY_SIZE: u8 = 4;
    const NEAR_MODES: u8 = DEFAULT_NEAR_CACHE_SIZE as u8;
    const SAME_MODES: u8 = DEFAULT_SAME_CACHE_SIZE as u8;
    const COPY_MODES: u8 = 2 + NEAR_MODES + SAME_MODES;
    const ADDCOPY_ADD_MAX: u8 = 4;
    const ADDCOPY_NEAR_COPY_MAX: u8 = 6;
    const ADDCOPY_SAME_COPY_MAX: u8 = 4;
    const COPYADD_ADD_MAX: u8 = 1;
    const COPYADD_COPY_SIZE: u8 = 4;

    let mut entries = [CodeTableEntry::default(); CODE_TABLE_ROWS];
    let mut idx = 0usize;

    // RUN with explicit size.
    entries[idx].inst1 = VCD_RUN;
    idx += 1;

    // ADD: explicit size, then implicit sizes 1..=17.
    entries[idx].inst1 = VCD_ADD;
    idx += 1;
    for size1 in 1..=ADD_SIZES {
        entries[idx] = CodeTableEntry {
            inst1: VCD_ADD,
            size1,
            ..Default::default()
        };
        idx += 1;
    }

    // COPY per mode: explicit size, then implicit sizes 4..=18.
    for mode1 in 0..COPY_MODES {
        entries[idx] = CodeTableEntry {
            inst1: VCD_COPY,
            mode1,
            ..Default::default()
        };
        idx += 1;
        for size1 in MIN_COPY_SIZE..MIN_COPY_SIZE + COPY_SIZES {
            entries[idx] = CodeTableEntry {
                inst1: VCD_COPY,
                size1,
                mode1,
                ..Default::default()
            };
            idx += 1;
        }
    }

    // ADD + COPY compounds.
    for mode2 in 0..COPY_MODES {
        let copy_max = if mode2 < 2 + NEAR_MODES {
            ADDCOPY_NEAR_COPY_MAX
        } else {
            ADDCOPY_SAME_COPY_MAX
        };
        for size1 in 1..=ADDCOPY_ADD_MAX {
            for size2 in MIN_COPY_SIZE..=copy_max {
                entries[idx] = CodeTableEntry {
                    inst1: VCD_ADD,
                    size1,
                    mode1: 0,
                    inst2: VCD_COPY,
                    size2,
                    mode2,
                };
                idx += 1;
            }
        }
    }

    // COPY + ADD compounds.
    for mode1 in 0..COPY_MODES {
        for size2 in 1..=COPYADD_ADD_MAX {
            entries[idx] = CodeTableEntry {
                inst1: VCD_COPY,
                size1: COPYADD_COPY_SIZE,
                mode1,
                inst2: VCD_ADD,
                size2,
                mode2: 0,
            };
            idx += 1;
        }
    }

    debug_assert_eq!(idx, CODE_TABLE_ROWS, "code table must have exactly 256 rows");
    CodeTableData::new(entries)
}

/// The shared default code table.
pub fn default_table() -> &'static CodeTableData {
    static TABLE: LazyLock<CodeTableData> = LazyLock::new(build_default_code_table);
    &TABLE
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeTableError {
    /// An opcode row holds an unknown instruction code or an illegal mode.
    InvalidEntry { opcode: u8 },
    /// A compound opcode whose first half has an explicit size.
    CompoundExplicitSize { opcode: u8 },
    /// No explicit-size single opcode exists for (inst, mode); such a table
    /// cannot encode instructions of arbitrary size.
    MissingExplicitSizeOpcode { inst: u8, mode: u8 },
    /// A serialized table image with the wrong length.
    BadImageSize { len: usize },
    /// Address cache geometry inconsistent with the declared last mode.
    InvalidCacheSizes { near: usize, same: usize, max_mode: u8 },
}

impl std::fmt::Display for CodeTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEntry { opcode } => {
                write!(f, "invalid code table entry at opcode {opcode}")
            }
            Self::CompoundExplicitSize { opcode } => {
                write!(f, "compound opcode {opcode} has an explicit first size")
            }
            Self::MissingExplicitSizeOpcode { inst, mode } => {
                write!(
                    f,
                    "code table has no explicit-size opcode for inst {inst}, mode {mode}"
                )
            }
            Self::BadImageSize { len } => {
                write!(
                    f,
                    "serialized code table is {len} bytes, expected {SERIALIZED_CODE_TABLE_SIZE}"
                )
            }
            Self::InvalidCacheSizes {
                near,
                same,
                max_mode,
            } => {
                write!(
                    f,
                    "cache sizes near={near}, same={same} do not yield last mode {max_mode}"
                )
            }
        }
    }
}

impl std::error::Error for CodeTableError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
