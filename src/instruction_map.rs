// Opcode lookup indices derived from a code table (RFC 3284, Section 5.5).
//
// The encoder needs the inverse of the code table: given a
// half-instruction, find an opcode.  The first index answers "which opcode
// encodes (inst, size, mode) standalone"; the second answers "which
// compound opcode merges (inst, size, mode) into an already-emitted first
// opcode".  Ties go to the lower opcode, which keeps output deterministic.

use std::sync::LazyLock;

use crate::code_table::{
    CODE_TABLE_ROWS, CodeTableData, DEFAULT_MAX_MODE, VCD_COPY, VCD_NOOP, default_table,
};

// ---------------------------------------------------------------------------
// First-opcode index
// ---------------------------------------------------------------------------

/// Lookup keyed by (inst [+ mode for COPY], size).  Size index 0 is the
/// explicit-size row; 1..=max_size are implicit sizes.
#[derive(Clone)]
struct FirstOpcodeMap {
    num_inst_modes: usize,
    max_size: usize,
    opcodes: Vec<Option<u8>>,
}

impl FirstOpcodeMap {
    fn new(num_inst_modes: usize, max_size: usize) -> Self {
        Self {
            num_inst_modes,
            max_size,
            opcodes: vec![None; num_inst_modes * (max_size + 1)],
        }
    }

    #[inline]
    fn slot(&self, inst_mode: usize, size: usize) -> usize {
        inst_mode * (self.max_size + 1) + size
    }

    fn insert(&mut self, inst: u8, size: u8, mode: u8, opcode: u8) {
        let im = inst_mode(inst, mode);
        if im >= self.num_inst_modes || size as usize > self.max_size {
            return;
        }
        let slot = self.slot(im, size as usize);
        if self.opcodes[slot].is_none() {
            self.opcodes[slot] = Some(opcode);
        }
    }

    fn lookup(&self, inst: u8, size: u8, mode: u8) -> Option<u8> {
        let im = inst_mode(inst, mode);
        if im >= self.num_inst_modes || size as usize > self.max_size {
            return None;
        }
        self.opcodes[self.slot(im, size as usize)]
    }
}

#[inline]
fn inst_mode(inst: u8, mode: u8) -> usize {
    if inst == VCD_COPY {
        usize::from(inst) + usize::from(mode)
    } else {
        usize::from(inst)
    }
}

// ---------------------------------------------------------------------------
// Second-opcode index
// ---------------------------------------------------------------------------

/// Per-first-opcode lookup, populated lazily: most opcodes never begin a
/// compound pair, so their slot stays empty.
#[derive(Clone)]
struct SecondOpcodeMap {
    num_inst_modes: usize,
    max_size: usize,
    opcodes: Vec<Option<Vec<Option<u8>>>>,
}

impl SecondOpcodeMap {
    fn new(num_inst_modes: usize, max_size: usize) -> Self {
        Self {
            num_inst_modes,
            max_size,
            opcodes: vec![None; CODE_TABLE_ROWS],
        }
    }

    fn insert(&mut self, first_opcode: u8, inst: u8, size: u8, mode: u8, opcode: u8) {
        let im = inst_mode(inst, mode);
        if im >= self.num_inst_modes || size as usize > self.max_size {
            return;
        }
        let width = self.max_size + 1;
        let inner = self.opcodes[first_opcode as usize]
            .get_or_insert_with(|| vec![None; self.num_inst_modes * width]);
        let slot = im * width + size as usize;
        if inner[slot].is_none() {
            inner[slot] = Some(opcode);
        }
    }

    fn lookup(&self, first_opcode: u8, inst: u8, size: u8, mode: u8) -> Option<u8> {
        let inner = self.opcodes[first_opcode as usize].as_ref()?;
        let im = inst_mode(inst, mode);
        if im >= self.num_inst_modes || size as usize > self.max_size {
            return None;
        }
        inner[im * (self.max_size + 1) + size as usize]
    }
}

// ---------------------------------------------------------------------------
// Public map
// ---------------------------------------------------------------------------

/// Derived opcode indices for one code table.  Stateless after
/// construction; the default map is shared between writer instances.
#[derive(Clone)]
pub struct InstructionMap {
    first: FirstOpcodeMap,
    second: SecondOpcodeMap,
}

impl InstructionMap {
    /// Build the indices for `table` with COPY modes `0..=max_mode`.
    pub fn new(table: &CodeTableData, max_mode: u8) -> Self {
        let num_inst_modes = usize::from(VCD_COPY) + usize::from(max_mode) + 1;
        let max_size1 = table.entries().iter().map(|e| e.size1).max().unwrap_or(0);
        let max_size2 = table.entries().iter().map(|e| e.size2).max().unwrap_or(0);

        let mut first = FirstOpcodeMap::new(num_inst_modes, max_size1 as usize);
        for (opcode, e) in table.entries().iter().enumerate() {
            let opcode = opcode as u8;
            if e.inst2 == VCD_NOOP && e.inst1 != VCD_NOOP {
                first.insert(e.inst1, e.size1, e.mode1, opcode);
            } else if e.inst1 == VCD_NOOP && e.inst2 != VCD_NOOP {
                first.insert(e.inst2, e.size2, e.mode2, opcode);
            }
        }

        // Compound rows are reachable only through the opcode the first
        // index assigns to their first half.
        let mut second = SecondOpcodeMap::new(num_inst_modes, max_size2 as usize);
        for (opcode, e) in table.entries().iter().enumerate() {
            if e.inst1 != VCD_NOOP
                && e.inst2 != VCD_NOOP
                && let Some(first_opcode) = first.lookup(e.inst1, e.size1, e.mode1)
            {
                second.insert(first_opcode, e.inst2, e.size2, e.mode2, opcode as u8);
            }
        }

        Self { first, second }
    }

    /// Opcode encoding (inst, size, mode) as a standalone instruction.
    /// Size 0 selects the explicit-size row.
    #[inline]
    pub fn first_opcode(&self, inst: u8, size: u8, mode: u8) -> Option<u8> {
        self.first.lookup(inst, size, mode)
    }

    /// Compound opcode merging (inst, size, mode) into `first_opcode`.
    #[inline]
    pub fn second_opcode(&self, first_opcode: u8, inst: u8, size: u8, mode: u8) -> Option<u8> {
        self.second.lookup(first_opcode, inst, size, mode)
    }
}

/// The shared index for the default code table.
pub fn default_instruction_map() -> &'static InstructionMap {
    static MAP: LazyLock<InstructionMap> =
        LazyLock::new(|| InstructionMap::new(default_table(), DEFAULT_MAX_MODE));
    &MAP
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
