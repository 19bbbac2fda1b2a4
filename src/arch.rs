/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use crate::bytecode::SpanDependent;
use crate::bytecode::output::OutputEnv;
use crate::bytes::{Bytes, Endian};
use crate::errors::{DiagId, Diagnostics, Source};
use crate::intnum::IntNum;
use crate::location::Location;
use crate::numeric_output::NumericOutput;
use crate::symbol::{SymbolRef, SymbolTable};
use crate::value::Value;

/// Opaque architecture register handle. The core only compares identity
/// and hashes the number; meaning belongs to the architecture module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterRef {
    pub group: u16,
    pub num: u16,
}

impl RegisterRef {
    pub fn new(group: u16, num: u16) -> Self {
        RegisterRef { group, num }
    }

    pub fn get_num(&self) -> u32 {
        ((self.group as u32) << 16) | self.num as u32
    }
}

/// Services the core needs from an architecture module. Instruction
/// encoding stays on the architecture side; encodings participate in the
/// pipeline through the `SpanDependent` bytecode trait.
pub trait Arch {
    fn address_size(&self) -> u32;

    fn min_insn_len(&self) -> u32 {
        1
    }

    fn endian(&self) -> Endian {
        Endian::Little
    }

    /// Fills `buf` with `len` bytes of code padding (NOP patterns).
    /// Returns false if the architecture has no code fill, in which case
    /// the caller pads with zeros.
    fn code_fill(&self, _len: usize, _buf: &mut Vec<u8>) -> bool {
        false
    }
}

/// Little-endian 32-bit architecture with single-byte NOP fill, enough
/// for data-heavy objects and tests.
#[derive(Debug, Default)]
pub struct BasicArch;

impl Arch for BasicArch {
    fn address_size(&self) -> u32 {
        32
    }

    fn code_fill(&self, len: usize, buf: &mut Vec<u8>) -> bool {
        buf.resize(len, 0x90);
        true
    }
}

/// Thin adapter architectures use to emit a sized immediate: forwards
/// to a numeric output depositing into `bytes`, which must already be
/// sized.
pub fn to_bytes(
    intn: &IntNum,
    bytes: &mut Bytes,
    size: u32,
    shift: u32,
    warn: bool,
    source: Source,
    diags: &mut Diagnostics,
) {
    let mut out = NumericOutput::new(bytes);
    out.set_size(size);
    out.set_shift(shift);
    out.set_source(source);
    if warn {
        out.enable_warnings();
    }
    out.output_integer(intn);
    out.emit_warnings(diags);
}

const BRANCH_SHORT_LEN: u64 = 2;
const BRANCH_NEAR_LEN: u64 = 6;
const BRANCH_SPAN: i32 = 2;

/// Conditional branch with a short (opcode + disp8) and a near
/// (two-byte opcode + disp32) form. The canonical span-dependent
/// encoding: it starts short and the optimizer grows it when the
/// displacement stops fitting.
#[derive(Debug)]
pub struct BranchBytecode {
    target: Value,
    near: bool,
}

impl BranchBytecode {
    pub fn new(mut target: Value) -> Self {
        target.set_ip_rel();
        target.set_jump_target();
        target.set_signed();
        BranchBytecode {
            target,
            near: false,
        }
    }

    pub fn to_sym(sym: SymbolRef) -> Self {
        BranchBytecode::new(Value::from_sym(32, sym))
    }

    pub fn is_near(&self) -> bool {
        self.near
    }
}

impl SpanDependent for BranchBytecode {
    fn finalize(
        &mut self,
        sect: usize,
        bc_idx: usize,
        abs_sym: SymbolRef,
        table: &SymbolTable,
        diags: &mut Diagnostics,
    ) -> bool {
        if !self.target.finalize(table, diags, DiagId::TooComplexJump) {
            return false;
        }
        if self.target.is_complex_relative() {
            diags.report(self.target.source(), DiagId::InvalidJumpTarget);
            return false;
        }
        // Displacements are measured from the bytecode start; the
        // length adjustment happens at output.
        let start = Location {
            sect,
            bc: bc_idx,
            off: 0,
        };
        if !self.target.sub_relative(abs_sym, table, start) {
            diags.report(self.target.source(), DiagId::TooComplexJump);
            return false;
        }
        true
    }

    fn calc_len(
        &mut self,
        _table: &SymbolTable,
        add_span: &mut dyn FnMut(i32, &Value, i64, i64),
        _diags: &mut Diagnostics,
    ) -> Result<u64, ()> {
        if self.near {
            return Ok(BRANCH_NEAR_LEN);
        }
        // disp8 covers [-128, 127] from the end of the short form.
        add_span(
            BRANCH_SPAN,
            &self.target,
            -128 + BRANCH_SHORT_LEN as i64,
            127 + BRANCH_SHORT_LEN as i64,
        );
        Ok(BRANCH_SHORT_LEN)
    }

    fn expand(
        &mut self,
        span_id: i32,
        _old_val: i64,
        _new_val: i64,
        _neg_thres: &mut i64,
        _pos_thres: &mut i64,
        _diags: &mut Diagnostics,
    ) -> Result<(u64, bool), ()> {
        debug_assert_eq!(span_id, BRANCH_SPAN);
        self.near = true;
        Ok((BRANCH_NEAR_LEN, false))
    }

    fn output(&self, buf: &mut Bytes, env: &mut OutputEnv) -> bool {
        let resolve_sym = |s: SymbolRef| {
            env.table.get(s).get_label().and_then(|l| (env.resolve_loc)(l))
        };
        let d = match self.target.get_intnum(
            env.diags,
            Some(env.resolve_loc),
            Some(&resolve_sym),
        ) {
            Some(d) => d.as_i64_saturating(),
            None => {
                env.diags
                    .report(self.target.source(), DiagId::TooComplexJump);
                return false;
            }
        };
        if self.near {
            buf.write_8(0x0F);
            buf.write_8(0x84);
            buf.write_32((d - BRANCH_NEAR_LEN as i64) as u32);
        } else {
            buf.write_8(0x74);
            buf.write_8((d - BRANCH_SHORT_LEN as i64) as u8);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_identity() {
        let a = RegisterRef::new(0, 3);
        let b = RegisterRef::new(0, 3);
        let c = RegisterRef::new(1, 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.get_num(), c.get_num());
    }

    #[test]
    fn test_basic_arch_fill() {
        let arch = BasicArch;
        let mut buf = Vec::new();
        assert!(arch.code_fill(3, &mut buf));
        assert_eq!(buf, vec![0x90, 0x90, 0x90]);
    }

    #[test]
    fn test_to_bytes_adapter() {
        let mut bytes = Bytes::new();
        bytes.write_zeros(2);
        let mut diags = Diagnostics::new();
        to_bytes(
            &IntNum::new(0x1234),
            &mut bytes,
            16,
            0,
            true,
            Source::at(1),
            &mut diags,
        );
        assert_eq!(&bytes[..], &[0x34, 0x12]);
        assert!(!diags.has_error_occurred());
    }
}
