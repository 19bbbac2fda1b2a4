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

use bitflags::bitflags;

use crate::bytecode::{Bytecode, BytecodeKind};
use crate::bytes::{Bytes, Endian};
use crate::errors::{Diagnostics, Source};
use crate::floatnum::FloatNum;
use crate::intnum::IntNum;
use crate::location::Location;
use crate::reloc::Reloc;
use crate::value::Value;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const CODE = 1 << 0;
        const DATA = 1 << 1;
        const BSS = 1 << 2;
    }
}

/// A named, ordered container of bytecodes. Always holds at least one
/// (empty) head bytecode so locations can point before any contents.
#[derive(Debug)]
pub struct Section {
    name: String,
    index: usize,
    vma: u64,
    lma: u64,
    align: u64,
    flags: SectionFlags,
    bcs: Vec<Bytecode>,
    relocs: Vec<Reloc>,
    last_gap: bool,
}

impl Section {
    pub fn new(name: &str, index: usize, flags: SectionFlags) -> Self {
        let mut sect = Section {
            name: name.to_string(),
            index,
            vma: 0,
            lma: 0,
            align: 1,
            flags,
            bcs: Vec::new(),
            relocs: Vec::new(),
            last_gap: false,
        };
        sect.bcs.push(Bytecode::empty(Source::none()));
        sect
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    pub fn is_code(&self) -> bool {
        self.flags.contains(SectionFlags::CODE)
    }

    pub fn is_bss(&self) -> bool {
        self.flags.contains(SectionFlags::BSS)
    }

    pub fn vma(&self) -> u64 {
        self.vma
    }

    pub fn set_vma(&mut self, vma: u64) {
        self.vma = vma;
    }

    pub fn lma(&self) -> u64 {
        self.lma
    }

    pub fn set_lma(&mut self, lma: u64) {
        self.lma = lma;
    }

    pub fn align(&self) -> u64 {
        self.align
    }

    pub fn set_align(&mut self, align: u64) {
        self.align = align;
    }

    pub fn bcs(&self) -> &[Bytecode] {
        &self.bcs
    }

    pub fn bcs_mut(&mut self) -> &mut Vec<Bytecode> {
        &mut self.bcs
    }

    pub fn bc(&self, i: usize) -> &Bytecode {
        &self.bcs[i]
    }

    pub fn relocs(&self) -> &[Reloc] {
        &self.relocs
    }

    pub fn set_relocs(&mut self, relocs: Vec<Reloc>) {
        self.relocs = relocs;
    }

    /// Appends a bytecode and returns its index.
    pub fn append_bytecode(&mut self, bc: Bytecode) -> usize {
        self.last_gap = false;
        self.bcs.push(bc);
        self.bcs.len() - 1
    }

    /// Starts a fresh empty bytecode.
    pub fn start_bytecode(&mut self, source: Source) -> usize {
        self.last_gap = false;
        self.bcs.push(Bytecode::empty(source));
        self.bcs.len() - 1
    }

    /// Index of the trailing bytecode if it can still take fixed data,
    /// otherwise a fresh one.
    pub fn fresh_bytecode(&mut self) -> usize {
        let last = self.bcs.len() - 1;
        if matches!(self.bcs[last].kind(), BytecodeKind::Empty) {
            last
        } else {
            self.start_bytecode(Source::none())
        }
    }

    /// Appends N uninitialized bytes, merging into a trailing gap.
    pub fn append_gap(&mut self, size: u64, source: Source) -> usize {
        let last = self.bcs.len() - 1;
        if self.last_gap && matches!(self.bcs[last].kind(), BytecodeKind::Gap { .. }) {
            self.bcs[last].extend_gap(size);
            return last;
        }
        self.bcs.push(Bytecode::gap(size, source));
        self.last_gap = true;
        self.bcs.len() - 1
    }

    /// The location just past everything appended so far.
    pub fn end_loc(&mut self) -> Location {
        let bc = self.fresh_bytecode();
        Location {
            sect: self.index,
            bc,
            off: self.bcs[bc].fixed_len(),
        }
    }

    /// Appends a single raw data byte.
    pub fn append_byte(&mut self, byte: u8, source: Source) {
        let bc = self.fresh_bytecode();
        self.bcs[bc].append_fixed_bytes(&[byte]);
        let _ = source;
    }

    /// Appends a sized data value as a fixup.
    pub fn append_data_value(&mut self, mut value: Value, source: Source) {
        value.set_source(source);
        let bc = self.fresh_bytecode();
        self.bcs[bc].append_fixed(value);
    }

    /// Appends an integer constant in `size` bytes.
    pub fn append_data_int(&mut self, v: IntNum, size: u32, endian: Endian, source: Source) {
        let bc = self.fresh_bytecode();
        let mut field = Bytes::with_endian(endian);
        field.write_intnum(&v, size as usize);
        self.bcs[bc].append_fixed_bytes(&field);
        let _ = source;
    }

    /// Appends a float constant in `size` bytes (2/4/8/10).
    pub fn append_data_float(&mut self, f: FloatNum, size: u32, source: Source) {
        let mut value = Value::from_expr(size * 8, crate::expr::Expr::from_float(f));
        value.set_source(source);
        let bc = self.fresh_bytecode();
        self.bcs[bc].append_fixed(value);
    }

    /// Appends string bytes zero-padded up to a multiple of `size`.
    pub fn append_data_str(&mut self, s: &str, size: u32, source: Source) {
        let bc = self.fresh_bytecode();
        let data = s.as_bytes();
        self.bcs[bc].append_fixed_bytes(data);
        let rem = data.len() % size.max(1) as usize;
        if rem != 0 {
            let pad = size as usize - rem;
            self.bcs[bc].append_fixed_bytes(&vec![0; pad]);
        }
        let _ = source;
    }

    pub fn add_reloc(&mut self, reloc: Reloc) {
        self.relocs.push(reloc);
    }

    /// Sequentially recomputes every bytecode's offset from its
    /// predecessor.
    pub fn update_offsets(&mut self, diags: &mut Diagnostics) {
        let mut offset = 0;
        for bc in &mut self.bcs {
            offset = bc.update_offset(offset, diags);
        }
    }

    /// Absolute offset of a location within this section.
    pub fn loc_offset(&self, loc: Location) -> Option<IntNum> {
        if loc.sect != self.index || loc.bc >= self.bcs.len() {
            return None;
        }
        Some(IntNum::from_u64(self.bcs[loc.bc].offset() + loc.off))
    }

    /// Distance `b - a` using assigned offsets; both locations must be
    /// in this section.
    pub fn calc_dist(&self, a: Location, b: Location) -> Option<IntNum> {
        if a.sect != b.sect {
            return None;
        }
        if a.bc == b.bc {
            return Some(IntNum::new(b.off as i64 - a.off as i64));
        }
        let av = self.loc_offset(a)?;
        let bv = self.loc_offset(b)?;
        Some(bv.sub(&av))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sect() -> Section {
        Section::new(".text", 0, SectionFlags::CODE)
    }

    #[test]
    fn test_head_bytecode_exists() {
        let s = sect();
        assert_eq!(s.bcs().len(), 1);
        assert!(!s.bc(0).has_contents());
    }

    #[test]
    fn test_gap_merging() {
        let mut s = sect();
        s.append_gap(4, Source::none());
        s.append_gap(6, Source::none());
        assert_eq!(s.bcs().len(), 2);
        match s.bc(1).kind() {
            BytecodeKind::Gap { size } => assert_eq!(*size, 10),
            other => panic!("expected gap, got {:?}", other),
        }

        // Unrelated append breaks the merge chain.
        s.append_byte(0x90, Source::none());
        s.append_gap(2, Source::none());
        assert_eq!(s.bcs().len(), 4);
    }

    #[test]
    fn test_fresh_bytecode_reuses_head() {
        let mut s = sect();
        s.append_byte(1, Source::none());
        s.append_byte(2, Source::none());
        // Both bytes land in the head bytecode's fixed portion.
        assert_eq!(s.bcs().len(), 1);
        assert_eq!(s.bc(0).fixed_len(), 2);
    }

    #[test]
    fn test_end_loc_tracks_fixed_len() {
        let mut s = sect();
        s.append_byte(1, Source::none());
        let loc = s.end_loc();
        assert_eq!(loc.bc, 0);
        assert_eq!(loc.off, 1);
    }

    #[test]
    fn test_append_data_str_pads() {
        let mut s = sect();
        s.append_data_str("abc", 4, Source::none());
        assert_eq!(s.bc(0).fixed_len(), 4);
        assert_eq!(&s.bc(0).fixed()[..], &[b'a', b'b', b'c', 0]);
    }

    #[test]
    fn test_update_offsets_sequential() {
        let mut s = sect();
        s.append_byte(0x90, Source::none());
        s.append_gap(5, Source::none());
        s.append_byte(0xC3, Source::none());

        let table = crate::symbol::SymbolTable::new();
        let mut diags = Diagnostics::new();
        for bc in s.bcs_mut() {
            assert!(bc.calc_len(&table, &mut |_, _, _, _| {}, &mut diags));
        }
        s.update_offsets(&mut diags);
        assert_eq!(s.bc(0).offset(), 0);
        assert_eq!(s.bc(1).offset(), 1);
        assert_eq!(s.bc(2).offset(), 6);
    }

    #[test]
    fn test_calc_dist() {
        let mut s = sect();
        s.append_byte(0x90, Source::none());
        s.append_gap(5, Source::none());
        s.append_byte(0xC3, Source::none());
        let table = crate::symbol::SymbolTable::new();
        let mut diags = Diagnostics::new();
        for bc in s.bcs_mut() {
            assert!(bc.calc_len(&table, &mut |_, _, _, _| {}, &mut diags));
        }
        s.update_offsets(&mut diags);

        let a = Location {
            sect: 0,
            bc: 0,
            off: 0,
        };
        let b = Location {
            sect: 0,
            bc: 2,
            off: 1,
        };
        assert_eq!(s.calc_dist(a, b), Some(IntNum::new(7)));
        // Same-bytecode distances never need offsets.
        let c = Location {
            sect: 0,
            bc: 2,
            off: 0,
        };
        assert_eq!(s.calc_dist(c, b), Some(IntNum::new(1)));
    }
}
