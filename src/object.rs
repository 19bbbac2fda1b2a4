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

use std::collections::HashMap;

use log::debug;

use crate::arch::Arch;
use crate::bytecode::output::{OutputAdapter, OutputEnv};
use crate::errors::{DiagId, Diagnostics, Source};
use crate::intnum::IntNum;
use crate::location::Location;
use crate::numeric_output::NumericOutput;
use crate::optimizer::optimize_section;
use crate::reloc::{Reloc, RelocKind};
use crate::section::{Section, SectionFlags};
use crate::symbol::{SymbolRef, SymbolTable};
use crate::value::{SubPortion, Value};

/// Final bytes of one section.
#[derive(Debug, Clone)]
pub struct SectionBytes {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Result of a full assembly run: per-section contents; relocations
/// stay attached to the object's sections.
#[derive(Debug, Default)]
pub struct ObjectOutput {
    pub sections: Vec<SectionBytes>,
}

/// An object under assembly: named sections in order plus the symbol
/// table. Drives the finalize -> optimize -> output pipeline.
pub struct Object {
    name: String,
    arch: Box<dyn Arch>,
    sections: Vec<Section>,
    section_names: HashMap<String, usize>,
    symbols: SymbolTable,
    /// Pseudo-symbol used as the additive anchor when building
    /// subtractive-only values.
    absolute_sym: SymbolRef,
}

impl Object {
    pub fn new(name: &str, arch: Box<dyn Arch>) -> Self {
        let mut symbols = SymbolTable::new();
        let absolute_sym = symbols.create_anonymous("[absolute]");
        Object {
            name: name.to_string(),
            arch,
            sections: Vec::new(),
            section_names: HashMap::new(),
            symbols,
            absolute_sym,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> &dyn Arch {
        &*self.arch
    }

    pub fn absolute_symbol(&self) -> SymbolRef {
        self.absolute_sym
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Looks up or appends a section by name, returning its index.
    pub fn append_section(&mut self, name: &str, flags: SectionFlags) -> usize {
        if let Some(&i) = self.section_names.get(name) {
            return i;
        }
        let i = self.sections.len();
        self.sections.push(Section::new(name, i, flags));
        self.section_names.insert(name.to_string(), i);
        i
    }

    pub fn find_section(&self, name: &str) -> Option<usize> {
        self.section_names.get(name).copied()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, i: usize) -> &Section {
        &self.sections[i]
    }

    pub fn section_mut(&mut self, i: usize) -> &mut Section {
        &mut self.sections[i]
    }

    /// Defines a label at the current end of a section.
    pub fn define_label_here(
        &mut self,
        sym: SymbolRef,
        sect: usize,
        source: Source,
        diags: &mut Diagnostics,
    ) -> bool {
        let loc = self.sections[sect].end_loc();
        self.symbols.define_label(sym, loc, source, diags)
    }

    /// Phase 1: finalize every bytecode's values. Errors accumulate so
    /// later ones still surface; the caller checks the diagnostics
    /// before moving on.
    pub fn finalize(&mut self, diags: &mut Diagnostics) {
        debug!("finalizing {} sections", self.sections.len());
        let abs_sym = self.absolute_sym;
        let symbols = &self.symbols;
        for sect in &mut self.sections {
            let sect_idx = sect.index();
            for i in 0..sect.bcs().len() {
                sect.bcs_mut()[i].finalize(sect_idx, i, abs_sym, symbols, diags);
            }
        }
    }

    /// Phase 2: resolve span-dependent lengths and assign offsets,
    /// section by section.
    pub fn optimize(&mut self, diags: &mut Diagnostics) {
        for sect in &mut self.sections {
            debug!("optimizing section {}", sect.name());
            optimize_section(sect, &self.symbols, diags);
            if diags.has_error_occurred() {
                return;
            }
        }
    }

    /// Phase 3: drive every bytecode's output, converting residual
    /// relative values into relocations.
    pub fn output(&mut self, diags: &mut Diagnostics) -> ObjectOutput {
        let mut out = ObjectOutput::default();
        let mut all_relocs: Vec<Vec<Reloc>> = Vec::new();

        for si in 0..self.sections.len() {
            let sections = &self.sections;
            let sect = &sections[si];
            let resolve_loc =
                |l: Location| -> Option<IntNum> { sections.get(l.sect)?.loc_offset(l) };
            let mut adapter = SectionOutput::default();
            let mut env = OutputEnv {
                table: &self.symbols,
                resolve_loc: &resolve_loc,
                arch: &*self.arch,
                diags: &mut *diags,
                is_code_section: sect.is_code(),
                is_init_section: !sect.is_bss()
                    && sect
                        .flags()
                        .intersects(SectionFlags::CODE | SectionFlags::DATA),
            };
            for (i, bc) in sect.bcs().iter().enumerate() {
                if !bc.output(si, i, &mut adapter, &mut env) {
                    break;
                }
            }
            out.sections.push(SectionBytes {
                name: sect.name().to_string(),
                bytes: adapter.bytes,
            });
            all_relocs.push(adapter.relocs);
        }

        for (si, relocs) in all_relocs.into_iter().enumerate() {
            self.sections[si].set_relocs(relocs);
        }
        out
    }
}

/// Built-in flat output: collects final section bytes and appends a
/// relocation record per residual relative value.
#[derive(Debug, Default)]
struct SectionOutput {
    bytes: Vec<u8>,
    relocs: Vec<Reloc>,
}

impl OutputAdapter for SectionOutput {
    fn convert_value_to_bytes(
        &mut self,
        value: &mut Value,
        loc: Location,
        num_out: &mut NumericOutput,
        env: &mut OutputEnv,
    ) -> bool {
        let resolve_sym = |s: SymbolRef| {
            env.table.get(s).get_label().and_then(|l| (env.resolve_loc)(l))
        };
        let mut outval = IntNum::zero();
        if value.output_basic(
            num_out,
            &mut outval,
            env.diags,
            Some(env.resolve_loc),
            Some(&resolve_sym),
        ) {
            return true;
        }

        // A relative portion survives; this becomes a relocation.
        let src = value.source();
        let Some(rel) = value.rel() else {
            env.diags.report(src, DiagId::RelocTooComplex);
            num_out.output_integer(&IntNum::zero());
            return true;
        };
        if value.wrt().is_some() || value.seg_of() {
            env.diags.report(src, DiagId::RelocTooComplex);
            num_out.output_integer(&IntNum::zero());
            return true;
        }

        let mut kind = if value.is_section_rel() {
            RelocKind::SectionRelative
        } else {
            RelocKind::Absolute
        };
        let mut sub_sym = None;
        if value.has_sub_relative() {
            let dist = |a: Location, b: Location| -> Option<IntNum> {
                if a.sect != b.sect {
                    return None;
                }
                let ao = (env.resolve_loc)(a)?;
                let bo = (env.resolve_loc)(b)?;
                Some(bo.sub(&ao))
            };
            if let Some(d) = value.calc_pcrel_sub(env.table, loc, &dist) {
                // rel - sub = (rel - here) + (here - sub): the first
                // half is the relocation, the second lands in the
                // literal.
                outval = outval.add(&d);
                kind = RelocKind::Relative;
            } else if let Some(SubPortion::Sym(s)) = value.sub() {
                sub_sym = Some(s);
                kind = RelocKind::Relative;
            } else {
                env.diags.report(src, DiagId::RelocTooComplex);
                num_out.output_integer(&IntNum::zero());
                return true;
            }
        }

        let offset = (env.resolve_loc)(loc)
            .and_then(|v| v.get_u64())
            .unwrap_or(0);
        self.relocs.push(Reloc {
            offset,
            sym: rel,
            kind,
            size: value.size(),
            addend: outval.clone(),
            sub: sub_sym,
        });
        num_out.output_integer(&outval);
        true
    }

    fn output_bytes(&mut self, data: &[u8], _source: Source) {
        self.bytes.extend_from_slice(data);
    }

    fn output_gap(&mut self, size: u64, _source: Source) {
        let new_len = self.bytes.len() + size as usize;
        self.bytes.resize(new_len, 0);
    }
}
