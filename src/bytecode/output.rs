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

use std::fs;

use super::{Bytecode, BytecodeKind};
use crate::arch::Arch;
use crate::bytes::Bytes;
use crate::errors::{DiagId, Diagnostics, Source};
use crate::intnum::IntNum;
use crate::location::Location;
use crate::numeric_output::NumericOutput;
use crate::symbol::SymbolTable;
use crate::value::Value;

/// Everything bytecode output needs from the surrounding object:
/// symbol resolution, final offsets, the architecture, and the
/// diagnostic sink.
pub struct OutputEnv<'a> {
    pub table: &'a SymbolTable,
    /// Absolute offset of a location within its section.
    pub resolve_loc: &'a dyn Fn(Location) -> Option<IntNum>,
    pub arch: &'a dyn Arch,
    pub diags: &'a mut Diagnostics,
    pub is_code_section: bool,
    /// Gaps in initialized sections warn.
    pub is_init_section: bool,
}

/// The object-format seam consumed during output. The format decides
/// how a still-relative value becomes bytes plus a relocation.
pub trait OutputAdapter {
    /// Writes the value's bytes through `num_out`, emitting a
    /// relocation for any remaining relative portion. False means an
    /// irrecoverable error.
    fn convert_value_to_bytes(
        &mut self,
        value: &mut Value,
        loc: Location,
        num_out: &mut NumericOutput,
        env: &mut OutputEnv,
    ) -> bool;

    fn output_bytes(&mut self, data: &[u8], source: Source);

    fn output_gap(&mut self, size: u64, source: Source);
}

impl Bytecode {
    /// Emits this bytecode: fixed bytes with fixups applied, then the
    /// kind-specific tail. Called once, after optimization.
    pub fn output(
        &self,
        sect: usize,
        bc_idx: usize,
        adapter: &mut dyn OutputAdapter,
        env: &mut OutputEnv,
    ) -> bool {
        let mut fixed: Vec<u8> = self.fixed.to_vec();

        for fixup in &self.fixups {
            let off = fixup.off as usize;
            let size_bytes =
                ((fixup.value.size() + fixup.value.shift() + 7) / 8) as usize;
            debug_assert!(off + size_bytes <= fixed.len());
            let loc = Location {
                sect,
                bc: bc_idx,
                off: fixup.off as u64,
            };

            let mut patch = Bytes::with_endian(env.arch.endian());
            patch.extend_from_slice(&fixed[off..off + size_bytes]);

            // Copy the value so repeated bytecodes re-resolve cleanly.
            let mut vcopy = fixup.value.clone();
            {
                let mut num_out = NumericOutput::new(&mut patch);
                vcopy.configure_output(&mut num_out);
                if !adapter.convert_value_to_bytes(&mut vcopy, loc, &mut num_out, env) {
                    return false;
                }
                // Flush per fixup to keep source attribution accurate.
                num_out.emit_warnings(env.diags);
            }
            fixed[off..off + size_bytes].copy_from_slice(&patch);
        }

        adapter.output_bytes(&fixed, self.source);

        match &self.kind {
            BytecodeKind::Empty => {}
            BytecodeKind::Gap { size } => {
                if env.is_init_section {
                    env.diags.report(self.source, DiagId::UninitContents);
                }
                adapter.output_gap(*size, self.source);
            }
            BytecodeKind::Align { fill, .. } => {
                let len = self.len as usize;
                if len > 0 {
                    let buf = self.fill_pattern(fill.as_deref(), len, env);
                    adapter.output_bytes(&buf, self.source);
                }
            }
            BytecodeKind::Org { fill, .. } => {
                if self.len > 0 {
                    adapter.output_bytes(&vec![*fill; self.len as usize], self.source);
                }
            }
            BytecodeKind::Leb128 { value, sign } => {
                let resolve_sym = |s: crate::symbol::SymbolRef| {
                    env.table.get(s).get_label().and_then(|l| (env.resolve_loc)(l))
                };
                let resolved = value.get_intnum(
                    env.diags,
                    Some(env.resolve_loc),
                    Some(&resolve_sym),
                );
                let v = match resolved {
                    Some(v) => v,
                    None => {
                        env.diags.report(self.source, DiagId::RelocTooComplex);
                        IntNum::zero()
                    }
                };
                adapter.output_bytes(&encode_leb128_exact(&v, *sign, self.len), self.source);
            }
            BytecodeKind::Incbin {
                path,
                start_off,
                len,
                ..
            } => {
                if *len > 0 {
                    match fs::read(path.as_path()) {
                        Ok(data) => {
                            let lo = *start_off as usize;
                            let hi = (lo + *len as usize).min(data.len());
                            adapter.output_bytes(&data[lo..hi], self.source);
                        }
                        Err(_) => {
                            env.diags.report(
                                self.source,
                                DiagId::FileRead(path.display().to_string()),
                            );
                            adapter.output_gap(*len, self.source);
                        }
                    }
                }
            }
            BytecodeKind::Multiple {
                count_val, inner, ..
            } => {
                for _ in 0..*count_val {
                    if !inner.output(sect, bc_idx, adapter, env) {
                        return false;
                    }
                }
            }
            BytecodeKind::Custom(contents) => {
                let mut buf = Bytes::with_endian(env.arch.endian());
                if !contents.output(&mut buf, env) {
                    return false;
                }
                debug_assert_eq!(buf.len() as u64, self.len);
                adapter.output_bytes(&buf, self.source);
            }
        }
        true
    }

    fn fill_pattern(&self, fill: Option<&[u8]>, len: usize, env: &OutputEnv) -> Vec<u8> {
        if let Some(pattern) = fill {
            if !pattern.is_empty() {
                return pattern.iter().copied().cycle().take(len).collect();
            }
        }
        if env.is_code_section {
            let mut buf = Vec::new();
            if env.arch.code_fill(len, &mut buf) {
                return buf;
            }
        }
        vec![0; len]
    }
}

/// Encodes exactly `nbytes` LEB128 groups for `v`, padding with
/// sign/zero extension groups when the canonical encoding is shorter.
/// Length-stable output is what span resolution promised.
fn encode_leb128_exact(v: &IntNum, sign: bool, nbytes: u64) -> Vec<u8> {
    let _ = sign;
    let n = nbytes.max(1) as usize;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut byte = v.extract_bits((i * 7) as u32, 7) as u8;
        if i + 1 < n {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}
