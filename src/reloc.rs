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

use crate::intnum::IntNum;
use crate::symbol::SymbolRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    Absolute,
    /// The target minus either the relocation's own position or the
    /// subtrahend symbol.
    Relative,
    /// Relative to the start of the target's section.
    SectionRelative,
}

/// One relocation record, produced during fixup output when a value
/// keeps a relative portion. Per-section lists stay ordered by offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Reloc {
    /// Offset within the section.
    pub offset: u64,
    pub sym: SymbolRef,
    pub kind: RelocKind,
    pub size: u32,
    /// Constant already written into the patched bytes.
    pub addend: IntNum,
    /// Subtrahend symbol for paired-difference relocations.
    pub sub: Option<SymbolRef>,
}
