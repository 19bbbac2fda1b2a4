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

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;

use bitflags::bitflags;

use crate::errors::{DiagId, Diagnostics, Source};
use crate::expr::{Expr, TermKind};
use crate::location::Location;

bitflags! {
    /// Symbol visibility. Local is the empty set; GLOBAL is
    /// OR-combinable with the others.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Visibility: u32 {
        const GLOBAL = 1 << 0;
        const COMMON = 1 << 1;
        const EXTERN = 1 << 2;
        const DLOCAL = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Status: u32 {
        const USED = 1 << 0;
        const DEFINED = 1 << 1;
        const VALUED = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    Unknown,
    Equ,
    Label,
    Special,
}

/// Stable handle into the symbol arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolRef(NonZeroU32);

impl SymbolRef {
    fn from_index(i: usize) -> Self {
        SymbolRef(NonZeroU32::new(i as u32 + 1).expect("index overflow"))
    }

    fn index(&self) -> usize {
        self.0.get() as usize - 1
    }

    #[cfg(test)]
    pub(crate) fn for_test(n: u32) -> Self {
        SymbolRef(NonZeroU32::new(n).expect("nonzero test ref"))
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    name: String,
    ty: SymbolType,
    status: Status,
    visibility: Visibility,
    equ: Option<Expr>,
    loc: Option<Location>,
    decl_source: Source,
    def_source: Source,
    use_source: Source,
}

impl Symbol {
    fn new(name: String) -> Self {
        Symbol {
            name,
            ty: SymbolType::Unknown,
            status: Status::empty(),
            visibility: Visibility::empty(),
            equ: None,
            loc: None,
            decl_source: Source::none(),
            def_source: Source::none(),
            use_source: Source::none(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sym_type(&self) -> SymbolType {
        self.ty
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn is_defined(&self) -> bool {
        self.status.contains(Status::DEFINED)
    }

    pub fn is_valued(&self) -> bool {
        self.status.contains(Status::VALUED)
    }

    pub fn is_used(&self) -> bool {
        self.status.contains(Status::USED)
    }

    pub fn is_extern(&self) -> bool {
        self.visibility.contains(Visibility::EXTERN)
    }

    pub fn equ(&self) -> Option<&Expr> {
        if self.ty == SymbolType::Equ {
            self.equ.as_ref()
        } else {
            None
        }
    }

    /// The label's location, for label symbols only.
    pub fn get_label(&self) -> Option<Location> {
        if self.ty == SymbolType::Label {
            self.loc
        } else {
            None
        }
    }

    pub fn def_source(&self) -> Source {
        self.def_source
    }

    pub fn use_source(&self) -> Source {
        self.use_source
    }
}

/// The object's symbols: a name-interning map over an append-only
/// arena. Anonymous symbols live in the arena without a map entry.
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: HashMap<String, SymbolRef>,
    arena: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Interned lookup-or-create by name.
    pub fn get_or_create(&mut self, name: &str) -> SymbolRef {
        if let Some(&r) = self.names.get(name) {
            return r;
        }
        let r = SymbolRef::from_index(self.arena.len());
        self.arena.push(Symbol::new(name.to_string()));
        self.names.insert(name.to_string(), r);
        r
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolRef> {
        self.names.get(name).copied()
    }

    /// Creates a symbol outside the name map (e.g. the absolute
    /// pseudo-symbol).
    pub fn create_anonymous(&mut self, name: &str) -> SymbolRef {
        let r = SymbolRef::from_index(self.arena.len());
        self.arena.push(Symbol::new(name.to_string()));
        r
    }

    pub fn get(&self, r: SymbolRef) -> &Symbol {
        &self.arena[r.index()]
    }

    fn get_mut(&mut self, r: SymbolRef) -> &mut Symbol {
        &mut self.arena[r.index()]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolRef, &Symbol)> {
        self.arena
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolRef::from_index(i), s))
    }

    fn define_check(&mut self, r: SymbolRef, source: Source, diags: &mut Diagnostics) -> bool {
        let sym = self.get(r);
        if sym.is_defined() {
            let name = sym.name.clone();
            let prev = if sym.def_source.is_valid() {
                sym.def_source
            } else {
                sym.decl_source
            };
            diags.report(source, DiagId::SymbolRedefined(name));
            diags.report(prev, DiagId::PreviousDefinition);
            return false;
        }
        if sym.is_extern() {
            let name = sym.name.clone();
            let decl = sym.decl_source;
            diags.report(source, DiagId::ExternDefined(name));
            if decl.is_valid() {
                diags.report(decl, DiagId::PreviousDefinition);
            }
        }
        true
    }

    pub fn define_equ(
        &mut self,
        r: SymbolRef,
        e: Expr,
        source: Source,
        diags: &mut Diagnostics,
    ) -> bool {
        if !self.define_check(r, source, diags) {
            return false;
        }
        let sym = self.get_mut(r);
        sym.ty = SymbolType::Equ;
        sym.status |= Status::DEFINED | Status::VALUED;
        sym.equ = Some(e);
        sym.def_source = source;
        true
    }

    pub fn define_label(
        &mut self,
        r: SymbolRef,
        loc: Location,
        source: Source,
        diags: &mut Diagnostics,
    ) -> bool {
        if !self.define_check(r, source, diags) {
            return false;
        }
        let sym = self.get_mut(r);
        sym.ty = SymbolType::Label;
        sym.status |= Status::DEFINED;
        sym.loc = Some(loc);
        sym.def_source = source;
        true
    }

    pub fn define_special(&mut self, r: SymbolRef, vis: Visibility) {
        let sym = self.get_mut(r);
        debug_assert!(!sym.is_defined(), "special symbol already defined");
        sym.ty = SymbolType::Special;
        sym.status |= Status::DEFINED | Status::VALUED;
        sym.visibility = vis;
    }

    fn ok_to_declare(&self, r: SymbolRef, vis: Visibility) -> bool {
        // Global is always addable; extern and common are mutually
        // exclusive with each other and any definition; redundant
        // same-kind declarations pass.
        if vis == Visibility::GLOBAL {
            return true;
        }
        let sym = self.get(r);
        if sym.is_defined() {
            return false;
        }
        if sym.visibility.contains(Visibility::COMMON) {
            return vis == Visibility::COMMON;
        }
        if sym.visibility.contains(Visibility::EXTERN) {
            return vis == Visibility::EXTERN;
        }
        true
    }

    pub fn declare(
        &mut self,
        r: SymbolRef,
        vis: Visibility,
        source: Source,
        diags: &mut Diagnostics,
    ) -> bool {
        if self.ok_to_declare(r, vis) {
            let sym = self.get_mut(r);
            sym.decl_source = source;
            sym.visibility |= vis;
            true
        } else {
            let sym = self.get(r);
            let name = sym.name.clone();
            let prev = if sym.def_source.is_valid() {
                sym.def_source
            } else {
                sym.decl_source
            };
            diags.report(source, DiagId::SymbolRedefined(name));
            diags.report(prev, DiagId::PreviousDefinition);
            false
        }
    }

    pub fn mark_used(&mut self, r: SymbolRef, source: Source) {
        let sym = self.get_mut(r);
        if !sym.status.contains(Status::USED) {
            sym.status |= Status::USED;
            sym.use_source = source;
        }
    }
}

/// Expands every EQU symbol in `e` in place by substituting its
/// defining expression (with depth adjustment). A symbol revisited
/// inside its own expansion is a circular reference: expansion returns
/// false and `e` is left unmodified.
pub fn expand_equ(e: &mut Expr, table: &SymbolTable) -> bool {
    let mut expanded = e.clone();
    let mut active = HashSet::new();
    if expand_equ_inner(&mut expanded, table, &mut active) {
        *e = expanded;
        true
    } else {
        false
    }
}

fn expand_equ_inner(e: &mut Expr, table: &SymbolTable, active: &mut HashSet<SymbolRef>) -> bool {
    let mut i = 0;
    while i < e.terms().len() {
        let sym = match e.terms()[i].kind {
            TermKind::Sym(s) => s,
            _ => {
                i += 1;
                continue;
            }
        };
        let equ = match table.get(sym).equ() {
            Some(equ) => equ,
            None => {
                i += 1;
                continue;
            }
        };
        if !active.insert(sym) {
            return false;
        }
        let mut sub = equ.clone();
        if !expand_equ_inner(&mut sub, table, active) {
            return false;
        }
        active.remove(&sym);

        let depth = e.terms()[i].depth;
        let mut spliced: Vec<_> = sub.terms().to_vec();
        for t in &mut spliced {
            t.depth += depth;
        }
        let n = spliced.len();
        e.terms_mut().splice(i..i + 1, spliced);
        i += n;
    }
    true
}
