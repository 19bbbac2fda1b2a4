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

use smallvec::SmallVec;

use crate::errors::{DiagId, Diagnostics, Source};
use crate::expr::eval::evaluate;
use crate::expr::{Expr, Op, TermKind, TermTypes};
use crate::intnum::IntNum;
use crate::location::Location;
use crate::numeric_output::NumericOutput;
use crate::symbol::{SymbolRef, SymbolTable, expand_equ};

pub const RSHIFT_MAX: u32 = 127;
pub const SHIFT_MAX: u32 = 63;

/// The single subtractive relative portion of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPortion {
    Sym(SymbolRef),
    Loc(Location),
}

/// A size-bounded, possibly-relocatable expression: an absolute
/// portion, at most one additive relative symbol, at most one
/// subtractive symbol or location, and an optional WRT frame, plus
/// shift and interpretation metadata.
#[derive(Debug, Clone)]
pub struct Value {
    abs: Option<Expr>,
    rel: Option<SymbolRef>,
    wrt: Option<SymbolRef>,
    sub: Option<SubPortion>,
    source: Source,
    /// Distance from the start of the instruction to this value's
    /// fixup; some relocation formats need it.
    insn_start: u32,
    /// Distance from the end of this value to the next instruction.
    next_insn: u32,
    seg_of: bool,
    rshift: u32,
    shift: u32,
    ip_rel: bool,
    jump_target: bool,
    section_rel: bool,
    no_warn: bool,
    sign: bool,
    size: u32,
}

impl Value {
    pub fn new(size: u32) -> Self {
        Value {
            abs: None,
            rel: None,
            wrt: None,
            sub: None,
            source: Source::none(),
            insn_start: 0,
            next_insn: 0,
            seg_of: false,
            rshift: 0,
            shift: 0,
            ip_rel: false,
            jump_target: false,
            section_rel: false,
            no_warn: false,
            sign: false,
            size,
        }
    }

    pub fn from_expr(size: u32, e: Expr) -> Self {
        let mut v = Value::new(size);
        v.abs = Some(e);
        v
    }

    pub fn from_sym(size: u32, sym: SymbolRef) -> Self {
        let mut v = Value::new(size);
        v.rel = Some(sym);
        v
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn set_source(&mut self, source: Source) {
        self.source = source;
    }

    pub fn has_abs(&self) -> bool {
        self.abs.is_some()
    }

    pub fn abs(&self) -> Option<&Expr> {
        self.abs.as_ref()
    }

    pub fn abs_mut(&mut self) -> Option<&mut Expr> {
        self.abs.as_mut()
    }

    pub fn rel(&self) -> Option<SymbolRef> {
        self.rel
    }

    pub fn wrt(&self) -> Option<SymbolRef> {
        self.wrt
    }

    pub fn sub(&self) -> Option<SubPortion> {
        self.sub
    }

    pub fn is_relative(&self) -> bool {
        self.rel.is_some()
    }

    pub fn has_sub_relative(&self) -> bool {
        self.sub.is_some()
    }

    /// The relative portion carries more than a plain symbol reference.
    pub fn is_complex_relative(&self) -> bool {
        self.seg_of || self.rshift > 0 || self.section_rel || self.wrt.is_some()
    }

    pub fn seg_of(&self) -> bool {
        self.seg_of
    }

    pub fn rshift(&self) -> u32 {
        self.rshift
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn set_shift(&mut self, shift: u32) {
        debug_assert!(shift <= SHIFT_MAX);
        self.shift = shift;
    }

    pub fn is_ip_rel(&self) -> bool {
        self.ip_rel
    }

    pub fn set_ip_rel(&mut self) {
        self.ip_rel = true;
    }

    pub fn is_jump_target(&self) -> bool {
        self.jump_target
    }

    pub fn set_jump_target(&mut self) {
        self.jump_target = true;
    }

    pub fn is_section_rel(&self) -> bool {
        self.section_rel
    }

    pub fn set_section_rel(&mut self) {
        self.section_rel = true;
    }

    pub fn is_signed(&self) -> bool {
        self.sign
    }

    pub fn set_signed(&mut self) {
        self.sign = true;
    }

    pub fn is_warn_disabled(&self) -> bool {
        self.no_warn
    }

    pub fn insn_start(&self) -> u32 {
        self.insn_start
    }

    pub fn set_insn_start(&mut self, v: u32) {
        self.insn_start = v;
    }

    pub fn next_insn(&self) -> u32 {
        self.next_insn
    }

    pub fn set_next_insn(&mut self, v: u32) {
        self.next_insn = v;
    }

    pub fn clear(&mut self) {
        *self = Value::new(0);
    }

    /// Drops all relative portions. `next_insn` is kept: relocation
    /// formats still need it after the relative is resolved away.
    pub fn clear_relative(&mut self) {
        self.rel = None;
        self.wrt = None;
        self.sub = None;
        self.seg_of = false;
        self.rshift = 0;
        self.ip_rel = false;
        self.section_rel = false;
    }

    pub fn add_abs(&mut self, delta: &IntNum) {
        let d = Expr::from_int(delta.clone());
        match &mut self.abs {
            Some(abs) => abs.calc(Op::Add, Some(&d), self.source),
            None => self.abs = Some(d),
        }
    }

    pub fn add_abs_expr(&mut self, delta: &Expr) {
        match &mut self.abs {
            Some(abs) => abs.calc(Op::Add, Some(delta), self.source),
            None => self.abs = Some(delta.clone()),
        }
    }

    /// The subtractive portion as a location, resolving a subtractive
    /// label symbol through the table.
    pub fn get_sub_location(&self, table: &SymbolTable) -> Option<Location> {
        match self.sub? {
            SubPortion::Loc(l) => Some(l),
            SubPortion::Sym(s) => table.get(s).get_label(),
        }
    }

    /// State-machine transition from raw parse result to output-ready:
    /// expands EQUs, strips an exact all-ones AND mask, and pulls the
    /// relative portions out of the absolute expression. On violation
    /// reports `err` and returns false.
    pub fn finalize(&mut self, table: &SymbolTable, diags: &mut Diagnostics, err: DiagId) -> bool {
        let mut abs = match self.abs.take() {
            Some(a) => a,
            None => return true,
        };
        if abs.is_empty() {
            return true;
        }

        if !expand_equ(&mut abs, table) {
            diags.report(self.source, DiagId::EquCircularReference);
            return false;
        }
        abs.simplify(diags, false);

        // An AND with the exact (1 << size) - 1 mask is the idiom for
        // requesting truncation without a warning. A mismatched mask is
        // not stripped.
        if abs.is_op(Op::And) {
            let mask = IntNum::new(1).shl(self.size).sub(&IntNum::new(1));
            let root = abs.root_pos().expect("non-empty expression");
            let (children, _) = abs.children_of(root);
            let mut found = false;
            for &c in &children {
                if abs.terms()[c].get_int() == Some(&mask) {
                    abs.terms_mut()[c].clear();
                    abs.terms_mut()[root].add_num_child(-1);
                    found = true;
                }
            }
            if found {
                self.no_warn = true;
                abs.make_ident(diags, None);
                abs.cleanup();
            }
        }

        // Trivial cases.
        if abs.is_intnum() {
            if !abs.get_intnum().expect("intnum").is_zero() {
                self.abs = Some(abs);
            }
            return true;
        }
        if let Some(sym) = abs.get_symbol() {
            self.rel = Some(sym);
            return true;
        }

        let root = match abs.root_pos() {
            Some(r) => r,
            None => return true,
        };
        if !self.finalize_scan(&mut abs, table, true, root) {
            self.abs = Some(abs);
            diags.report(self.source, err);
            return false;
        }

        abs.simplify(diags, false);
        if abs.is_intnum() && abs.get_intnum().expect("intnum").is_zero() {
            return true;
        }
        if !abs.is_empty() {
            self.abs = Some(abs);
        }
        true
    }

    /// Recursive scan pulling relative references out of `e`. Runs
    /// after a simplify, so subtractions are in the canonical
    /// `X + (-1*Y)` form and nothing hides under single-child wrappers.
    fn finalize_scan(
        &mut self,
        e: &mut Expr,
        table: &SymbolTable,
        ssym_ok: bool,
        pos: usize,
    ) -> bool {
        let op = match e.terms()[pos].op() {
            Some(o) => o,
            None => return true,
        };
        match op {
            Op::Add => {
                // A single additive symbol may live anywhere under the
                // ADD; symbol-symbol pairs cancel when identical or in
                // the same section.
                let (children, _) = e.children_of(pos);
                let mut relpos: SmallVec<[usize; 4]> = SmallVec::new();
                let mut subpos: SmallVec<[usize; 4]> = SmallVec::new();
                for &c in &children {
                    match e.terms()[c].kind {
                        TermKind::Sym(_) => relpos.push(c),
                        TermKind::Op(Op::Mul, _) => {
                            if let Some((sym_idx, _)) = e.as_neg1_mul(c, false) {
                                subpos.push(sym_idx);
                            } else if !self.finalize_scan(e, table, ssym_ok, c) {
                                return false;
                            }
                        }
                        TermKind::Op(..) => {
                            if !self.finalize_scan(e, table, ssym_ok, c) {
                                return false;
                            }
                        }
                        _ => {}
                    }
                }

                let mut sub_matched: SmallVec<[bool; 4]> =
                    SmallVec::from_elem(false, subpos.len());
                for &r in &relpos {
                    let rel = e.terms()[r].get_sym().expect("symbol term");
                    let mut matched = false;
                    for (j, &s) in subpos.iter().enumerate() {
                        if sub_matched[j] {
                            continue;
                        }
                        let sub = e.terms()[s].get_sym().expect("symbol term");
                        // The same symbol cancels outright, even
                        // external.
                        if rel == sub {
                            e.terms_mut()[r].zero();
                            e.terms_mut()[s].zero();
                            sub_matched[j] = true;
                            matched = true;
                            break;
                        }
                        // Labels in one section stay in the expression
                        // as a future distance but count as matched.
                        let (Some(rl), Some(sl)) =
                            (table.get(rel).get_label(), table.get(sub).get_label())
                        else {
                            continue;
                        };
                        if rl.sect == sl.sect {
                            sub_matched[j] = true;
                            matched = true;
                            break;
                        }
                    }
                    if matched {
                        continue;
                    }
                    if self.rel.is_some() || !ssym_ok {
                        return false;
                    }
                    self.rel = Some(rel);
                    e.terms_mut()[r].zero();
                }
                for (j, &s) in subpos.iter().enumerate() {
                    if sub_matched[j] {
                        continue;
                    }
                    let sub = e.terms()[s].get_sym().expect("symbol term");
                    if self.sub.is_some() {
                        return false;
                    }
                    self.sub = Some(SubPortion::Sym(sub));
                    e.terms_mut()[s].zero();
                }
                true
            }
            Op::Shr => {
                let (children, _) = e.children_of(pos);
                if children.len() != 2 {
                    return false;
                }
                let (lhs, rhs) = (children[0], children[1]);

                let take_shamt = |e: &Expr, rshift: u32| -> Option<u32> {
                    let v = e.terms()[rhs].get_int()?;
                    if v.is_negative() {
                        return None;
                    }
                    let shamt = v.get_u64()?;
                    if shamt + rshift as u64 > RSHIFT_MAX as u64 {
                        return None;
                    }
                    Some(shamt as u32)
                };

                if let Some(sym) = e.terms()[lhs].get_sym() {
                    if self.rel.is_some() || !ssym_ok {
                        return false;
                    }
                    let Some(shamt) = take_shamt(e, self.rshift) else {
                        return false;
                    };
                    self.rshift += shamt;
                    self.rel = Some(sym);
                    e.terms_mut()[lhs].zero();
                    // The SHR stays in place over the remaining
                    // absolute portion.
                } else if e.terms()[lhs].is_op() {
                    let had_rel = self.rel;
                    if !self.finalize_scan(e, table, ssym_ok, lhs) {
                        return false;
                    }
                    if self.rel != had_rel {
                        // A relative was consumed under the shift; the
                        // shift must fold into rshift.
                        let Some(shamt) = take_shamt(e, self.rshift) else {
                            return false;
                        };
                        self.rshift += shamt;
                    }
                }
                true
            }
            Op::Seg => {
                let (children, _) = e.children_of(pos);
                if children.len() != 1 {
                    return false;
                }
                let c = children[0];
                let Some(sym) = e.terms()[c].get_sym() else {
                    return false;
                };
                if self.seg_of {
                    return false;
                }
                self.seg_of = true;
                if self.rel.is_some() || !ssym_ok {
                    return false;
                }
                self.rel = Some(sym);
                e.terms_mut()[c].clear();
                e.terms_mut()[pos].zero();
                true
            }
            Op::Wrt => {
                let (children, _) = e.children_of(pos);
                if children.len() != 2 {
                    return false;
                }
                let (lhs, rhs) = (children[0], children[1]);
                match e.terms()[rhs].kind {
                    TermKind::Sym(s) => {
                        if self.wrt.is_some() {
                            return false;
                        }
                        self.wrt = Some(s);
                        e.terms_mut()[rhs].zero();
                        e.terms_mut()[pos].set_op(Op::Add);
                    }
                    // WRT to a register stays for the architecture.
                    TermKind::Reg(_) => {}
                    _ => return false,
                }
                if let Some(s) = e.terms()[lhs].get_sym() {
                    if self.rel.is_some() || !ssym_ok {
                        return false;
                    }
                    self.rel = Some(s);
                    e.terms_mut()[lhs].zero();
                } else if e.terms()[lhs].is_op() {
                    if !self.finalize_scan(e, table, ssym_ok, lhs) {
                        return false;
                    }
                }
                true
            }
            _ => {
                // No symbol is legal anywhere below any other operator.
                let (children, _) = e.children_of(pos);
                for &c in &children {
                    if matches!(e.terms()[c].kind, TermKind::Sym(_)) {
                        return false;
                    }
                    if e.terms()[c].is_op() && !self.finalize_scan(e, table, false, c) {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Makes the value PC-relative by subtracting the output location.
    /// A same-section additive relative folds into the absolute
    /// portion; otherwise the location becomes the subtractive portion.
    /// Fails if a subtractive portion already exists.
    pub fn sub_relative(
        &mut self,
        abs_sym: SymbolRef,
        table: &SymbolTable,
        sub: Location,
    ) -> bool {
        match self.rel {
            None => {
                self.rel = Some(abs_sym);
                if self.sub.is_some() {
                    return false;
                }
                self.sub = Some(SubPortion::Loc(sub));
            }
            Some(rel) => {
                let same_section = self.wrt.is_none()
                    && !self.seg_of
                    && self.rshift == 0
                    && !self.section_rel
                    && table
                        .get(rel)
                        .get_label()
                        .is_some_and(|l| l.sect == sub.sect);
                if same_section {
                    let mut e = Expr::from_sym(rel);
                    e.calc(Op::Sub, Some(&Expr::from_loc(sub)), self.source);
                    self.add_abs_expr(&e);
                    self.rel = None;
                } else {
                    if self.sub.is_some() {
                        return false;
                    }
                    self.sub = Some(SubPortion::Loc(sub));
                }
            }
        }
        true
    }

    /// When the subtractive portion lies in `loc`'s section, returns
    /// `loc - sub`: the caller emits a PC-relative relocation against
    /// the additive portion and adds this to the written literal.
    pub fn calc_pcrel_sub(
        &self,
        table: &SymbolTable,
        loc: Location,
        dist: &dyn Fn(Location, Location) -> Option<IntNum>,
    ) -> Option<IntNum> {
        let sub_loc = self.get_sub_location(table)?;
        if sub_loc.sect != loc.sect {
            return None;
        }
        dist(sub_loc, loc)
    }

    /// The value as a constant integer, when it has no relative
    /// portions and the absolute portion fully evaluates.
    pub fn get_intnum(
        &self,
        diags: &mut Diagnostics,
        resolve_loc: Option<&dyn Fn(Location) -> Option<IntNum>>,
        resolve_sym: Option<&dyn Fn(SymbolRef) -> Option<IntNum>>,
    ) -> Option<IntNum> {
        if self.rel.is_some() || self.sub.is_some() || self.wrt.is_some() {
            return None;
        }
        match &self.abs {
            None => Some(IntNum::zero()),
            Some(a) => {
                if let Some(v) = a.get_intnum() {
                    return Some(v.clone());
                }
                if a.is_float() {
                    return None;
                }
                evaluate(a, &[], resolve_loc, resolve_sym, diags)
                    .and_then(|t| t.get_int().cloned())
            }
        }
    }

    /// Transfers size/shift/sign settings onto a numeric output.
    pub fn configure_output(&self, num_out: &mut NumericOutput) {
        num_out.set_size(self.size);
        num_out.set_shift(self.shift);
        num_out.set_rshift(self.rshift);
        num_out.set_sign(self.sign);
        num_out.set_source(self.source);
        if self.no_warn {
            num_out.disable_warnings();
        } else {
            num_out.enable_warnings();
        }
    }

    /// Writes the value if it is fully constant, returning true. When a
    /// relative portion remains, evaluates the residual absolute part
    /// into `outval` and returns false; the caller combines it with a
    /// relocation. Float residuals mixed with a relative are errors
    /// (reported, zero bytes written, true returned).
    pub fn output_basic(
        &self,
        num_out: &mut NumericOutput,
        outval: &mut IntNum,
        diags: &mut Diagnostics,
        resolve_loc: Option<&dyn Fn(Location) -> Option<IntNum>>,
        resolve_sym: Option<&dyn Fn(SymbolRef) -> Option<IntNum>>,
    ) -> bool {
        let rel = self.rel.is_some() || self.sub.is_some() || self.wrt.is_some();

        let abs = match &self.abs {
            None => {
                if !rel {
                    num_out.output_integer(&IntNum::zero());
                    return true;
                }
                *outval = IntNum::zero();
                return false;
            }
            Some(a) => a,
        };

        if let Some(v) = abs.get_intnum() {
            if !rel {
                num_out.output_integer(v);
                return true;
            }
            *outval = v.clone();
            return false;
        }
        if let Some(f) = abs.get_float() {
            if rel {
                diags.report(self.source, DiagId::RelocContainsFloat);
                return true;
            }
            num_out.output_float(f);
            return true;
        }

        let term = match evaluate(abs, &[], resolve_loc, resolve_sym, diags) {
            Some(t) => t,
            None => {
                if abs.contains(TermTypes::FLOAT) {
                    diags.report(self.source, DiagId::RelocContainsFloat);
                } else {
                    diags.report(self.source, DiagId::RelocTooComplex);
                }
                return true;
            }
        };

        if let Some(f) = term.get_float() {
            if rel {
                diags.report(self.source, DiagId::RelocContainsFloat);
            }
            num_out.output_float(f);
            return true;
        }
        let v = term.get_int().expect("evaluation is int or float");
        if !rel {
            num_out.output_integer(v);
            true
        } else {
            *outval = v.clone();
            false
        }
    }
}
