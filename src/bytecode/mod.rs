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

pub mod output;

use std::fs;
use std::path::PathBuf;

use crate::bytes::{Bytes, size_leb128};
use crate::errors::{DiagId, Diagnostics, Source};
use crate::expr::Expr;
use crate::intnum::IntNum;
use crate::location::{Location, subst_dist};
use crate::symbol::{SymbolRef, SymbolTable};
use crate::value::Value;

/// Span ids: 0 is reserved for repeat multipliers, 1 for offset
/// setters; architecture encodings use 2 and up.
pub const SPAN_MULTIPLE: i32 = 0;
pub const SPAN_OFFSET_SETTER: i32 = 1;
pub const SPAN_LEB128: i32 = 2;

// The add_span callback registers a length dependency:
// (span_id, value, neg_threshold, pos_threshold).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    None,
    /// Reserves space without contents.
    Reserve,
    /// Deterministically sets the following offset (align/org).
    Offset,
}

/// A deferred patch into the fixed portion of a bytecode.
#[derive(Debug, Clone)]
pub struct Fixup {
    pub off: u32,
    pub value: Value,
}

/// Architecture-supplied bytecode contents: instruction encodings whose
/// length depends on span values (short vs. near jumps and the like).
pub trait SpanDependent: std::fmt::Debug {
    /// Finalizes owned values. `sect`/`bc_idx` locate the containing
    /// bytecode for IP-relative subtraction.
    fn finalize(
        &mut self,
        _sect: usize,
        _bc_idx: usize,
        _abs_sym: SymbolRef,
        _table: &SymbolTable,
        _diags: &mut Diagnostics,
    ) -> bool {
        true
    }

    /// Minimum tail length; registers spans for any length dependency.
    fn calc_len(
        &mut self,
        table: &SymbolTable,
        add_span: &mut dyn FnMut(i32, &Value, i64, i64),
        diags: &mut Diagnostics,
    ) -> Result<u64, ()>;

    /// Grows to accommodate `new_val`; returns the new tail length and
    /// whether the bytecode still depends on the span (with updated
    /// thresholds written through).
    #[allow(clippy::too_many_arguments)]
    fn expand(
        &mut self,
        span_id: i32,
        old_val: i64,
        new_val: i64,
        neg_thres: &mut i64,
        pos_thres: &mut i64,
        diags: &mut Diagnostics,
    ) -> Result<(u64, bool), ()>;

    /// Final bytes for the tail.
    fn output(&self, buf: &mut Bytes, env: &mut output::OutputEnv) -> bool;
}

#[derive(Debug)]
pub enum BytecodeKind {
    Empty,
    /// N zero bytes without stored contents.
    Gap { size: u64 },
    /// Pad to a power-of-two boundary.
    Align {
        boundary: u64,
        maxskip: Option<u64>,
        fill: Option<Vec<u8>>,
    },
    /// Advance to an absolute offset.
    Org { target: u64, fill: u8 },
    /// Variable-length integer whose length may depend on a span.
    Leb128 { value: Value, sign: bool },
    /// External file contents.
    Incbin {
        path: PathBuf,
        start: Option<Value>,
        maxlen: Option<Value>,
        start_off: u64,
        len: u64,
    },
    /// Repeat of an inner bytecode, count possibly span-dependent.
    Multiple {
        count: Expr,
        count_val: u64,
        inner: Box<Bytecode>,
    },
    /// Architecture instruction encoding.
    Custom(Box<dyn SpanDependent>),
}

/// One node in a section's sequence: fixed bytes with fixups, followed
/// by a variable-length tail defined by the kind.
#[derive(Debug)]
pub struct Bytecode {
    kind: BytecodeKind,
    fixed: Bytes,
    fixups: Vec<Fixup>,
    /// Tail length, maintained by calc_len/expand.
    len: u64,
    index: usize,
    offset: u64,
    source: Source,
}

impl Bytecode {
    pub fn new(kind: BytecodeKind, source: Source) -> Self {
        Bytecode {
            kind,
            fixed: Bytes::new(),
            fixups: Vec::new(),
            len: 0,
            index: usize::MAX,
            offset: 0,
            source,
        }
    }

    pub fn empty(source: Source) -> Self {
        Bytecode::new(BytecodeKind::Empty, source)
    }

    pub fn gap(size: u64, source: Source) -> Self {
        Bytecode::new(BytecodeKind::Gap { size }, source)
    }

    pub fn align(boundary: u64, maxskip: Option<u64>, fill: Option<Vec<u8>>, source: Source) -> Self {
        debug_assert!(boundary.is_power_of_two());
        Bytecode::new(
            BytecodeKind::Align {
                boundary,
                maxskip,
                fill,
            },
            source,
        )
    }

    pub fn org(target: u64, fill: u8, source: Source) -> Self {
        Bytecode::new(BytecodeKind::Org { target, fill }, source)
    }

    pub fn leb128(value: Value, sign: bool, source: Source) -> Self {
        Bytecode::new(BytecodeKind::Leb128 { value, sign }, source)
    }

    pub fn incbin(
        path: PathBuf,
        start: Option<Value>,
        maxlen: Option<Value>,
        source: Source,
    ) -> Self {
        Bytecode::new(
            BytecodeKind::Incbin {
                path,
                start,
                maxlen,
                start_off: 0,
                len: 0,
            },
            source,
        )
    }

    pub fn multiple(count: Expr, inner: Bytecode, source: Source) -> Self {
        Bytecode::new(
            BytecodeKind::Multiple {
                count,
                count_val: 0,
                inner: Box::new(inner),
            },
            source,
        )
    }

    pub fn custom(contents: Box<dyn SpanDependent>, source: Source) -> Self {
        Bytecode::new(BytecodeKind::Custom(contents), source)
    }

    pub fn kind(&self) -> &BytecodeKind {
        &self.kind
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn has_contents(&self) -> bool {
        !matches!(self.kind, BytecodeKind::Empty) || !self.fixed.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn fixed_len(&self) -> u64 {
        self.fixed.len() as u64
    }

    pub fn tail_len(&self) -> u64 {
        self.len
    }

    pub fn total_len(&self) -> u64 {
        self.fixed_len() + self.len
    }

    pub fn next_offset(&self) -> u64 {
        self.offset + self.total_len()
    }

    pub fn fixed(&self) -> &Bytes {
        &self.fixed
    }

    pub fn fixed_mut(&mut self) -> &mut Bytes {
        &mut self.fixed
    }

    pub fn fixups(&self) -> &[Fixup] {
        &self.fixups
    }

    pub fn special(&self) -> Special {
        match self.kind {
            BytecodeKind::Align { .. } | BytecodeKind::Org { .. } => Special::Offset,
            BytecodeKind::Gap { .. } => Special::Reserve,
            _ => Special::None,
        }
    }

    /// Appends raw bytes to the fixed portion.
    pub fn append_fixed_bytes(&mut self, data: &[u8]) {
        self.fixed.extend_from_slice(data);
    }

    /// Appends a sized value as a fixup over zero-filled fixed bytes.
    pub fn append_fixed(&mut self, value: Value) -> &mut Value {
        let off = self.fixed.len() as u32;
        let nbytes = ((value.size() + 7) / 8) as usize;
        self.fixed.write_zeros(nbytes);
        self.fixups.push(Fixup { off, value });
        &mut self.fixups.last_mut().expect("just pushed").value
    }

    /// Extends a gap bytecode. Caller checks the kind.
    pub(crate) fn extend_gap(&mut self, size: u64) {
        match &mut self.kind {
            BytecodeKind::Gap { size: s } => *s += size,
            _ => unreachable!("extend_gap on non-gap bytecode"),
        }
    }

    /// Finalizes all owned values after parsing: fixups first (IP
    /// relative fixups subtract their own location), then the
    /// kind-specific contents.
    pub fn finalize(
        &mut self,
        sect: usize,
        bc_idx: usize,
        abs_sym: SymbolRef,
        table: &SymbolTable,
        diags: &mut Diagnostics,
    ) -> bool {
        for fixup in &mut self.fixups {
            let err = if fixup.value.is_jump_target() {
                DiagId::TooComplexJump
            } else {
                DiagId::TooComplexExpression
            };
            if !fixup.value.finalize(table, diags, err) {
                return false;
            }
            if fixup.value.is_jump_target() && fixup.value.is_complex_relative() {
                diags.report(fixup.value.source(), DiagId::InvalidJumpTarget);
                return false;
            }
            if fixup.value.is_ip_rel() {
                let sub_loc = Location {
                    sect,
                    bc: bc_idx,
                    off: fixup.off as u64,
                };
                if !fixup.value.sub_relative(abs_sym, table, sub_loc) {
                    diags.report(fixup.value.source(), DiagId::TooComplexExpression);
                }
            }
        }

        match &mut self.kind {
            BytecodeKind::Leb128 { value, .. } => {
                if !value.finalize(table, diags, DiagId::TooComplexExpression) {
                    return false;
                }
            }
            BytecodeKind::Incbin {
                path,
                start,
                maxlen,
                start_off,
                len,
            } => {
                let start_v = match start {
                    Some(v) => match resolve_const(v, table, diags) {
                        Some(x) => x,
                        None => {
                            diags.report(self.source, DiagId::TooComplexExpression);
                            return false;
                        }
                    },
                    None => 0,
                };
                let maxlen_v = match maxlen {
                    Some(v) => match resolve_const(v, table, diags) {
                        Some(x) => Some(x),
                        None => {
                            diags.report(self.source, DiagId::TooComplexExpression);
                            return false;
                        }
                    },
                    None => None,
                };
                match fs::metadata(path.as_path()) {
                    Ok(meta) => {
                        let fsize = meta.len();
                        let avail = fsize.saturating_sub(start_v);
                        *start_off = start_v;
                        *len = maxlen_v.map_or(avail, |m| m.min(avail));
                    }
                    Err(_) => {
                        // Unreadable file degrades to a zero-length gap.
                        diags.report(
                            self.source,
                            DiagId::FileRead(path.display().to_string()),
                        );
                        *start_off = 0;
                        *len = 0;
                    }
                }
            }
            BytecodeKind::Multiple { count, inner, .. } => {
                if !crate::symbol::expand_equ(count, table) {
                    diags.report(self.source, DiagId::EquCircularReference);
                    return false;
                }
                count.simplify(diags, true);
                if !inner.finalize(sect, bc_idx, abs_sym, table, diags) {
                    return false;
                }
            }
            BytecodeKind::Custom(contents) => {
                if !contents.finalize(sect, bc_idx, abs_sym, table, diags) {
                    return false;
                }
            }
            _ => {}
        }
        true
    }

    /// Computes the minimum tail length, registering spans for any
    /// length dependency. The caller has already stored this bytecode's
    /// tentative offset.
    pub fn calc_len(
        &mut self,
        table: &SymbolTable,
        add_span: &mut dyn FnMut(i32, &Value, i64, i64),
        diags: &mut Diagnostics,
    ) -> bool {
        let offset = self.offset;
        let fixed_len = self.fixed.len() as u64;
        self.len = match &mut self.kind {
            BytecodeKind::Empty => 0,
            BytecodeKind::Gap { size } => *size,
            BytecodeKind::Align {
                boundary, maxskip, ..
            } => align_pad(offset + fixed_len, *boundary, *maxskip),
            BytecodeKind::Org { target, .. } => {
                let cur = offset + fixed_len;
                target.saturating_sub(cur)
            }
            BytecodeKind::Leb128 { value, sign } => {
                if value.is_relative() || value.has_sub_relative() || value.wrt().is_some() {
                    diags.report(self.source, DiagId::TooComplexExpression);
                    return false;
                }
                let (approx, constant) = approx_value(value, table, diags);
                let n = size_leb128(&approx, *sign) as u64;
                if !constant {
                    let (neg, pos) = leb128_thresholds(n, *sign);
                    add_span(SPAN_LEB128, value, neg, pos);
                }
                n
            }
            BytecodeKind::Incbin { len, .. } => *len,
            BytecodeKind::Multiple {
                count,
                count_val,
                inner,
            } => {
                if !inner.calc_len(table, add_span, diags) {
                    return false;
                }
                let mut approx = count.clone();
                let mut nsubst = 0;
                subst_dist(&mut approx, table, diags, &mut |_, _, _| {
                    nsubst += 1;
                });
                if nsubst > 0 || !approx.is_intnum() {
                    // Span-dependent multiplier: assumed zero until the
                    // optimizer evaluates it.
                    let dep = Value::from_expr(64, count.clone());
                    add_span(SPAN_MULTIPLE, &dep, 0, 0);
                    *count_val = 0;
                    0
                } else {
                    let n = approx
                        .get_intnum()
                        .and_then(|v| v.get_u64())
                        .unwrap_or(0);
                    *count_val = n;
                    n * inner.total_len()
                }
            }
            BytecodeKind::Custom(contents) => {
                match contents.calc_len(table, add_span, diags) {
                    Ok(n) => n,
                    Err(()) => return false,
                }
            }
        };
        true
    }

    /// Grows the tail for a span's new value. Returns whether the
    /// bytecode still depends on the span, with thresholds updated.
    pub fn expand(
        &mut self,
        span_id: i32,
        old_val: i64,
        new_val: i64,
        neg_thres: &mut i64,
        pos_thres: &mut i64,
        diags: &mut Diagnostics,
    ) -> Result<bool, ()> {
        match &mut self.kind {
            BytecodeKind::Align {
                boundary, maxskip, ..
            } => {
                debug_assert_eq!(span_id, SPAN_OFFSET_SETTER);
                let cur = new_val.max(0) as u64;
                self.len = align_pad(cur, *boundary, *maxskip);
                *neg_thres = 0;
                *pos_thres = (cur + self.len) as i64;
                Ok(true)
            }
            BytecodeKind::Org { target, .. } => {
                debug_assert_eq!(span_id, SPAN_OFFSET_SETTER);
                let cur = new_val.max(0) as u64;
                if cur > *target {
                    diags.report(self.source, DiagId::OrgBackwards);
                    return Err(());
                }
                self.len = *target - cur;
                *neg_thres = 0;
                *pos_thres = *target as i64;
                Ok(true)
            }
            BytecodeKind::Leb128 { sign, .. } => {
                debug_assert_eq!(span_id, SPAN_LEB128);
                let n = size_leb128(&IntNum::new(new_val), *sign) as u64;
                // Lengths only grow during span resolution.
                self.len = self.len.max(n);
                let (neg, pos) = leb128_thresholds(self.len, *sign);
                *neg_thres = neg;
                *pos_thres = pos;
                Ok(true)
            }
            BytecodeKind::Multiple {
                count_val, inner, ..
            } => {
                if span_id == SPAN_MULTIPLE {
                    let n = new_val.max(0) as u64;
                    // The multiplier absorbs shrinks too; the resulting
                    // offsets never move backwards because the total
                    // only replaces a smaller estimate.
                    *count_val = (*count_val).max(n);
                    self.len = *count_val * inner.total_len();
                    Ok(true)
                } else {
                    let mut nt = *neg_thres;
                    let mut pt = *pos_thres;
                    let keep =
                        inner.expand(span_id, old_val, new_val, &mut nt, &mut pt, diags)?;
                    *neg_thres = nt;
                    *pos_thres = pt;
                    self.len = *count_val * inner.total_len();
                    Ok(keep)
                }
            }
            BytecodeKind::Custom(contents) => {
                let (n, keep) =
                    contents.expand(span_id, old_val, new_val, neg_thres, pos_thres, diags)?;
                self.len = n;
                Ok(keep)
            }
            _ => {
                debug_assert!(false, "bytecode has no dependent spans");
                Ok(false)
            }
        }
    }

    /// Assigns this bytecode's offset; offset setters recompute their
    /// padding first. Returns the offset following this bytecode.
    pub fn update_offset(&mut self, offset: u64, diags: &mut Diagnostics) -> u64 {
        if self.special() == Special::Offset {
            let mut neg = 0i64;
            let mut pos = self.next_offset() as i64;
            let _ = self.expand(
                SPAN_OFFSET_SETTER,
                0,
                (offset + self.fixed_len()) as i64,
                &mut neg,
                &mut pos,
                diags,
            );
        }
        self.offset = offset;
        self.next_offset()
    }
}

/// Finalizes an owned sizing value and evaluates it to a constant.
fn resolve_const(v: &mut Value, table: &SymbolTable, diags: &mut Diagnostics) -> Option<u64> {
    if !v.finalize(table, diags, DiagId::TooComplexExpression) {
        return None;
    }
    v.get_intnum(diags, None, None).and_then(|n| n.get_u64())
}

/// Padding needed to align `pos` to `boundary`; exceeding `maxskip`
/// collapses to no padding.
fn align_pad(pos: u64, boundary: u64, maxskip: Option<u64>) -> u64 {
    let pad = boundary.wrapping_sub(pos) & (boundary - 1);
    match maxskip {
        Some(max) if pad > max => 0,
        _ => pad,
    }
}

/// Evaluates a value's absolute portion with unresolved distances
/// approximated as zero. Returns the approximation and whether the
/// value was already fully constant.
fn approx_value(value: &Value, table: &SymbolTable, diags: &mut Diagnostics) -> (IntNum, bool) {
    if let Some(v) = value.get_intnum(diags, None, None) {
        return (v, true);
    }
    let Some(abs) = value.abs() else {
        return (IntNum::zero(), true);
    };
    let mut approx = abs.clone();
    let mut nsubst = 0u32;
    subst_dist(&mut approx, table, diags, &mut |_, _, _| {
        nsubst += 1;
    });
    let zeros: Vec<crate::expr::ExprTerm> = (0..nsubst)
        .map(|_| {
            crate::expr::ExprTerm::new(
                crate::expr::TermKind::Int(IntNum::zero()),
                Source::none(),
            )
        })
        .collect();
    approx.substitute(&zeros);
    let v = crate::expr::eval::evaluate(&approx, &[], None, None, diags)
        .and_then(|t| t.get_int().cloned())
        .unwrap_or_else(IntNum::zero);
    (v, false)
}

/// Signed value window that keeps a LEB128 encoding within `n` bytes.
fn leb128_thresholds(n: u64, sign: bool) -> (i64, i64) {
    let bits = (7 * n).min(62) as u32;
    if sign {
        let half = 1i64 << (bits - 1);
        (-half, half - 1)
    } else {
        (0, (1i64 << bits) - 1)
    }
}
