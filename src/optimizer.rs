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

//! Robertson-style span resolution.
//!
//! Bytecodes start at their minimum lengths; spans record how a
//! bytecode's length depends on a signed value (usually a distance
//! between two locations). When a value leaves its thresholds the
//! bytecode expands, length changes propagate through an interval tree
//! to every span crossing the expanded bytecode, and align/org offset
//! setters absorb or forward the movement. Lengths only grow, so the
//! fixed point terminates.

use std::collections::{HashSet, VecDeque};

use log::debug;

use crate::bytecode::SPAN_OFFSET_SETTER;
use crate::errors::{DiagId, Diagnostics, Source};
use crate::expr::eval::evaluate;
use crate::expr::{ExprTerm, TermKind};
use crate::interval_tree::IntervalTree;
use crate::intnum::IntNum;
use crate::location::{Location, subst_dist};
use crate::section::Section;
use crate::symbol::SymbolTable;
use crate::value::Value;

/// Sentinel for "cannot evaluate, force the longest form".
const TOO_COMPLEX: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanState {
    Inactive,
    Active,
    OnQueue,
    /// Fully expanded and removed from consideration.
    Dead,
}

/// One symbol-symbol distance inside a span's dependent value.
#[derive(Debug)]
struct SpanTerm {
    loc: Location,
    loc2: Location,
    cur_val: i64,
    new_val: i64,
}

#[derive(Debug)]
struct Span {
    bc: usize,
    id: i32,
    /// Owning copy of the dependent value; distances replaced by Subst
    /// placeholders.
    depval: Value,
    terms: Vec<SpanTerm>,
    /// Scratch substitution values, index-aligned with `terms`.
    expr_terms: Vec<ExprTerm>,
    cur_val: i64,
    new_val: i64,
    neg_thres: i64,
    pos_thres: i64,
    state: SpanState,
    /// Spans that led to this one; cycle detection for multiplier
    /// spans.
    backtrace: HashSet<usize>,
    /// Index of the first offset setter following this span's bytecode.
    os_index: usize,
}

impl Span {
    /// Re-evaluates the dependent value from current term distances.
    /// True if the span now calls for expansion.
    fn recalc(&mut self, diags: &mut Diagnostics) -> bool {
        self.new_val = if self.depval.is_relative() {
            TOO_COMPLEX
        } else if let Some(abs) = self.depval.abs() {
            for (i, t) in self.terms.iter().enumerate() {
                self.expr_terms[i] =
                    ExprTerm::new(TermKind::Int(IntNum::new(t.new_val)), Source::none());
            }
            match evaluate(abs, &self.expr_terms, None, None, diags) {
                Some(t) => match t.get_int() {
                    Some(v) => v.as_i64_saturating(),
                    None => TOO_COMPLEX,
                },
                None => TOO_COMPLEX,
            }
        } else {
            0
        };

        if self.new_val == TOO_COMPLEX {
            self.state = SpanState::Inactive;
        }

        // Multiplier spans update on any change at all.
        if self.id <= 0 {
            return self.new_val != self.cur_val;
        }
        self.new_val < self.neg_thres || self.new_val > self.pos_thres
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct OffsetSetter {
    bc: Option<usize>,
    cur_val: u64,
    new_val: u64,
    thres: u64,
}

#[derive(Default)]
struct Optimizer {
    spans: Vec<Span>,
    qa: VecDeque<usize>,
    qb: VecDeque<usize>,
    itree: IntervalTree<(usize, usize)>,
    offset_setters: Vec<OffsetSetter>,
}

/// Resolves all span-dependent lengths in a section and assigns final
/// bytecode offsets. Stops early (best effort) once an error has been
/// reported.
pub fn optimize_section(sect: &mut Section, table: &SymbolTable, diags: &mut Diagnostics) {
    let mut opt = Optimizer::default();
    // Placeholder setter that spans point at until a real one appears.
    opt.offset_setters.push(OffsetSetter::default());

    // Step 1a: number bytecodes, assign minimum-length offsets,
    // collect spans and offset setters.
    let mut offset = 0;
    for i in 0..sect.bcs().len() {
        let os_index = opt.offset_setters.len() - 1;
        let spans = &mut opt.spans;
        let bc = &mut sect.bcs_mut()[i];
        bc.set_index(i);
        bc.set_offset(offset);
        let ok = bc.calc_len(
            table,
            &mut |id, value, neg, pos| {
                spans.push(Span {
                    bc: i,
                    id,
                    depval: value.clone(),
                    terms: Vec::new(),
                    expr_terms: Vec::new(),
                    cur_val: 0,
                    new_val: 0,
                    neg_thres: neg,
                    pos_thres: pos,
                    state: SpanState::Active,
                    backtrace: HashSet::new(),
                    os_index,
                });
            },
            diags,
        );
        if ok {
            if bc.special() == crate::bytecode::Special::Offset {
                let next = bc.next_offset();
                let os = opt
                    .offset_setters
                    .last_mut()
                    .expect("placeholder setter present");
                os.bc = Some(i);
                os.thres = next;
                opt.offset_setters.push(OffsetSetter::default());
            }
            offset = sect.bcs()[i].next_offset();
        }
    }
    if diags.has_error_occurred() {
        return;
    }

    opt.step_1b(sect, table, diags);
    if diags.has_error_occurred() {
        return;
    }

    // Step 1c.
    sect.update_offsets(diags);
    if diags.has_error_occurred() {
        return;
    }

    if opt.step_1d(sect, diags) {
        return;
    }

    opt.step_1e(sect, diags);
    if diags.has_error_occurred() {
        return;
    }

    opt.step_2(sect, diags);
    if diags.has_error_occurred() {
        return;
    }

    // Step 3.
    sect.update_offsets(diags);
}

impl Optimizer {
    /// Step 1b: split spans into terms, run the first expansion pass on
    /// spans already out of range at minimum lengths.
    fn step_1b(&mut self, sect: &mut Section, table: &SymbolTable, diags: &mut Diagnostics) {
        for si in 0..self.spans.len() {
            if !self.create_terms(si, sect, table, diags) {
                continue;
            }
            let span = &mut self.spans[si];
            if span.recalc(diags) {
                let mut neg = span.neg_thres;
                let mut pos = span.pos_thres;
                let still = match sect.bcs_mut()[span.bc].expand(
                    span.id,
                    span.cur_val,
                    span.new_val,
                    &mut neg,
                    &mut pos,
                    diags,
                ) {
                    Ok(still) => still,
                    Err(()) => continue,
                };
                span.neg_thres = neg;
                span.pos_thres = pos;
                if still {
                    if span.state == SpanState::Inactive {
                        diags.report(
                            sect.bc(span.bc).source(),
                            DiagId::OptimizerSecondaryExpansion,
                        );
                    }
                } else {
                    span.state = SpanState::Dead;
                    continue;
                }
            }
            let span = &mut self.spans[si];
            debug!(
                "span {{{},{}}} curval {} -> {}",
                span.bc, span.id, span.cur_val, span.new_val
            );
            span.cur_val = span.new_val;
        }
    }

    /// Splits the dependent value's distances into span terms and
    /// checks multiplier spans for self-crossing.
    fn create_terms(
        &mut self,
        si: usize,
        sect: &Section,
        table: &SymbolTable,
        diags: &mut Diagnostics,
    ) -> bool {
        let span = &mut self.spans[si];
        let Some(abs) = span.depval.abs_mut() else {
            return true;
        };
        let mut terms: Vec<SpanTerm> = Vec::new();
        subst_dist(abs, table, diags, &mut |_subst, loc, loc2| {
            terms.push(SpanTerm {
                loc,
                loc2,
                cur_val: 0,
                new_val: 0,
            });
        });
        for t in &mut terms {
            let d = sect
                .calc_dist(t.loc, t.loc2)
                .expect("span term distance within section");
            t.new_val = d.as_i64_saturating();
        }
        span.expr_terms = terms
            .iter()
            .map(|_| ExprTerm::new(TermKind::Int(IntNum::zero()), Source::none()))
            .collect();

        // A multiplier that depends on a distance crossing its own
        // bytecode can never settle.
        let mut cycle = false;
        if span.id <= 0 {
            for t in &terms {
                let lo = t.loc.bc.min(t.loc2.bc);
                let hi = t.loc.bc.max(t.loc2.bc);
                if hi > lo && span.bc >= lo && span.bc <= hi - 1 {
                    cycle = true;
                    break;
                }
            }
        }
        span.terms = terms;
        if cycle {
            diags.report(
                sect.bc(span.bc).source(),
                DiagId::OptimizerCircularReference,
            );
            return false;
        }
        true
    }

    /// Step 1d: refresh all span terms from the updated offsets; queue
    /// anything out of threshold. True when nothing queued (done).
    fn step_1d(&mut self, sect: &Section, diags: &mut Diagnostics) -> bool {
        for si in 0..self.spans.len() {
            let span = &mut self.spans[si];
            if span.state == SpanState::Dead {
                continue;
            }
            for t in &mut span.terms {
                let d = sect
                    .calc_dist(t.loc, t.loc2)
                    .expect("span term distance within section");
                t.cur_val = t.new_val;
                t.new_val = d.as_i64_saturating();
            }
            if span.recalc(diags) {
                debug!("span {{{},{}}} on initial queue", span.bc, span.id);
                self.qb.push_back(si);
                span.state = SpanState::OnQueue;
            }
        }
        self.qa.is_empty() && self.qb.is_empty()
    }

    /// Step 1e: prime offset setters, build the interval tree, look for
    /// multiplier cycles.
    fn step_1e(&mut self, sect: &Section, diags: &mut Diagnostics) {
        for os in &mut self.offset_setters {
            let Some(bci) = os.bc else { continue };
            let bc = sect.bc(bci);
            os.thres = bc.next_offset();
            os.new_val = bc.offset() + bc.fixed_len();
            os.cur_val = os.new_val;
        }

        for (si, span) in self.spans.iter().enumerate() {
            if span.state == SpanState::Dead {
                continue;
            }
            for (ti, term) in span.terms.iter().enumerate() {
                let lo = term.loc.bc.min(term.loc2.bc);
                let hi = term.loc.bc.max(term.loc2.bc);
                if lo == hi {
                    // Same bytecode; the distance never changes.
                    continue;
                }
                self.itree.insert(lo as i64, hi as i64 - 1, (si, ti));
            }
        }

        // Multiplier cycle check via transitive backtraces.
        for si in 0..self.spans.len() {
            if self.spans[si].id > 0 || self.spans[si].state == SpanState::Dead {
                continue;
            }
            let bci = self.spans[si].bc as i64;
            let mut hits: Vec<(usize, usize)> = Vec::new();
            self.itree.enumerate(bci, bci, &mut |&d| hits.push(d));
            for (dsi, _) in hits {
                if self.spans[dsi].id > 0 {
                    continue;
                }
                if self.spans[si].backtrace.contains(&dsi) {
                    diags.report(
                        sect.bc(self.spans[si].bc).source(),
                        DiagId::OptimizerCircularReference,
                    );
                    continue;
                }
                let mut bt = self.spans[si].backtrace.clone();
                bt.insert(si);
                self.spans[dsi].backtrace.extend(bt);
            }
        }
    }

    /// Step 2: the fixed-point loop. Multiplier spans (QA) drain before
    /// ordinary spans (QB) so repeats absorb growth first.
    fn step_2(&mut self, sect: &mut Section, diags: &mut Diagnostics) {
        let Optimizer {
            spans,
            qa,
            qb,
            itree,
            offset_setters,
        } = self;

        loop {
            let si = match qa.pop_front().or_else(|| qb.pop_front()) {
                Some(si) => si,
                None => break,
            };
            {
                let span = &mut spans[si];
                if span.state == SpanState::Inactive || span.state == SpanState::Dead {
                    continue;
                }
                span.state = SpanState::Active;

                // An intervening shrink may have pulled the span back
                // inside its thresholds.
                if !span.recalc(diags) {
                    continue;
                }
            }

            let bc_idx = spans[si].bc;
            let orig_len = sect.bc(bc_idx).total_len();
            {
                let span = &mut spans[si];
                let mut neg = span.neg_thres;
                let mut pos = span.pos_thres;
                let still = match sect.bcs_mut()[bc_idx].expand(
                    span.id,
                    span.cur_val,
                    span.new_val,
                    &mut neg,
                    &mut pos,
                    diags,
                ) {
                    Ok(still) => still,
                    Err(()) => continue,
                };
                span.neg_thres = neg;
                span.pos_thres = pos;
                if still {
                    for t in &mut span.terms {
                        t.cur_val = t.new_val;
                    }
                    span.cur_val = span.new_val;
                } else {
                    span.state = SpanState::Inactive;
                }
            }

            let len_diff = sect.bc(bc_idx).total_len() as i64 - orig_len as i64;
            if len_diff == 0 {
                continue;
            }
            debug!("bytecode {} expanded by {}", bc_idx, len_diff);

            expand_terms(itree, spans, qa, qb, bc_idx, len_diff, diags);

            // Walk the offset setters after this bytecode while the
            // following offset keeps moving.
            let mut os_i = spans[si].os_index;
            let mut offset_diff = len_diff;
            while os_i < offset_setters.len() && offset_diff != 0 {
                let Some(os_bc) = offset_setters[os_i].bc else {
                    break;
                };
                let old_next = offset_setters[os_i].cur_val + sect.bc(os_bc).total_len();
                let new_val = (offset_setters[os_i].new_val as i64 + offset_diff) as u64;
                offset_setters[os_i].new_val = new_val;

                let orig_tail = sect.bc(os_bc).tail_len();
                let mut neg = 0i64;
                let mut pos = 0i64;
                let _ = sect.bcs_mut()[os_bc].expand(
                    SPAN_OFFSET_SETTER,
                    offset_setters[os_i].cur_val as i64,
                    new_val as i64,
                    &mut neg,
                    &mut pos,
                    diags,
                );
                offset_setters[os_i].thres = pos as u64;

                offset_diff =
                    new_val as i64 + sect.bc(os_bc).total_len() as i64 - old_next as i64;
                let tail_diff = sect.bc(os_bc).tail_len() as i64 - orig_tail as i64;
                if tail_diff != 0 {
                    debug!("offset setter at {} moved tail by {}", os_bc, tail_diff);
                    expand_terms(itree, spans, qa, qb, os_bc, tail_diff, diags);
                }

                offset_setters[os_i].cur_val = new_val;
                os_i += 1;
            }
        }
    }
}

/// Propagates a length change at `bc_idx` into every span whose
/// distance range crosses it, re-queueing spans that leave their
/// thresholds.
fn expand_terms(
    itree: &IntervalTree<(usize, usize)>,
    spans: &mut [Span],
    qa: &mut VecDeque<usize>,
    qb: &mut VecDeque<usize>,
    bc_idx: usize,
    len_diff: i64,
    diags: &mut Diagnostics,
) {
    let mut hits: Vec<(usize, usize)> = Vec::new();
    itree.enumerate(bc_idx as i64, bc_idx as i64, &mut |&d| hits.push(d));
    for (dsi, dti) in hits {
        let span = &mut spans[dsi];
        if span.state == SpanState::Inactive || span.state == SpanState::Dead {
            continue;
        }
        let term = &mut span.terms[dti];
        if term.loc.bc < term.loc2.bc {
            term.new_val += len_diff;
        } else {
            term.new_val -= len_diff;
        }

        if span.state == SpanState::OnQueue {
            continue;
        }
        if !span.recalc(diags) {
            continue;
        }
        debug!("span {{{},{}}} requeued", span.bc, span.id);
        if span.id <= 0 {
            qa.push_back(dsi);
        } else {
            qb.push_back(dsi);
        }
        span.state = SpanState::OnQueue;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::BranchBytecode;
    use crate::bytecode::Bytecode;
    use crate::expr::{Expr, Op};
    use crate::section::SectionFlags;

    fn finalize_with(
        sect: &mut Section,
        table: &mut SymbolTable,
        diags: &mut Diagnostics,
    ) {
        let abs_sym = table.create_anonymous("[abs]");
        for i in 0..sect.bcs().len() {
            let idx = sect.index();
            sect.bcs_mut()[i].finalize(idx, i, abs_sym, table, diags);
        }
    }

    #[test]
    fn test_offsets_without_spans() {
        let mut sect = Section::new(".text", 0, SectionFlags::CODE);
        sect.append_byte(0x90, Source::none());
        sect.append_gap(7, Source::none());
        sect.append_byte(0xC3, Source::none());

        let table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        optimize_section(&mut sect, &table, &mut diags);
        assert!(!diags.has_error_occurred());
        assert_eq!(sect.bc(2).offset(), 8);
        // Adjacent offsets line up with total lengths.
        for w in 0..sect.bcs().len() - 1 {
            assert_eq!(
                sect.bc(w + 1).offset(),
                sect.bc(w).offset() + sect.bc(w).total_len()
            );
        }
    }

    #[test]
    fn test_short_branch_stays_short() {
        // branch fwd; 10 bytes; fwd: stays short.
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let mut sect = Section::new(".text", 0, SectionFlags::CODE);

        let fwd = table.get_or_create("fwd");
        sect.append_bytecode(Bytecode::custom(
            Box::new(BranchBytecode::to_sym(fwd)),
            Source::at(1),
        ));
        sect.append_gap(10, Source::none());
        let loc = sect.end_loc();
        table.define_label(fwd, loc, Source::at(3), &mut diags);

        finalize_with(&mut sect, &mut table, &mut diags);
        assert!(!diags.has_error_occurred());
        optimize_section(&mut sect, &table, &mut diags);
        assert!(!diags.has_error_occurred());
        assert_eq!(sect.bc(1).total_len(), 2);
        assert_eq!(sect.bc(2).offset(), 2);
    }

    #[test]
    fn test_branch_expands_to_near() {
        // branch fwd; 200 bytes; fwd: displacement > 127 forces the
        // near form, offsets settle in one pass.
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let mut sect = Section::new(".text", 0, SectionFlags::CODE);

        let fwd = table.get_or_create("fwd");
        sect.append_bytecode(Bytecode::custom(
            Box::new(BranchBytecode::to_sym(fwd)),
            Source::at(1),
        ));
        sect.append_gap(200, Source::none());
        let loc = sect.end_loc();
        table.define_label(fwd, loc, Source::at(3), &mut diags);

        finalize_with(&mut sect, &mut table, &mut diags);
        assert!(!diags.has_error_occurred());
        optimize_section(&mut sect, &table, &mut diags);
        assert!(!diags.has_error_occurred());
        assert_eq!(sect.bc(1).total_len(), 6);
        assert_eq!(sect.bc(2).offset(), 6);
        assert_eq!(sect.bc(3).offset(), 206);
    }

    #[test]
    fn test_backward_branch_just_in_range() {
        // back: ; 120 bytes; branch back: fits short.
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let mut sect = Section::new(".text", 0, SectionFlags::CODE);

        let back = table.get_or_create("back");
        let loc = sect.end_loc();
        table.define_label(back, loc, Source::at(1), &mut diags);
        sect.append_gap(120, Source::none());
        sect.append_bytecode(Bytecode::custom(
            Box::new(BranchBytecode::to_sym(back)),
            Source::at(3),
        ));

        finalize_with(&mut sect, &mut table, &mut diags);
        optimize_section(&mut sect, &table, &mut diags);
        assert!(!diags.has_error_occurred());
        assert_eq!(sect.bc(2).total_len(), 2);
    }

    #[test]
    fn test_chained_branch_expansion() {
        // Branch A barely reaches its target at minimum lengths;
        // branch B is clearly out of range. B expanding pushes A's
        // target out too, so both end up near.
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let mut sect = Section::new(".text", 0, SectionFlags::CODE);

        let ta = table.get_or_create("ta");
        let tb = table.get_or_create("tb");
        sect.append_bytecode(Bytecode::custom(
            Box::new(BranchBytecode::to_sym(ta)),
            Source::at(1),
        ));
        sect.append_bytecode(Bytecode::custom(
            Box::new(BranchBytecode::to_sym(tb)),
            Source::at(2),
        ));
        sect.append_gap(125, Source::none());
        let la = sect.end_loc();
        table.define_label(ta, la, Source::at(3), &mut diags);
        sect.append_gap(100, Source::none());
        let lb = sect.end_loc();
        table.define_label(tb, lb, Source::at(4), &mut diags);

        finalize_with(&mut sect, &mut table, &mut diags);
        optimize_section(&mut sect, &table, &mut diags);
        assert!(!diags.has_error_occurred());
        // Minimum lengths: ta sits at 2+2+125 = 129 from A's start,
        // exactly in short range; tb at 229 - 2 from B's start forces
        // B near, which moves ta to 133 and drags A near as well.
        assert_eq!(sect.bc(1).total_len(), 6);
        assert_eq!(sect.bc(2).total_len(), 6);
        // Final: A at 0, B at 6, gap at 12, ta at 137.
        assert_eq!(sect.bc(4).offset(), 137);
    }

    #[test]
    fn test_times_span_dependent_count() {
        // times (end - start) / 4 <byte>; start: 64 bytes; end:
        // count resolves to 16.
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let mut sect = Section::new(".data", 0, SectionFlags::DATA);

        let start = table.get_or_create("start");
        let end = table.get_or_create("end");

        let mut count = Expr::from_sym(end);
        count.calc(Op::Sub, Some(&Expr::from_sym(start)), Source::none());
        count.calc(Op::Div, Some(&Expr::from_int(IntNum::new(4))), Source::none());

        let mut inner = Bytecode::empty(Source::none());
        inner.append_fixed_bytes(&[0x90]);
        sect.append_bytecode(Bytecode::multiple(count, inner, Source::at(1)));

        let l_start = sect.end_loc();
        table.define_label(start, l_start, Source::at(2), &mut diags);
        sect.append_gap(64, Source::none());
        let l_end = sect.end_loc();
        table.define_label(end, l_end, Source::at(4), &mut diags);

        finalize_with(&mut sect, &mut table, &mut diags);
        optimize_section(&mut sect, &table, &mut diags);
        assert!(!diags.has_error_occurred());
        assert_eq!(sect.bc(1).total_len(), 16);
        // The label bytecode after the 64-byte block lands at 80.
        assert_eq!(sect.bc(4).offset(), 80);
    }

    #[test]
    fn test_times_circular_reference() {
        // times (end - start) <byte> where the repeat sits between the
        // labels: the count depends on its own length.
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let mut sect = Section::new(".data", 0, SectionFlags::DATA);

        let start = table.get_or_create("start");
        let end = table.get_or_create("end");

        let l_start = sect.end_loc();
        table.define_label(start, l_start, Source::at(1), &mut diags);
        sect.append_byte(0xAA, Source::none());

        let mut count = Expr::from_sym(end);
        count.calc(Op::Sub, Some(&Expr::from_sym(start)), Source::none());
        let mut inner = Bytecode::empty(Source::none());
        inner.append_fixed_bytes(&[0x90]);
        sect.append_bytecode(Bytecode::multiple(count, inner, Source::at(2)));

        sect.append_byte(0xBB, Source::none());
        let l_end = sect.end_loc();
        table.define_label(end, l_end, Source::at(3), &mut diags);

        finalize_with(&mut sect, &mut table, &mut diags);
        optimize_section(&mut sect, &table, &mut diags);
        assert!(
            diags
                .all()
                .iter()
                .any(|d| d.id == DiagId::OptimizerCircularReference)
        );
    }

    #[test]
    fn test_align_absorbs_small_growth() {
        // branch fwd; align 16; fwd: the branch stays short and the
        // align pads to the boundary.
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let mut sect = Section::new(".text", 0, SectionFlags::CODE);

        let fwd = table.get_or_create("fwd");
        sect.append_bytecode(Bytecode::custom(
            Box::new(BranchBytecode::to_sym(fwd)),
            Source::at(1),
        ));
        sect.append_bytecode(Bytecode::align(16, None, None, Source::at(2)));
        let loc = sect.end_loc();
        table.define_label(fwd, loc, Source::at(3), &mut diags);
        sect.append_byte(0xC3, Source::none());

        finalize_with(&mut sect, &mut table, &mut diags);
        optimize_section(&mut sect, &table, &mut diags);
        assert!(!diags.has_error_occurred());
        // Short branch at 0..2, align pads 2..16, label at 16.
        assert_eq!(sect.bc(1).total_len(), 2);
        assert_eq!(sect.bc(2).offset(), 2);
        assert_eq!(sect.bc(2).total_len(), 14);
        assert_eq!(sect.bc(3).offset(), 16);
    }

    #[test]
    fn test_deterministic_offsets() {
        // Identical input twice produces identical offsets.
        let build = || {
            let mut table = SymbolTable::new();
            let mut diags = Diagnostics::new();
            let mut sect = Section::new(".text", 0, SectionFlags::CODE);
            let fwd = table.get_or_create("fwd");
            sect.append_bytecode(Bytecode::custom(
                Box::new(BranchBytecode::to_sym(fwd)),
                Source::at(1),
            ));
            sect.append_gap(150, Source::none());
            let loc = sect.end_loc();
            table.define_label(fwd, loc, Source::at(2), &mut diags);
            finalize_with(&mut sect, &mut table, &mut diags);
            optimize_section(&mut sect, &table, &mut diags);
            sect.bcs().iter().map(|b| b.offset()).collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
    }
}
