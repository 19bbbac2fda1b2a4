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

use super::eval::{fold_float, fold_int, is_float_foldable};
use super::{Expr, ExprTerm, Op, TermKind};
use crate::errors::Diagnostics;
use crate::intnum::IntNum;

impl Expr {
    /// Simplifies as much as possible: eliminates extraneous branches and
    /// folds constant subexpressions. Does not expand EQUs; call
    /// `symbol::expand_equ` first.
    pub fn simplify(&mut self, diags: &mut Diagnostics, simplify_reg_mul: bool) {
        self.simplify_with(diags, simplify_reg_mul, |_, _| {});
    }

    /// Simplifies with a functor called on each operator term in
    /// post-order. `level_op` runs both before and after the functor;
    /// the functor may reveal new integer subtrees the second pass can
    /// fold.
    pub fn simplify_with<F>(
        &mut self,
        diags: &mut Diagnostics,
        simplify_reg_mul: bool,
        mut func: F,
    ) where
        F: FnMut(&mut Expr, usize),
    {
        self.transform_neg();

        // Re-check len each pass: the functor may grow the expression.
        let mut pos = 0;
        while pos < self.terms.len() {
            if self.terms[pos].is_op() {
                self.level_op(diags, simplify_reg_mul, pos);

                if self.terms[pos].is_op() {
                    func(self, pos);
                }
                if self.terms[pos].is_op() {
                    self.level_op(diags, simplify_reg_mul, pos);
                }
            }
            pos += 1;
        }

        self.cleanup();
    }

    /// Compacts away cleared holes. Depth labels are untouched.
    pub fn cleanup(&mut self) {
        self.terms.retain(|t| !t.is_empty());
    }

    /// First index of the subtree rooted at `pos`. Scanning backward,
    /// the subtree ends at the first non-empty term at the root's depth
    /// or shallower.
    pub(crate) fn subtree_start(&self, pos: usize) -> usize {
        let d = self.terms[pos].depth;
        let mut start = pos;
        let mut j = pos;
        while j > 0 {
            j -= 1;
            if self.terms[j].is_empty() {
                continue;
            }
            if self.terms[j].depth <= d {
                break;
            }
            start = j;
        }
        start
    }

    /// Rewrites `SUB(a, b)` as `ADD(a, MUL(b, -1))` and `NEG(a)` as
    /// `MUL(a, -1)`. Subtraction is not associative; the rewritten form
    /// levels, and `(-1 * sym)` is the canonical shape the value
    /// finalizer and distance transforms recognize.
    pub(crate) fn transform_neg(&mut self) {
        let mut i = 0;
        while i < self.terms.len() {
            let d = self.terms[i].depth;
            let src = self.terms[i].source;
            match self.terms[i].kind {
                TermKind::Op(Op::Sub, 2) => {
                    let (children, _) = self.children_of(i);
                    if children.len() != 2 {
                        i += 1;
                        continue;
                    }
                    // Push the RHS subtree down a level under the new MUL.
                    let b_start = children[0] + 1;
                    for t in &mut self.terms[b_start..i] {
                        if !t.is_empty() {
                            t.depth += 1;
                        }
                    }
                    self.terms[i].kind = TermKind::Op(Op::Add, 2);
                    self.terms.insert(
                        i,
                        ExprTerm {
                            kind: TermKind::Op(Op::Mul, 2),
                            depth: d + 1,
                            source: src,
                        },
                    );
                    self.terms.insert(
                        i,
                        ExprTerm {
                            kind: TermKind::Int(IntNum::new(-1)),
                            depth: d + 2,
                            source: src,
                        },
                    );
                    i += 3;
                }
                TermKind::Op(Op::Neg, 1) => {
                    self.terms[i].kind = TermKind::Op(Op::Mul, 2);
                    self.terms.insert(
                        i,
                        ExprTerm {
                            kind: TermKind::Int(IntNum::new(-1)),
                            depth: d + 1,
                            source: src,
                        },
                    );
                    i += 2;
                }
                _ => i += 1,
            }
        }
    }

    /// Clears a single-child wrapper operator at `pos` (root when
    /// `None`), promoting the child subtree one level. True unary
    /// operators keep their child.
    pub fn make_ident(&mut self, _diags: &mut Diagnostics, pos: Option<usize>) {
        let pos = match pos.or_else(|| self.root_pos()) {
            Some(p) => p,
            None => return,
        };
        let op = match self.terms[pos].op() {
            Some(o) => o,
            None => return,
        };
        if matches!(op, Op::Neg | Op::Not | Op::LNot | Op::Seg) {
            return;
        }
        let (children, _) = self.children_of(pos);
        if children.len() != 1 {
            return;
        }
        self.promote_only_child(pos, children[0]);
    }

    fn promote_only_child(&mut self, op_pos: usize, child: usize) {
        let cstart = self.subtree_start(child);
        for t in &mut self.terms[cstart..=child] {
            if !t.is_empty() {
                t.depth -= 1;
            }
        }
        self.terms[op_pos].clear();
    }

    /// One level of simplification at the operator term `pos`:
    /// constant folding, associative leveling, integer combining,
    /// identity removal, and single-child promotion. Full simplification
    /// emerges from the post-order walk in `simplify_with`.
    pub(crate) fn level_op(
        &mut self,
        diags: &mut Diagnostics,
        simplify_reg_mul: bool,
        pos: usize,
    ) {
        let op = match self.terms[pos].op() {
            Some(o) => o,
            None => return,
        };
        let d = self.terms[pos].depth;
        let src = self.terms[pos].source;

        // Hoist same-operator children of ADD/MUL one level up.
        if op.is_associative() {
            let (children, _) = self.children_of(pos);
            let mut added = 0;
            for &c in &children {
                if self.terms[c].is_op_of(op) {
                    let inner_n = self.terms[c].num_child();
                    let cstart = self.subtree_start(c);
                    for t in &mut self.terms[cstart..c] {
                        if !t.is_empty() {
                            t.depth -= 1;
                        }
                    }
                    self.terms[c].clear();
                    added += inner_n - 1;
                }
            }
            if added != 0 {
                self.terms[pos].add_num_child(added);
            }
        }

        let (children, start) = self.children_of(pos);
        if children.is_empty() {
            return;
        }

        let n_int = children
            .iter()
            .filter(|&&c| matches!(self.terms[c].kind, TermKind::Int(_)))
            .count();
        let n_float = children
            .iter()
            .filter(|&&c| matches!(self.terms[c].kind, TermKind::Float(_)))
            .count();

        // Fully numeric subtree: evaluate and replace with one term.
        if n_int + n_float == children.len() {
            let operands: SmallVec<[&ExprTerm; 4]> =
                children.iter().map(|&c| &self.terms[c]).collect();
            let folded = if n_float == 0 {
                let ints: SmallVec<[&IntNum; 4]> = operands
                    .iter()
                    .map(|t| t.get_int().expect("int term"))
                    .collect();
                fold_int(op, &ints, diags, src).map(TermKind::Int)
            } else if is_float_foldable(op) {
                fold_float(op, &operands).map(TermKind::Float)
            } else {
                None
            };
            drop(operands);
            if let Some(kind) = folded {
                for t in &mut self.terms[start..pos] {
                    t.clear();
                }
                self.terms[pos] = ExprTerm {
                    kind,
                    depth: d,
                    source: src,
                };
                return;
            }
        }

        // Mixed subtree under ADD/MUL: combine the integer children into
        // one, then strip identities.
        if op.is_associative() {
            let int_children: SmallVec<[usize; 4]> = children
                .iter()
                .copied()
                .filter(|&c| matches!(self.terms[c].kind, TermKind::Int(_)))
                .collect();
            let mut removed = 0;
            let mut combined_at = None;
            if let Some((&first, rest)) = int_children.split_first() {
                combined_at = Some(first);
                if !rest.is_empty() {
                    let mut acc = self.terms[first].get_int().unwrap().clone();
                    for &c in rest {
                        let rhs = self.terms[c].get_int().unwrap();
                        acc = match op {
                            Op::Add => acc.add(rhs),
                            Op::Mul => acc.mul(rhs),
                            _ => unreachable!(),
                        };
                        self.terms[c].clear();
                        removed += 1;
                    }
                    self.terms[first].kind = TermKind::Int(acc);
                }
            }

            if let Some(ci) = combined_at {
                let v = self.terms[ci].get_int().unwrap().clone();
                match op {
                    Op::Add if v.is_zero() => {
                        self.terms[ci].clear();
                        removed += 1;
                    }
                    Op::Mul if v.is_zero() => {
                        // Zero annihilates the whole product.
                        for t in &mut self.terms[start..pos] {
                            t.clear();
                        }
                        self.terms[pos] = ExprTerm {
                            kind: TermKind::Int(IntNum::zero()),
                            depth: d,
                            source: src,
                        };
                        return;
                    }
                    Op::Mul if v == IntNum::new(1) => {
                        let has_reg = children
                            .iter()
                            .any(|&c| matches!(self.terms[c].kind, TermKind::Reg(_)));
                        if simplify_reg_mul || !has_reg {
                            self.terms[ci].clear();
                            removed += 1;
                        }
                    }
                    _ => {}
                }
            }
            if removed != 0 {
                self.terms[pos].add_num_child(-removed);
            }
        }

        // A wrapper left with a single operand collapses to the operand.
        let (children, _) = self.children_of(pos);
        if children.len() == 1 && !matches!(op, Op::Neg | Op::Not | Op::LNot | Op::Seg) {
            self.promote_only_child(pos, children[0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Source;

    fn int(v: i64) -> Expr {
        Expr::from_int(IntNum::new(v))
    }

    fn diags() -> Diagnostics {
        Diagnostics::new()
    }

    fn simplified(mut e: Expr) -> Expr {
        let mut d = diags();
        e.simplify(&mut d, true);
        e
    }

    #[test]
    fn test_fold_addition() {
        let mut e = int(1);
        e.calc(Op::Add, Some(&int(2)), Source::none());
        e.calc(Op::Add, Some(&int(3)), Source::none());
        let e = simplified(e);
        assert_eq!(e.get_intnum(), Some(&IntNum::new(6)));
    }

    #[test]
    fn test_fold_subtraction_via_transform_neg() {
        let mut e = int(10);
        e.calc(Op::Sub, Some(&int(4)), Source::none());
        let e = simplified(e);
        assert_eq!(e.get_intnum(), Some(&IntNum::new(6)));
    }

    #[test]
    fn test_fold_negation() {
        let mut e = int(5);
        e.calc(Op::Neg, None, Source::none());
        let e = simplified(e);
        assert_eq!(e.get_intnum(), Some(&IntNum::new(-5)));
    }

    #[test]
    fn test_fold_mixed_ops() {
        // (2 + 3) * 4 - 6 = 14
        let mut e = int(2);
        e.calc(Op::Add, Some(&int(3)), Source::none());
        e.calc(Op::Mul, Some(&int(4)), Source::none());
        e.calc(Op::Sub, Some(&int(6)), Source::none());
        let e = simplified(e);
        assert_eq!(e.get_intnum(), Some(&IntNum::new(14)));
    }

    #[test]
    fn test_fold_comparisons_and_logic() {
        let mut e = int(3);
        e.calc(Op::Lt, Some(&int(5)), Source::none());
        assert_eq!(simplified(e).get_intnum(), Some(&IntNum::new(1)));

        let mut e = int(3);
        e.calc(Op::Ge, Some(&int(5)), Source::none());
        assert_eq!(simplified(e).get_intnum(), Some(&IntNum::new(0)));

        let mut e = int(2);
        e.calc(Op::LAnd, Some(&int(0)), Source::none());
        assert_eq!(simplified(e).get_intnum(), Some(&IntNum::new(0)));
    }

    #[test]
    fn test_division_by_zero_reports_and_zeroes() {
        let mut e = int(5);
        e.calc(Op::SignDiv, Some(&int(0)), Source::at(9));
        let mut d = diags();
        e.simplify(&mut d, true);
        assert_eq!(e.get_intnum(), Some(&IntNum::new(0)));
        assert!(d.has_error_occurred());
    }

    #[test]
    fn test_leveling_is_flat() {
        use crate::symbol::SymbolRef;
        // sym + (1 + (2 + 3)) levels and combines to sym + 6.
        let sym = SymbolRef::for_test(1);
        let mut inner = int(2);
        inner.calc(Op::Add, Some(&int(3)), Source::none());
        let mut mid = int(1);
        mid.calc(Op::Add, Some(&inner), Source::none());
        let mut e = Expr::from_sym(sym);
        e.calc(Op::Add, Some(&mid), Source::none());

        let e = simplified(e);
        let root = e.root_pos().unwrap();
        assert!(e.terms()[root].is_op_of(Op::Add));
        assert_eq!(e.terms()[root].num_child(), 2);
        // Exactly one integer child remains, the combined 6.
        let ints: Vec<&IntNum> = e
            .terms()
            .iter()
            .filter_map(|t| t.get_int())
            .collect();
        assert_eq!(ints, vec![&IntNum::new(6)]);
    }

    #[test]
    fn test_add_zero_removed() {
        use crate::symbol::SymbolRef;
        let sym = SymbolRef::for_test(1);
        let mut e = Expr::from_sym(sym);
        e.calc(Op::Add, Some(&int(0)), Source::none());
        let e = simplified(e);
        assert!(e.is_symbol());
    }

    #[test]
    fn test_mul_by_zero_collapses() {
        use crate::symbol::SymbolRef;
        let sym = SymbolRef::for_test(1);
        let mut e = Expr::from_sym(sym);
        e.calc(Op::Mul, Some(&int(0)), Source::none());
        let e = simplified(e);
        assert_eq!(e.get_intnum(), Some(&IntNum::zero()));
    }

    #[test]
    fn test_neg1_sym_preserved() {
        use crate::symbol::SymbolRef;
        // sym * -1 must stay structural: it is the canonical subtractive
        // form the value finalizer matches on.
        let sym = SymbolRef::for_test(1);
        let mut e = Expr::from_sym(sym);
        e.calc(Op::Mul, Some(&int(-1)), Source::none());
        let e = simplified(e);
        let root = e.root_pos().unwrap();
        assert!(e.terms()[root].is_op_of(Op::Mul));
        assert!(e.as_neg1_mul(root, false).is_some());
    }

    #[test]
    fn test_reg_mul_identity() {
        use crate::arch::RegisterRef;
        let reg = RegisterRef::new(0, 2);
        let mut e = Expr::from_reg(reg);
        e.calc(Op::Mul, Some(&int(1)), Source::none());
        let mut keep = e.clone();

        let mut d = diags();
        e.simplify(&mut d, true);
        assert!(e.is_register());

        keep.simplify(&mut d, false);
        let root = keep.root_pos().unwrap();
        assert!(keep.terms()[root].is_op_of(Op::Mul));
    }

    #[test]
    fn test_simplify_idempotent() {
        use crate::symbol::SymbolRef;
        let sym = SymbolRef::for_test(2);
        let mut e = Expr::from_sym(sym);
        e.calc(Op::Add, Some(&int(5)), Source::none());
        e.calc(Op::Mul, Some(&int(3)), Source::none());
        e.calc(Op::Sub, Some(&Expr::from_sym(sym)), Source::none());

        let mut d = diags();
        e.simplify(&mut d, true);
        let once = e.clone();
        e.simplify(&mut d, true);
        assert_eq!(e, once);
    }

    #[test]
    fn test_float_folding() {
        use crate::floatnum::FloatNum;
        let mut e = Expr::from_float(FloatNum::from_f64(1.5));
        e.calc(Op::Mul, Some(&int(4)), Source::none());
        let e = simplified(e);
        assert_eq!(e.get_float(), Some(&FloatNum::from_f64(6.0)));
    }

    #[test]
    fn test_float_subtraction() {
        use crate::floatnum::FloatNum;
        let mut e = Expr::from_float(FloatNum::from_f64(2.5));
        e.calc(Op::Sub, Some(&Expr::from_float(FloatNum::from_f64(1.0))), Source::none());
        let e = simplified(e);
        assert_eq!(e.get_float(), Some(&FloatNum::from_f64(1.5)));
    }

    #[test]
    fn test_integer_only_collapses_to_single_term() {
        // Invariant: an all-integer expression simplifies to one term.
        let mut e = int(7);
        e.calc(Op::Shl, Some(&int(4)), Source::none());
        e.calc(Op::Xor, Some(&int(0xFF)), Source::none());
        e.calc(Op::SignMod, Some(&int(31)), Source::none());
        let e = simplified(e);
        assert!(e.is_intnum());
    }
}
