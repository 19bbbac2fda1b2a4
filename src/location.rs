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

use crate::errors::Diagnostics;
use crate::expr::{Expr, ExprTerm, Op, TermKind};
use crate::intnum::IntNum;
use crate::symbol::SymbolTable;

/// A position inside a section: (bytecode index, byte offset within
/// that bytecode). Absolute offsets are meaningful only after the
/// optimizer has assigned them; intra-bytecode distances always are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub sect: usize,
    pub bc: usize,
    pub off: u64,
}

/// Distance `b - a` when both locations are in the same bytecode.
/// Safe to call before offsets are assigned; refuses to cross bytecode
/// boundaries.
pub fn calc_dist_no_bc(a: Location, b: Location) -> Option<IntNum> {
    if a.sect == b.sect && a.bc == b.bc {
        Some(IntNum::new(b.off as i64 - a.off as i64))
    } else {
        None
    }
}

/// Rewrites `X + (-1*Y)` pairs (the canonical subtraction shape) at the
/// ADD operator `pos`, for X/Y symbols or locations resolving into the
/// same section. Identical symbols cancel outright; for resolvable
/// pairs `func(term, loc_sub, loc_rel)` decides the rewrite of the
/// additive term and the subtractive subtree is cleared on success.
fn transform_dist_base(
    e: &mut Expr,
    pos: usize,
    table: &SymbolTable,
    func: &mut dyn FnMut(&mut ExprTerm, Location, Location) -> bool,
) {
    if !e.terms()[pos].is_op_of(Op::Add) {
        return;
    }

    struct SubItem {
        sym: usize,
        neg1: usize,
        root: usize,
        matched: bool,
    }

    let (children, _) = e.children_of(pos);
    let mut rels: SmallVec<[usize; 8]> = SmallVec::new();
    let mut subs: SmallVec<[SubItem; 8]> = SmallVec::new();
    for &c in &children {
        match e.terms()[c].kind {
            TermKind::Sym(_) | TermKind::Loc(_) => rels.push(c),
            TermKind::Op(Op::Mul, _) => {
                if let Some((sym, neg1)) = e.as_neg1_mul(c, true) {
                    subs.push(SubItem {
                        sym,
                        neg1,
                        root: c,
                        matched: false,
                    });
                }
            }
            _ => {}
        }
    }

    let resolve = |e: &Expr, idx: usize| -> Option<Location> {
        match e.terms()[idx].kind {
            TermKind::Sym(s) => table.get(s).get_label(),
            TermKind::Loc(l) => Some(l),
            _ => None,
        }
    };

    for &r in &rels {
        let rel_sym = e.terms()[r].get_sym();
        let rel_loc = resolve(e, r);
        for sub in subs.iter_mut() {
            if sub.matched {
                continue;
            }
            // The same symbol cancels even when external.
            let sub_sym = e.terms()[sub.sym].get_sym();
            if rel_sym.is_some() && rel_sym == sub_sym {
                e.terms_mut()[r].zero();
                e.terms_mut()[sub.sym].clear();
                e.terms_mut()[sub.neg1].clear();
                e.terms_mut()[sub.root].zero();
                sub.matched = true;
                break;
            }

            let (Some(rl), Some(sl)) = (rel_loc, resolve(e, sub.sym)) else {
                continue;
            };
            if rl.sect != sl.sect {
                continue;
            }
            if func(&mut e.terms_mut()[r], sl, rl) {
                e.terms_mut()[sub.sym].clear();
                e.terms_mut()[sub.neg1].clear();
                e.terms_mut()[sub.root].zero();
                sub.matched = true;
                break;
            }
        }
    }
}

/// Simplifies the expression, replacing same-section `Symbol - Symbol`
/// (or location) pairs with integer distances supplied by `dist`.
/// Cross-section pairs are left unchanged.
pub fn simplify_calc_dist(
    e: &mut Expr,
    table: &SymbolTable,
    diags: &mut Diagnostics,
    dist: &dyn Fn(Location, Location) -> Option<IntNum>,
) {
    e.simplify_with(diags, true, |e, pos| {
        transform_dist_base(e, pos, table, &mut |term, l1, l2| match dist(l1, l2) {
            Some(d) => {
                term.kind = TermKind::Int(d);
                true
            }
            None => false,
        });
    });
}

/// Pre-optimization variant: only resolves pairs inside a single
/// bytecode, where distances exist before offsets are assigned.
pub fn simplify_calc_dist_no_bc(e: &mut Expr, table: &SymbolTable, diags: &mut Diagnostics) {
    simplify_calc_dist(e, table, diags, &|a, b| calc_dist_no_bc(a, b));
}

/// Like `simplify_calc_dist`, but instead of writing distances in place
/// allocates sequential `Subst` indexes and reports each pair through
/// `cb(index, loc_sub, loc_rel)`. Returns the number of substitutions.
pub fn subst_dist(
    e: &mut Expr,
    table: &SymbolTable,
    diags: &mut Diagnostics,
    cb: &mut dyn FnMut(u32, Location, Location),
) -> u32 {
    let mut count = 0u32;
    e.simplify_with(diags, true, |e, pos| {
        transform_dist_base(e, pos, table, &mut |term, l1, l2| {
            cb(count, l1, l2);
            term.kind = TermKind::Subst(count);
            count += 1;
            true
        });
    });
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Source;

    fn loc(bc: usize, off: u64) -> Location {
        Location { sect: 0, bc, off }
    }

    fn sub_expr(a: Expr, b: Expr) -> Expr {
        let mut e = a;
        e.calc(Op::Sub, Some(&b), Source::none());
        e
    }

    #[test]
    fn test_calc_dist_no_bc() {
        assert_eq!(
            calc_dist_no_bc(loc(2, 1), loc(2, 9)),
            Some(IntNum::new(8))
        );
        assert_eq!(calc_dist_no_bc(loc(2, 1), loc(3, 9)), None);
    }

    #[test]
    fn test_loc_pair_becomes_distance() {
        let table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let mut e = sub_expr(Expr::from_loc(loc(1, 6)), Expr::from_loc(loc(1, 2)));
        simplify_calc_dist_no_bc(&mut e, &table, &mut diags);
        assert_eq!(e.get_intnum(), Some(&IntNum::new(4)));
    }

    #[test]
    fn test_label_pair_becomes_distance() {
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let s1 = table.get_or_create("a");
        let s2 = table.get_or_create("b");
        table.define_label(s1, loc(3, 0), Source::at(1), &mut diags);
        table.define_label(s2, loc(3, 10), Source::at(2), &mut diags);

        let mut e = sub_expr(Expr::from_sym(s2), Expr::from_sym(s1));
        simplify_calc_dist_no_bc(&mut e, &table, &mut diags);
        assert_eq!(e.get_intnum(), Some(&IntNum::new(10)));
    }

    #[test]
    fn test_cross_section_pair_left_alone() {
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let s1 = table.get_or_create("a");
        let s2 = table.get_or_create("b");
        table.define_label(
            s1,
            Location {
                sect: 0,
                bc: 0,
                off: 0,
            },
            Source::at(1),
            &mut diags,
        );
        table.define_label(
            s2,
            Location {
                sect: 1,
                bc: 0,
                off: 0,
            },
            Source::at(2),
            &mut diags,
        );

        let mut e = sub_expr(Expr::from_sym(s2), Expr::from_sym(s1));
        simplify_calc_dist_no_bc(&mut e, &table, &mut diags);
        let root = e.root_pos().unwrap();
        assert!(e.terms()[root].is_op_of(Op::Add));
    }

    #[test]
    fn test_same_symbol_cancels_even_undefined() {
        let mut table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        let ext = table.get_or_create("external");
        let mut e = sub_expr(Expr::from_sym(ext), Expr::from_sym(ext));
        e.calc(Op::Add, Some(&Expr::from_int(IntNum::new(5))), Source::none());
        simplify_calc_dist_no_bc(&mut e, &table, &mut diags);
        assert_eq!(e.get_intnum(), Some(&IntNum::new(5)));
    }

    #[test]
    fn test_subst_dist_numbers_pairs() {
        let table = SymbolTable::new();
        let mut diags = Diagnostics::new();
        // (l1 - l0) + (l3 - l2): two pairs crossing bytecodes.
        let p1 = sub_expr(Expr::from_loc(loc(5, 0)), Expr::from_loc(loc(1, 0)));
        let mut e = p1;
        let p2 = sub_expr(Expr::from_loc(loc(9, 0)), Expr::from_loc(loc(7, 0)));
        e.calc(Op::Add, Some(&p2), Source::none());

        let mut seen = Vec::new();
        let n = subst_dist(&mut e, &table, &mut diags, &mut |i, l1, l2| {
            seen.push((i, l1.bc, l2.bc));
        });
        assert_eq!(n, 2);
        assert_eq!(seen.len(), 2);
        assert!(e.contains(crate::expr::TermTypes::SUBST));
    }
}
