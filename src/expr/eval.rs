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

use super::{Expr, ExprTerm, Op, TermKind};
use crate::errors::{DiagId, Diagnostics, Source};
use crate::floatnum::FloatNum;
use crate::intnum::IntNum;
use crate::location::Location;
use crate::symbol::SymbolRef;

/// Shift amounts beyond this leave the subtree structural rather than
/// materializing an absurdly wide constant.
const MAX_FOLD_SHIFT: u64 = 1 << 20;

fn as_bool(v: &IntNum) -> bool {
    !v.is_zero()
}

fn from_bool(b: bool) -> IntNum {
    IntNum::new(b as i64)
}

/// Evaluates an operator over integer operands. Add and Mul take any
/// number of operands; Neg/Not/LNot take one; the rest take two.
/// Division by zero reports a diagnostic and yields zero. `None` means
/// the operator cannot fold (wrong operand count, non-numeric operator,
/// or out-of-range shift).
pub(crate) fn fold_int(
    op: Op,
    vals: &[&IntNum],
    diags: &mut Diagnostics,
    source: Source,
) -> Option<IntNum> {
    match op {
        Op::Add | Op::Mul => {
            let mut acc = (*vals.first()?).clone();
            for v in &vals[1..] {
                acc = match op {
                    Op::Add => acc.add(v),
                    _ => acc.mul(v),
                };
            }
            return Some(acc);
        }
        Op::Neg | Op::Not | Op::LNot => {
            if vals.len() != 1 {
                return None;
            }
            let v = vals[0];
            return Some(match op {
                Op::Neg => v.negate(),
                Op::Not => v.bit_not(),
                _ => from_bool(!as_bool(v)),
            });
        }
        _ => {}
    }

    if vals.len() != 2 {
        return None;
    }
    let (a, b) = (vals[0], vals[1]);
    let div = |r: Option<IntNum>, diags: &mut Diagnostics| {
        r.or_else(|| {
            diags.report(source, DiagId::DivisionByZero);
            Some(IntNum::zero())
        })
    };
    match op {
        Op::Sub => Some(a.sub(b)),
        Op::Div => div(a.checked_udiv(b), diags),
        Op::SignDiv => div(a.checked_div(b), diags),
        Op::Mod => div(a.checked_urem(b), diags),
        Op::SignMod => div(a.checked_rem(b), diags),
        Op::Or => Some(a.bit_or(b)),
        Op::And => Some(a.bit_and(b)),
        Op::Xor => Some(a.bit_xor(b)),
        Op::Xnor => Some(a.bit_xor(b).bit_not()),
        Op::Nor => Some(a.bit_or(b).bit_not()),
        Op::Shl | Op::Shr => {
            let shamt = if b.is_negative() {
                0
            } else {
                b.get_u64().unwrap_or(u64::MAX)
            };
            if shamt > MAX_FOLD_SHIFT {
                return None;
            }
            Some(match op {
                Op::Shl => a.shl(shamt as u32),
                _ => a.lshr(shamt as u32),
            })
        }
        Op::LOr => Some(from_bool(as_bool(a) || as_bool(b))),
        Op::LAnd => Some(from_bool(as_bool(a) && as_bool(b))),
        Op::LXor => Some(from_bool(as_bool(a) != as_bool(b))),
        Op::LXnor => Some(from_bool(as_bool(a) == as_bool(b))),
        Op::LNor => Some(from_bool(!(as_bool(a) || as_bool(b)))),
        Op::Lt => Some(from_bool(a < b)),
        Op::Gt => Some(from_bool(a > b)),
        Op::Eq => Some(from_bool(a == b)),
        Op::Le => Some(from_bool(a <= b)),
        Op::Ge => Some(from_bool(a >= b)),
        Op::Ne => Some(from_bool(a != b)),
        Op::Seg | Op::Wrt | Op::SegOff | Op::Add | Op::Mul | Op::Neg | Op::Not | Op::LNot => None,
    }
}

/// Arithmetic operators that fold over float operands (with integer
/// operands promoted).
pub(crate) fn is_float_foldable(op: Op) -> bool {
    matches!(op, Op::Add | Op::Sub | Op::Mul | Op::Div | Op::SignDiv)
}

fn term_as_float(t: &ExprTerm) -> Option<FloatNum> {
    match &t.kind {
        TermKind::Float(f) => Some(*f),
        TermKind::Int(v) => Some(FloatNum::from_intnum(v)),
        _ => None,
    }
}

/// Evaluates an arithmetic operator over float (or promoted integer)
/// operands.
pub(crate) fn fold_float(op: Op, terms: &[&ExprTerm]) -> Option<FloatNum> {
    if !is_float_foldable(op) {
        return None;
    }
    let mut vals: SmallVec<[FloatNum; 4]> = SmallVec::new();
    for t in terms {
        vals.push(term_as_float(t)?);
    }
    match op {
        Op::Add | Op::Mul => {
            let mut acc = *vals.first()?;
            for v in &vals[1..] {
                acc = match op {
                    Op::Add => acc.add(v),
                    _ => acc.mul(v),
                };
            }
            Some(acc)
        }
        Op::Sub if vals.len() == 2 => Some(vals[0].sub(&vals[1])),
        Op::Div | Op::SignDiv if vals.len() == 2 => Some(vals[0].div(&vals[1])),
        _ => None,
    }
}

/// Fully evaluates an expression to a single integer or float term.
///
/// `substs` supplies values for `Subst` placeholders. `resolve_loc` and
/// `resolve_sym` turn locations and labeled symbols into absolute
/// offsets; without them (or when they decline) such terms make the
/// expression non-constant and evaluation returns `None`.
pub fn evaluate(
    e: &Expr,
    substs: &[ExprTerm],
    resolve_loc: Option<&dyn Fn(Location) -> Option<IntNum>>,
    resolve_sym: Option<&dyn Fn(SymbolRef) -> Option<IntNum>>,
    diags: &mut Diagnostics,
) -> Option<ExprTerm> {
    let mut stack: Vec<TermKind> = Vec::new();
    for term in e.terms() {
        match &term.kind {
            TermKind::None => {}
            TermKind::Int(v) => stack.push(TermKind::Int(v.clone())),
            TermKind::Float(f) => stack.push(TermKind::Float(*f)),
            TermKind::Subst(i) => {
                let s = substs.get(*i as usize)?;
                match &s.kind {
                    TermKind::Int(v) => stack.push(TermKind::Int(v.clone())),
                    TermKind::Float(f) => stack.push(TermKind::Float(*f)),
                    _ => return None,
                }
            }
            TermKind::Loc(loc) => {
                let v = resolve_loc.and_then(|f| f(*loc))?;
                stack.push(TermKind::Int(v));
            }
            TermKind::Sym(sym) => {
                let v = resolve_sym.and_then(|f| f(*sym))?;
                stack.push(TermKind::Int(v));
            }
            TermKind::Reg(_) => return None,
            TermKind::Op(op, n) => {
                let n = *n as usize;
                if stack.len() < n {
                    return None;
                }
                let operands: Vec<TermKind> = stack.split_off(stack.len() - n);
                let any_float = operands
                    .iter()
                    .any(|k| matches!(k, TermKind::Float(_)));
                let result = if any_float {
                    let terms: Vec<ExprTerm> = operands
                        .iter()
                        .map(|k| ExprTerm::new(k.clone(), term.source))
                        .collect();
                    let refs: Vec<&ExprTerm> = terms.iter().collect();
                    TermKind::Float(fold_float(*op, &refs)?)
                } else {
                    let ints: Vec<&IntNum> = operands
                        .iter()
                        .map(|k| match k {
                            TermKind::Int(v) => v,
                            _ => unreachable!("operand is int or float"),
                        })
                        .collect();
                    TermKind::Int(fold_int(*op, &ints, diags, term.source)?)
                };
                stack.push(result);
            }
        }
    }
    if stack.len() != 1 {
        return None;
    }
    Some(ExprTerm::new(stack.pop().unwrap(), Source::none()))
}
