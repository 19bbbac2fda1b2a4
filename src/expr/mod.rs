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

pub mod eval;
mod simplify;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::arch::RegisterRef;
use crate::errors::Source;
use crate::floatnum::FloatNum;
use crate::intnum::IntNum;
use crate::location::Location;
use crate::symbol::SymbolRef;

/// Expression operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    SignDiv,
    Mod,
    SignMod,
    Neg,
    Not,
    Or,
    And,
    Xor,
    Xnor,
    Nor,
    Shl,
    Shr,
    LOr,
    LAnd,
    LNot,
    LXor,
    LXnor,
    LNor,
    Lt,
    Gt,
    Eq,
    Le,
    Ge,
    Ne,
    Seg,
    Wrt,
    SegOff,
}

impl Op {
    /// Operators that level: associate left-to-right with any number of
    /// operands.
    pub fn is_associative(&self) -> bool {
        matches!(self, Op::Add | Op::Mul)
    }
}

bitflags! {
    /// Term type masks for `Expr::contains`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TermTypes: u32 {
        const INT = 1 << 0;
        const FLOAT = 1 << 1;
        const REG = 1 << 2;
        const SYM = 1 << 3;
        const LOC = 1 << 4;
        const SUBST = 1 << 5;
        const OP = 1 << 6;
    }
}

/// One term of an RPN expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TermKind {
    /// A cleared hole; removed by `Expr::cleanup`.
    None,
    Int(IntNum),
    Float(FloatNum),
    Reg(RegisterRef),
    Sym(SymbolRef),
    Loc(Location),
    /// Numbered placeholder filled in by `Expr::substitute`.
    Subst(u32),
    /// Operator with its child count.
    Op(Op, i32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprTerm {
    pub kind: TermKind,
    /// Distance from the virtual root; the root term has depth 0.
    pub depth: i32,
    pub source: Source,
}

impl ExprTerm {
    pub fn new(kind: TermKind, source: Source) -> Self {
        ExprTerm {
            kind,
            depth: 0,
            source,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, TermKind::None)
    }

    /// Clears to a hole; `Expr::cleanup` compacts these away.
    pub fn clear(&mut self) {
        self.kind = TermKind::None;
    }

    /// Replaces the term with integer zero at the same depth.
    pub fn zero(&mut self) {
        self.kind = TermKind::Int(IntNum::zero());
    }

    pub fn types(&self) -> TermTypes {
        match self.kind {
            TermKind::None => TermTypes::empty(),
            TermKind::Int(_) => TermTypes::INT,
            TermKind::Float(_) => TermTypes::FLOAT,
            TermKind::Reg(_) => TermTypes::REG,
            TermKind::Sym(_) => TermTypes::SYM,
            TermKind::Loc(_) => TermTypes::LOC,
            TermKind::Subst(_) => TermTypes::SUBST,
            TermKind::Op(..) => TermTypes::OP,
        }
    }

    pub fn is_type(&self, mask: TermTypes) -> bool {
        mask.intersects(self.types())
    }

    pub fn is_op(&self) -> bool {
        matches!(self.kind, TermKind::Op(..))
    }

    pub fn is_op_of(&self, op: Op) -> bool {
        matches!(self.kind, TermKind::Op(o, _) if o == op)
    }

    pub fn op(&self) -> Option<Op> {
        match self.kind {
            TermKind::Op(op, _) => Some(op),
            _ => None,
        }
    }

    pub fn set_op(&mut self, op: Op) {
        if let TermKind::Op(o, _) = &mut self.kind {
            *o = op;
        }
    }

    pub fn num_child(&self) -> i32 {
        match self.kind {
            TermKind::Op(_, n) => n,
            _ => 0,
        }
    }

    pub fn add_num_child(&mut self, delta: i32) {
        if let TermKind::Op(_, n) = &mut self.kind {
            *n += delta;
        }
    }

    pub fn get_int(&self) -> Option<&IntNum> {
        match &self.kind {
            TermKind::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_int_mut(&mut self) -> Option<&mut IntNum> {
        match &mut self.kind {
            TermKind::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_float(&self) -> Option<&FloatNum> {
        match &self.kind {
            TermKind::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_sym(&self) -> Option<SymbolRef> {
        match self.kind {
            TermKind::Sym(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_loc(&self) -> Option<Location> {
        match self.kind {
            TermKind::Loc(l) => Some(l),
            _ => None,
        }
    }

    pub fn get_reg(&self) -> Option<RegisterRef> {
        match self.kind {
            TermKind::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn get_subst(&self) -> Option<u32> {
        match self.kind {
            TermKind::Subst(i) => Some(i),
            _ => None,
        }
    }
}

/// An expression stored as an ordered sequence of terms in reverse
/// Polish notation: operator terms follow their operands, and an
/// operator's child count equals the number of immediate children one
/// depth level down. The last term is the root.
///
/// Infix `(a+b)*c` is stored as `[a@2, b@2, +@1, c@1, *@0]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expr {
    terms: Vec<ExprTerm>,
}

impl Expr {
    pub fn new() -> Self {
        Expr::default()
    }

    pub fn from_term(term: ExprTerm) -> Self {
        Expr { terms: vec![term] }
    }

    pub fn from_int(v: IntNum) -> Self {
        Expr::from_term(ExprTerm::new(TermKind::Int(v), Source::none()))
    }

    pub fn from_float(v: FloatNum) -> Self {
        Expr::from_term(ExprTerm::new(TermKind::Float(v), Source::none()))
    }

    pub fn from_sym(s: SymbolRef) -> Self {
        Expr::from_term(ExprTerm::new(TermKind::Sym(s), Source::none()))
    }

    pub fn from_loc(l: Location) -> Self {
        Expr::from_term(ExprTerm::new(TermKind::Loc(l), Source::none()))
    }

    pub fn from_reg(r: RegisterRef) -> Self {
        Expr::from_term(ExprTerm::new(TermKind::Reg(r), Source::none()))
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[ExprTerm] {
        &self.terms
    }

    pub fn terms_mut(&mut self) -> &mut Vec<ExprTerm> {
        &mut self.terms
    }

    /// Index of the root term, skipping trailing holes.
    pub fn root_pos(&self) -> Option<usize> {
        self.terms.iter().rposition(|t| !t.is_empty())
    }

    /// Appends a raw term. Low-level; the caller maintains depths.
    pub fn append(&mut self, term: ExprTerm) {
        self.terms.push(term);
    }

    /// Appends another expression's terms verbatim.
    pub fn append_expr(&mut self, e: &Expr) {
        self.terms.extend_from_slice(&e.terms);
    }

    /// Pushes every existing term one level down and appends a new root
    /// operator.
    pub fn append_op(&mut self, op: Op, nchild: i32, source: Source) {
        for t in &mut self.terms {
            t.depth += 1;
        }
        self.terms.push(ExprTerm {
            kind: TermKind::Op(op, nchild),
            depth: 0,
            source,
        });
    }

    /// Applies a binary operator between this expression and `rhs`
    /// (unary when `rhs` is `None`), producing a new root.
    pub fn calc(&mut self, op: Op, rhs: Option<&Expr>, source: Source) {
        match rhs {
            None => {
                if !self.is_empty() {
                    self.append_op(op, 1, source);
                }
            }
            Some(r) => {
                if r.is_empty() {
                    return;
                }
                let was_empty = self.is_empty();
                self.append_expr(r);
                if !was_empty {
                    self.append_op(op, 2, source);
                }
            }
        }
    }

    pub fn is_op(&self, op: Op) -> bool {
        self.root_pos()
            .is_some_and(|p| self.terms[p].is_op_of(op))
    }

    pub fn is_intnum(&self) -> bool {
        self.terms.len() == 1 && matches!(self.terms[0].kind, TermKind::Int(_))
    }

    pub fn is_float(&self) -> bool {
        self.terms.len() == 1 && matches!(self.terms[0].kind, TermKind::Float(_))
    }

    pub fn is_symbol(&self) -> bool {
        self.terms.len() == 1 && matches!(self.terms[0].kind, TermKind::Sym(_))
    }

    pub fn is_register(&self) -> bool {
        self.terms.len() == 1 && matches!(self.terms[0].kind, TermKind::Reg(_))
    }

    pub fn get_intnum(&self) -> Option<&IntNum> {
        if self.is_intnum() {
            self.terms[0].get_int()
        } else {
            None
        }
    }

    pub fn get_float(&self) -> Option<&FloatNum> {
        if self.is_float() {
            self.terms[0].get_float()
        } else {
            None
        }
    }

    pub fn get_symbol(&self) -> Option<SymbolRef> {
        if self.is_symbol() {
            self.terms[0].get_sym()
        } else {
            None
        }
    }

    pub fn get_register(&self) -> Option<RegisterRef> {
        if self.is_register() {
            self.terms[0].get_reg()
        } else {
            None
        }
    }

    /// Linear scan for any term matching the mask.
    pub fn contains(&self, mask: TermTypes) -> bool {
        self.terms.iter().any(|t| t.is_type(mask))
    }

    /// Replaces every `Subst(i)` with `terms[i]` (keeping the hole's
    /// depth). Returns false if an index is out of range.
    pub fn substitute(&mut self, subst: &[ExprTerm]) -> bool {
        for t in &mut self.terms {
            if let TermKind::Subst(i) = t.kind {
                match subst.get(i as usize) {
                    Some(replacement) => {
                        t.kind = replacement.kind.clone();
                    }
                    None => return false,
                }
            }
        }
        true
    }

    /// Immediate child indexes (left to right) of the operator at `pos`
    /// plus the start index of the operator's subtree.
    pub(crate) fn children_of(&self, pos: usize) -> (SmallVec<[usize; 4]>, usize) {
        let d = self.terms[pos].depth;
        let mut children: SmallVec<[usize; 4]> = SmallVec::new();
        let mut start = pos;
        let mut j = pos;
        while j > 0 {
            j -= 1;
            let t = &self.terms[j];
            if t.is_empty() {
                continue;
            }
            if t.depth <= d {
                break;
            }
            start = j;
            if t.depth == d + 1 {
                children.push(j);
            }
        }
        children.reverse();
        (children, start)
    }

    /// Recognizes a canonical `(-1 * x)` subtree at `pos`, where `x` is a
    /// symbol (or a location with `loc_ok`). Returns the indexes of the
    /// `x` term and the `-1` term.
    pub(crate) fn as_neg1_mul(&self, pos: usize, loc_ok: bool) -> Option<(usize, usize)> {
        if !self.terms[pos].is_op_of(Op::Mul) {
            return None;
        }
        let (children, _) = self.children_of(pos);
        if children.len() != 2 {
            return None;
        }
        let mut sym_idx = None;
        let mut neg1_idx = None;
        for &c in &children {
            match &self.terms[c].kind {
                TermKind::Int(v) if *v == IntNum::new(-1) => neg1_idx = Some(c),
                TermKind::Sym(_) => sym_idx = Some(c),
                TermKind::Loc(_) if loc_ok => sym_idx = Some(c),
                _ => return None,
            }
        }
        match (sym_idx, neg1_idx) {
            (Some(s), Some(n)) => Some((s, n)),
            _ => None,
        }
    }

    /// Splits at a top-level SEG:OFF, returning the segment expression
    /// and leaving the offset in place. `None` when the root is not a
    /// SEG:OFF operator.
    pub fn extract_seg_off(&mut self) -> Option<Expr> {
        let root = self.root_pos()?;
        if !self.terms[root].is_op_of(Op::SegOff) {
            return None;
        }
        self.extract_lhs_at(root)
    }

    /// Splits at a top-level WRT, returning the right-hand side and
    /// leaving the left-hand side in place.
    pub fn extract_wrt(&mut self) -> Option<Expr> {
        let root = self.root_pos()?;
        if !self.terms[root].is_op_of(Op::Wrt) {
            return None;
        }
        self.extract_rhs_at(root)
    }

    /// Finds a SEG:OFF operator at any depth, returning its segment
    /// portion and splicing the offset portion into its place.
    pub fn extract_deep_seg_off(&mut self) -> Option<Expr> {
        let pos = self
            .terms
            .iter()
            .position(|t| t.is_op_of(Op::SegOff))?;
        self.extract_lhs_at(pos)
    }

    /// Removes the binary operator at `pos` and its LHS subtree;
    /// returns the LHS rebased to a standalone expression, and splices
    /// the RHS up one level.
    fn extract_lhs_at(&mut self, pos: usize) -> Option<Expr> {
        let d = self.terms[pos].depth;
        let (children, start) = self.children_of(pos);
        if children.len() != 2 {
            return None;
        }
        let lhs_root = children[0];
        let mut lhs: Vec<ExprTerm> = self.terms[start..=lhs_root]
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect();
        for t in &mut lhs {
            t.depth -= d + 1;
        }
        for t in &mut self.terms[lhs_root + 1..pos] {
            if !t.is_empty() {
                t.depth -= 1;
            }
        }
        for t in &mut self.terms[start..=lhs_root] {
            t.clear();
        }
        self.terms[pos].clear();
        self.cleanup();
        Some(Expr { terms: lhs })
    }

    /// Removes the binary operator at `pos` and its RHS subtree;
    /// returns the RHS rebased to a standalone expression, and splices
    /// the LHS up one level.
    fn extract_rhs_at(&mut self, pos: usize) -> Option<Expr> {
        let d = self.terms[pos].depth;
        let (children, start) = self.children_of(pos);
        if children.len() != 2 {
            return None;
        }
        let lhs_root = children[0];
        let mut rhs: Vec<ExprTerm> = self.terms[lhs_root + 1..pos]
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect();
        for t in &mut rhs {
            t.depth -= d + 1;
        }
        for t in &mut self.terms[lhs_root + 1..pos] {
            t.clear();
        }
        for t in &mut self.terms[start..=lhs_root] {
            if !t.is_empty() {
                t.depth -= 1;
            }
        }
        self.terms[pos].clear();
        self.cleanup();
        Some(Expr { terms: rhs })
    }
}
