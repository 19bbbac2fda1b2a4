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

use std::cmp::Ordering;
use std::fmt;

/// Fit mode for [`IntNum::fits_in_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMode {
    Signed,
    Unsigned,
    /// True if the value fits under either interpretation.
    Either,
}

/// Arbitrary-precision signed integer with two's-complement semantics.
///
/// Values up to 128 bits live inline; anything wider spills to a
/// dynamically allocated little-endian limb vector. The limb form is kept
/// normalized (minimal limbs, sign in the top limb's MSB), so equality can
/// compare representations directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntNum {
    repr: Repr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Repr {
    Small(i128),
    /// Two's-complement little-endian limbs, more than two of them.
    Big(Vec<u64>),
}

impl IntNum {
    pub fn new(v: i64) -> Self {
        IntNum {
            repr: Repr::Small(v as i128),
        }
    }

    pub fn zero() -> Self {
        IntNum::new(0)
    }

    pub fn from_i128(v: i128) -> Self {
        IntNum {
            repr: Repr::Small(v),
        }
    }

    pub fn from_u64(v: u64) -> Self {
        IntNum {
            repr: Repr::Small(v as i128),
        }
    }

    /// Builds a value from a two's-complement bit pattern `nbits` wide.
    /// With `signed` the pattern is sign-extended from bit `nbits - 1`,
    /// otherwise zero-extended.
    pub fn from_bits(limbs: &[u64], nbits: u32, signed: bool) -> Self {
        if nbits == 0 {
            return IntNum::zero();
        }
        let nlimbs = ((nbits as usize) + 63) / 64;
        let mut v: Vec<u64> = (0..nlimbs)
            .map(|i| limbs.get(i).copied().unwrap_or(0))
            .collect();
        let top_bits = nbits as usize - (nlimbs - 1) * 64;
        let sign_bit = (v[nlimbs - 1] >> (top_bits - 1)) & 1 != 0;
        if top_bits < 64 {
            let mask = (1u64 << top_bits) - 1;
            if signed && sign_bit {
                v[nlimbs - 1] |= !mask;
            } else {
                v[nlimbs - 1] &= mask;
            }
        }
        if !(signed && sign_bit) && v[nlimbs - 1] >> 63 != 0 {
            v.push(0);
        }
        IntNum::from_limbs_2c(v)
    }

    /// Normalizes a two's-complement limb vector into the canonical repr.
    pub(crate) fn from_limbs_2c(mut limbs: Vec<u64>) -> Self {
        if limbs.is_empty() {
            return IntNum::zero();
        }
        // Trim limbs that are pure sign extension.
        loop {
            let n = limbs.len();
            if n <= 2 {
                break;
            }
            let top = limbs[n - 1];
            let below_msb = limbs[n - 2] >> 63;
            if (top == 0 && below_msb == 0) || (top == u64::MAX && below_msb == 1) {
                limbs.pop();
            } else {
                break;
            }
        }
        if limbs.len() <= 2 {
            let lo = limbs[0];
            let hi = if limbs.len() == 2 {
                limbs[1]
            } else if lo >> 63 != 0 {
                u64::MAX
            } else {
                0
            };
            let v = (((hi as u128) << 64) | lo as u128) as i128;
            IntNum {
                repr: Repr::Small(v),
            }
        } else {
            IntNum {
                repr: Repr::Big(limbs),
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self.repr, Repr::Small(0))
    }

    pub fn is_negative(&self) -> bool {
        match &self.repr {
            Repr::Small(v) => *v < 0,
            Repr::Big(l) => l[l.len() - 1] >> 63 != 0,
        }
    }

    /// -1, 0 or 1.
    pub fn sign(&self) -> i32 {
        if self.is_zero() {
            0
        } else if self.is_negative() {
            -1
        } else {
            1
        }
    }

    fn limb_len(&self) -> usize {
        match &self.repr {
            Repr::Small(_) => 2,
            Repr::Big(l) => l.len(),
        }
    }

    /// Limb of the infinite sign-extended two's-complement pattern.
    fn limb_at(&self, i: usize) -> u64 {
        match &self.repr {
            Repr::Small(v) => {
                if i == 0 {
                    *v as u64
                } else if i == 1 {
                    (*v >> 64) as u64
                } else if *v < 0 {
                    u64::MAX
                } else {
                    0
                }
            }
            Repr::Big(l) => {
                if i < l.len() {
                    l[i]
                } else if self.is_negative() {
                    u64::MAX
                } else {
                    0
                }
            }
        }
    }

    /// Sign-extended two's-complement pattern, `n` limbs wide.
    fn limbs_2c(&self, n: usize) -> Vec<u64> {
        (0..n).map(|i| self.limb_at(i)).collect()
    }

    /// Unsigned magnitude, little-endian, no leading zero limbs
    /// (empty for zero).
    fn magnitude(&self) -> Vec<u64> {
        let mut l = self.limbs_2c(self.limb_len());
        if self.is_negative() {
            negate_2c(&mut l);
        }
        while l.last() == Some(&0) {
            l.pop();
        }
        l
    }

    fn from_magnitude(mut mag: Vec<u64>, negative: bool) -> Self {
        while mag.last() == Some(&0) {
            mag.pop();
        }
        if mag.is_empty() {
            return IntNum::zero();
        }
        // Room for the sign bit.
        mag.push(0);
        if negative {
            negate_2c(&mut mag);
        }
        IntNum::from_limbs_2c(mag)
    }

    pub fn add(&self, rhs: &IntNum) -> IntNum {
        if let (Repr::Small(a), Repr::Small(b)) = (&self.repr, &rhs.repr) {
            if let Some(s) = a.checked_add(*b) {
                return IntNum::from_i128(s);
            }
        }
        let n = self.limb_len().max(rhs.limb_len()) + 1;
        let la = self.limbs_2c(n);
        let lb = rhs.limbs_2c(n);
        let mut out = Vec::with_capacity(n);
        let mut carry = 0u64;
        for i in 0..n {
            let (s1, c1) = la[i].overflowing_add(lb[i]);
            let (s2, c2) = s1.overflowing_add(carry);
            out.push(s2);
            carry = (c1 as u64) + (c2 as u64);
        }
        IntNum::from_limbs_2c(out)
    }

    pub fn sub(&self, rhs: &IntNum) -> IntNum {
        if let (Repr::Small(a), Repr::Small(b)) = (&self.repr, &rhs.repr) {
            if let Some(s) = a.checked_sub(*b) {
                return IntNum::from_i128(s);
            }
        }
        let n = self.limb_len().max(rhs.limb_len()) + 1;
        let la = self.limbs_2c(n);
        let lb = rhs.limbs_2c(n);
        let mut out = Vec::with_capacity(n);
        let mut carry = 1u64; // two's complement: a + !b + 1
        for i in 0..n {
            let (s1, c1) = la[i].overflowing_add(!lb[i]);
            let (s2, c2) = s1.overflowing_add(carry);
            out.push(s2);
            carry = (c1 as u64) + (c2 as u64);
        }
        IntNum::from_limbs_2c(out)
    }

    pub fn negate(&self) -> IntNum {
        IntNum::zero().sub(self)
    }

    pub fn abs(&self) -> IntNum {
        if self.is_negative() {
            self.negate()
        } else {
            self.clone()
        }
    }

    pub fn mul(&self, rhs: &IntNum) -> IntNum {
        if let (Repr::Small(a), Repr::Small(b)) = (&self.repr, &rhs.repr) {
            if let Some(p) = a.checked_mul(*b) {
                return IntNum::from_i128(p);
            }
        }
        let negative = self.is_negative() != rhs.is_negative();
        let mag = mul_mag(&self.magnitude(), &rhs.magnitude());
        IntNum::from_magnitude(mag, negative)
    }

    /// Truncating signed division. `None` on division by zero.
    pub fn checked_div(&self, rhs: &IntNum) -> Option<IntNum> {
        self.checked_div_rem(rhs).map(|(q, _)| q)
    }

    /// Signed remainder (sign follows the dividend). `None` on division
    /// by zero.
    pub fn checked_rem(&self, rhs: &IntNum) -> Option<IntNum> {
        self.checked_div_rem(rhs).map(|(_, r)| r)
    }

    fn checked_div_rem(&self, rhs: &IntNum) -> Option<(IntNum, IntNum)> {
        if rhs.is_zero() {
            return None;
        }
        if let (Repr::Small(a), Repr::Small(b)) = (&self.repr, &rhs.repr) {
            if let (Some(q), Some(r)) = (a.checked_div(*b), a.checked_rem(*b)) {
                return Some((IntNum::from_i128(q), IntNum::from_i128(r)));
            }
        }
        let (qm, rm) = div_rem_mag(&self.magnitude(), &rhs.magnitude());
        let q_neg = self.is_negative() != rhs.is_negative();
        Some((
            IntNum::from_magnitude(qm, q_neg),
            IntNum::from_magnitude(rm, self.is_negative()),
        ))
    }

    /// Unsigned division. Negative operands are divided by magnitude.
    pub fn checked_udiv(&self, rhs: &IntNum) -> Option<IntNum> {
        if rhs.is_zero() {
            return None;
        }
        let (q, _) = div_rem_mag(&self.magnitude(), &rhs.magnitude());
        Some(IntNum::from_magnitude(q, false))
    }

    pub fn checked_urem(&self, rhs: &IntNum) -> Option<IntNum> {
        if rhs.is_zero() {
            return None;
        }
        let (_, r) = div_rem_mag(&self.magnitude(), &rhs.magnitude());
        Some(IntNum::from_magnitude(r, false))
    }

    fn bitwise(&self, rhs: &IntNum, f: impl Fn(u64, u64) -> u64) -> IntNum {
        let n = self.limb_len().max(rhs.limb_len());
        let out = (0..n).map(|i| f(self.limb_at(i), rhs.limb_at(i))).collect();
        IntNum::from_limbs_2c(out)
    }

    pub fn bit_and(&self, rhs: &IntNum) -> IntNum {
        self.bitwise(rhs, |a, b| a & b)
    }

    pub fn bit_or(&self, rhs: &IntNum) -> IntNum {
        self.bitwise(rhs, |a, b| a | b)
    }

    pub fn bit_xor(&self, rhs: &IntNum) -> IntNum {
        self.bitwise(rhs, |a, b| a ^ b)
    }

    pub fn bit_not(&self) -> IntNum {
        let out = (0..self.limb_len()).map(|i| !self.limb_at(i)).collect();
        IntNum::from_limbs_2c(out)
    }

    pub fn shl(&self, n: u32) -> IntNum {
        if let Repr::Small(v) = &self.repr {
            if n < 127 {
                let shifted = v.wrapping_shl(n);
                if shifted >> n == *v {
                    return IntNum::from_i128(shifted);
                }
            }
        }
        let limb_shift = (n / 64) as usize;
        let bit_shift = n % 64;
        let src = self.limbs_2c(self.limb_len() + 2);
        let mut out = vec![0u64; src.len() + limb_shift];
        for (i, &limb) in src.iter().enumerate() {
            let pos = i + limb_shift;
            if bit_shift == 0 {
                out[pos] = limb;
            } else {
                out[pos] |= limb << bit_shift;
                if pos + 1 < out.len() {
                    out[pos + 1] |= limb >> (64 - bit_shift);
                }
            }
        }
        IntNum::from_limbs_2c(out)
    }

    /// Arithmetic right shift (sign-filling).
    pub fn ashr(&self, n: u32) -> IntNum {
        if let Repr::Small(v) = &self.repr {
            return IntNum::from_i128(v >> n.min(127));
        }
        let limb_shift = (n / 64) as usize;
        let bit_shift = n % 64;
        let len = self.limb_len();
        if limb_shift >= len {
            return IntNum::new(if self.is_negative() { -1 } else { 0 });
        }
        let src = self.limbs_2c(len);
        let sign_fill = if self.is_negative() { u64::MAX } else { 0 };
        let mut out = Vec::with_capacity(len - limb_shift);
        for i in limb_shift..len {
            let mut limb = src[i] >> bit_shift;
            let next = if i + 1 < len { src[i + 1] } else { sign_fill };
            if bit_shift > 0 {
                limb |= next << (64 - bit_shift);
            }
            out.push(limb);
        }
        IntNum::from_limbs_2c(out)
    }

    /// Logical right shift over the 128-bit window for inline values;
    /// negative wide values fall back to the arithmetic shift.
    pub fn lshr(&self, n: u32) -> IntNum {
        match &self.repr {
            Repr::Small(v) => {
                if n >= 128 {
                    IntNum::zero()
                } else {
                    IntNum::from_i128(((*v as u128) >> n) as i128)
                }
            }
            Repr::Big(_) => self.ashr(n),
        }
    }

    /// Number of bits needed to represent the value as unsigned.
    /// Meaningful only for non-negative values; a negative value reports
    /// the width of its minimal signed pattern.
    pub fn active_bits(&self) -> u32 {
        if self.is_negative() {
            return self.min_signed_bits();
        }
        match &self.repr {
            Repr::Small(v) => 128 - v.leading_zeros(),
            Repr::Big(l) => {
                let mut top = l.len();
                while top > 0 && l[top - 1] == 0 {
                    top -= 1;
                }
                if top == 0 {
                    0
                } else {
                    (top as u32 - 1) * 64 + (64 - l[top - 1].leading_zeros())
                }
            }
        }
    }

    /// Number of bits needed to represent the value as signed
    /// (including the sign bit).
    pub fn min_signed_bits(&self) -> u32 {
        if self.is_zero() {
            return 1;
        }
        if self.is_negative() {
            self.bit_not().active_bits() + 1
        } else {
            self.active_bits() + 1
        }
    }

    /// Trailing zero bits; `u32::MAX` for zero.
    pub fn trailing_zeros(&self) -> u32 {
        if self.is_zero() {
            return u32::MAX;
        }
        match &self.repr {
            Repr::Small(v) => v.trailing_zeros(),
            Repr::Big(l) => {
                let mut total = 0;
                for limb in l {
                    if *limb == 0 {
                        total += 64;
                    } else {
                        return total + limb.trailing_zeros();
                    }
                }
                total
            }
        }
    }

    /// True iff `value >> rshift` is representable in `size` bits under
    /// the given interpretation.
    pub fn fits_in_size(&self, size: u32, rshift: u32, mode: SizeMode) -> bool {
        let shifted = if rshift > 0 { self.ashr(rshift) } else { self.clone() };
        let signed_ok = shifted.min_signed_bits() <= size;
        let unsigned_ok = !shifted.is_negative() && shifted.active_bits() <= size;
        match mode {
            SizeMode::Signed => signed_ok,
            SizeMode::Unsigned => unsigned_ok,
            SizeMode::Either => signed_ok || unsigned_ok,
        }
    }

    /// Extracts up to 64 bits of the sign-extended two's-complement
    /// pattern starting at bit `lsb`.
    pub fn extract_bits(&self, lsb: u32, width: u32) -> u64 {
        debug_assert!(width >= 1 && width <= 64);
        let limb = (lsb / 64) as usize;
        let off = lsb % 64;
        let mut v = self.limb_at(limb) >> off;
        if off + width > 64 {
            v |= self.limb_at(limb + 1) << (64 - off);
        }
        if width == 64 { v } else { v & ((1u64 << width) - 1) }
    }

    pub fn get_i64(&self) -> Option<i64> {
        match &self.repr {
            Repr::Small(v) => i64::try_from(*v).ok(),
            Repr::Big(_) => None,
        }
    }

    pub fn get_u64(&self) -> Option<u64> {
        match &self.repr {
            Repr::Small(v) => u64::try_from(*v).ok(),
            Repr::Big(_) => None,
        }
    }

    /// The value clamped to the i64 range; used where a span length
    /// merely needs "far out of threshold".
    pub fn as_i64_saturating(&self) -> i64 {
        match &self.repr {
            Repr::Small(v) => (*v).clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            Repr::Big(_) => {
                if self.is_negative() {
                    i64::MIN
                } else {
                    i64::MAX
                }
            }
        }
    }

    /// Two's-complement little-endian field, truncated or sign-extended
    /// to `nbytes`.
    pub fn to_le_bytes_sized(&self, nbytes: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(nbytes);
        for i in 0..nbytes {
            let limb = self.limb_at(i / 8);
            out.push((limb >> ((i % 8) * 8)) as u8);
        }
        out
    }

    pub fn to_be_bytes_sized(&self, nbytes: usize) -> Vec<u8> {
        let mut out = self.to_le_bytes_sized(nbytes);
        out.reverse();
        out
    }
}

impl Default for IntNum {
    fn default() -> Self {
        IntNum::zero()
    }
}

impl From<i64> for IntNum {
    fn from(v: i64) -> Self {
        IntNum::new(v)
    }
}

impl From<i32> for IntNum {
    fn from(v: i32) -> Self {
        IntNum::new(v as i64)
    }
}

impl From<u64> for IntNum {
    fn from(v: u64) -> Self {
        IntNum::from_u64(v)
    }
}

impl PartialOrd for IntNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntNum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (false, true) => return Ordering::Greater,
            (true, false) => return Ordering::Less,
            _ => {}
        }
        let n = self.limb_len().max(other.limb_len());
        for i in (0..n).rev() {
            // Unsigned limb compare is order-preserving at fixed width
            // when both operands have the same sign.
            match self.limb_at(i).cmp(&other.limb_at(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for IntNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Small(v) => write!(f, "{}", v),
            Repr::Big(l) => {
                // Wide values render as a hex pattern.
                write!(f, "0x")?;
                for limb in l.iter().rev() {
                    write!(f, "{:016x}", limb)?;
                }
                Ok(())
            }
        }
    }
}

fn negate_2c(limbs: &mut [u64]) {
    let mut carry = 1u64;
    for limb in limbs.iter_mut() {
        let (v, c) = (!*limb).overflowing_add(carry);
        *limb = v;
        carry = c as u64;
    }
}

fn mul_mag(a: &[u64], b: &[u64]) -> Vec<u64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0u64; a.len() + b.len()];
    for (i, &ai) in a.iter().enumerate() {
        let mut carry = 0u128;
        for (j, &bj) in b.iter().enumerate() {
            let t = (ai as u128) * (bj as u128) + out[i + j] as u128 + carry;
            out[i + j] = t as u64;
            carry = t >> 64;
        }
        let mut k = i + b.len();
        while carry > 0 {
            let t = out[k] as u128 + carry;
            out[k] = t as u64;
            carry = t >> 64;
            k += 1;
        }
    }
    out
}

fn cmp_mag(a: &[u64], b: &[u64]) -> Ordering {
    let alen = a.iter().rposition(|&l| l != 0).map_or(0, |p| p + 1);
    let blen = b.iter().rposition(|&l| l != 0).map_or(0, |p| p + 1);
    if alen != blen {
        return alen.cmp(&blen);
    }
    for i in (0..alen).rev() {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}

fn sub_mag_in_place(a: &mut [u64], b: &[u64]) {
    let mut borrow = 0u64;
    for i in 0..a.len() {
        let bi = b.get(i).copied().unwrap_or(0);
        let (v1, c1) = a[i].overflowing_sub(bi);
        let (v2, c2) = v1.overflowing_sub(borrow);
        a[i] = v2;
        borrow = (c1 as u64) + (c2 as u64);
    }
    debug_assert_eq!(borrow, 0, "magnitude subtraction underflow");
}

/// Shift-subtract long division of magnitudes. The divisor must be
/// nonzero. Slow but simple; division is rare in assembly expressions.
fn div_rem_mag(dividend: &[u64], divisor: &[u64]) -> (Vec<u64>, Vec<u64>) {
    debug_assert!(divisor.iter().any(|&l| l != 0));
    if cmp_mag(dividend, divisor) == Ordering::Less {
        return (Vec::new(), dividend.to_vec());
    }
    // Single-limb divisor runs per-limb.
    let dlen = divisor.iter().rposition(|&l| l != 0).unwrap() + 1;
    if dlen == 1 {
        let d = divisor[0] as u128;
        let mut q = vec![0u64; dividend.len()];
        let mut rem = 0u128;
        for i in (0..dividend.len()).rev() {
            let cur = (rem << 64) | dividend[i] as u128;
            q[i] = (cur / d) as u64;
            rem = cur % d;
        }
        return (q, vec![rem as u64]);
    }

    let total_bits = dividend.len() * 64;
    let mut q = vec![0u64; dividend.len()];
    let mut rem = vec![0u64; dlen + 1];
    for bit in (0..total_bits).rev() {
        // rem = (rem << 1) | dividend[bit]
        let mut carry = (dividend[bit / 64] >> (bit % 64)) & 1;
        for limb in rem.iter_mut() {
            let next = *limb >> 63;
            *limb = (*limb << 1) | carry;
            carry = next;
        }
        if cmp_mag(&rem, divisor) != Ordering::Less {
            sub_mag_in_place(&mut rem, divisor);
            q[bit / 64] |= 1 << (bit % 64);
        }
    }
    (q, rem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(shift: u32) -> IntNum {
        IntNum::new(1).shl(shift)
    }

    #[test]
    fn test_small_arithmetic() {
        let a = IntNum::new(100);
        let b = IntNum::new(-7);
        assert_eq!(a.add(&b), IntNum::new(93));
        assert_eq!(a.sub(&b), IntNum::new(107));
        assert_eq!(a.mul(&b), IntNum::new(-700));
        assert_eq!(a.checked_div(&b), Some(IntNum::new(-14)));
        assert_eq!(a.checked_rem(&b), Some(IntNum::new(2)));
        assert_eq!(a.checked_div(&IntNum::zero()), None);
    }

    #[test]
    fn test_negate_and_abs() {
        assert_eq!(IntNum::new(-5).negate(), IntNum::new(5));
        assert_eq!(IntNum::new(-5).abs(), IntNum::new(5));
        assert_eq!(IntNum::from_i128(i128::MIN).negate().sign(), 1);
    }

    #[test]
    fn test_promotion_past_128_bits() {
        let v = big(200);
        assert_eq!(v.active_bits(), 201);
        assert_eq!(v.ashr(200), IntNum::new(1));
        assert!(v.sub(&v).is_zero());

        let sum = v.add(&v);
        assert_eq!(sum, big(201));
    }

    #[test]
    fn test_big_multiplication_and_division() {
        let a = big(100).add(&IntNum::new(3));
        let b = big(90).sub(&IntNum::new(1));
        let p = a.mul(&b);
        let (q, r) = (
            p.checked_div(&b).unwrap(),
            p.checked_rem(&b).unwrap(),
        );
        assert_eq!(q, a);
        assert!(r.is_zero());
    }

    #[test]
    fn test_division_signs() {
        assert_eq!(
            IntNum::new(-7).checked_div(&IntNum::new(2)),
            Some(IntNum::new(-3))
        );
        assert_eq!(
            IntNum::new(-7).checked_rem(&IntNum::new(2)),
            Some(IntNum::new(-1))
        );
        assert_eq!(
            IntNum::new(7).checked_udiv(&IntNum::new(2)),
            Some(IntNum::new(3))
        );
    }

    #[test]
    fn test_bitwise() {
        let a = IntNum::new(0b1100);
        let b = IntNum::new(0b1010);
        assert_eq!(a.bit_and(&b), IntNum::new(0b1000));
        assert_eq!(a.bit_or(&b), IntNum::new(0b1110));
        assert_eq!(a.bit_xor(&b), IntNum::new(0b0110));
        assert_eq!(a.bit_not(), IntNum::new(-13));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(IntNum::new(1).shl(4), IntNum::new(16));
        assert_eq!(IntNum::new(-16).ashr(2), IntNum::new(-4));
        assert_eq!(IntNum::new(16).lshr(2), IntNum::new(4));
        assert_eq!(big(300).ashr(299), IntNum::new(2));
    }

    #[test]
    fn test_fits_in_size_boundaries() {
        // Signed n-bit range.
        assert!(IntNum::new(127).fits_in_size(8, 0, SizeMode::Signed));
        assert!(!IntNum::new(128).fits_in_size(8, 0, SizeMode::Signed));
        assert!(IntNum::new(-128).fits_in_size(8, 0, SizeMode::Signed));
        assert!(!IntNum::new(-129).fits_in_size(8, 0, SizeMode::Signed));
        // Unsigned n-bit range.
        assert!(IntNum::new(255).fits_in_size(8, 0, SizeMode::Unsigned));
        assert!(!IntNum::new(256).fits_in_size(8, 0, SizeMode::Unsigned));
        assert!(!IntNum::new(-1).fits_in_size(8, 0, SizeMode::Unsigned));
        // Either accepts both interpretations.
        assert!(IntNum::new(255).fits_in_size(8, 0, SizeMode::Either));
        assert!(IntNum::new(-128).fits_in_size(8, 0, SizeMode::Either));
        assert!(!IntNum::new(256).fits_in_size(8, 0, SizeMode::Either));
    }

    #[test]
    fn test_fits_in_size_rshift() {
        // 0x400 >> 4 = 0x40 fits in 8 unsigned bits.
        assert!(IntNum::new(0x400).fits_in_size(8, 4, SizeMode::Unsigned));
        assert!(!IntNum::new(0x4000).fits_in_size(8, 4, SizeMode::Unsigned));
    }

    #[test]
    fn test_trailing_zeros() {
        assert_eq!(IntNum::new(8).trailing_zeros(), 3);
        assert_eq!(IntNum::new(-8).trailing_zeros(), 3);
        assert_eq!(IntNum::zero().trailing_zeros(), u32::MAX);
        assert_eq!(big(190).trailing_zeros(), 190);
    }

    #[test]
    fn test_min_signed_bits() {
        assert_eq!(IntNum::zero().min_signed_bits(), 1);
        assert_eq!(IntNum::new(-1).min_signed_bits(), 1);
        assert_eq!(IntNum::new(127).min_signed_bits(), 8);
        assert_eq!(IntNum::new(-128).min_signed_bits(), 8);
        assert_eq!(IntNum::new(128).min_signed_bits(), 9);
    }

    #[test]
    fn test_extract_bits() {
        let v = IntNum::new(0x1234_5678);
        assert_eq!(v.extract_bits(0, 8), 0x78);
        assert_eq!(v.extract_bits(8, 16), 0x3456);
        let w = big(70);
        assert_eq!(w.extract_bits(64, 8), 0x40);
    }

    #[test]
    fn test_sized_byte_fields() {
        let v = IntNum::new(0x1234);
        assert_eq!(v.to_le_bytes_sized(4), vec![0x34, 0x12, 0, 0]);
        assert_eq!(v.to_be_bytes_sized(2), vec![0x12, 0x34]);
        // Truncation keeps the low bytes.
        assert_eq!(IntNum::new(0x12345).to_le_bytes_sized(2), vec![0x45, 0x23]);
        // Negative values sign-extend.
        assert_eq!(IntNum::new(-2).to_le_bytes_sized(2), vec![0xFE, 0xFF]);
    }

    #[test]
    fn test_ordering() {
        assert!(IntNum::new(-3) < IntNum::new(2));
        assert!(big(129) > big(128));
        assert!(big(129).negate() < big(128).negate());
    }
}
