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

use crate::intnum::IntNum;

/// IEEE status reported by a format conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloatStatus {
    pub overflow: bool,
    pub underflow: bool,
    pub inexact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Zero,
    Normal,
    Infinite,
    NaN,
}

/// A floating point constant held in the widest semantics the assembler
/// emits (x87 80-bit extended: 64-bit significand with explicit integer
/// bit). Narrower output formats are produced by `to_bits` with
/// round-to-nearest-ties-to-even.
///
/// For a `Normal` value the significand is normalized with bit 63 set and
/// the value is `(-1)^sign * sig * 2^(exp - 63)`.
#[derive(Debug, Clone, Copy)]
pub struct FloatNum {
    sign: bool,
    exp: i32,
    sig: u64,
    class: Class,
}

struct Format {
    exp_bits: u32,
    frac_bits: u32,
    bias: i32,
    /// x87 extended keeps the integer bit explicit.
    explicit_int: bool,
}

fn format_for_size(size: u32) -> Option<Format> {
    match size {
        16 => Some(Format {
            exp_bits: 5,
            frac_bits: 10,
            bias: 15,
            explicit_int: false,
        }),
        32 => Some(Format {
            exp_bits: 8,
            frac_bits: 23,
            bias: 127,
            explicit_int: false,
        }),
        64 => Some(Format {
            exp_bits: 11,
            frac_bits: 52,
            bias: 1023,
            explicit_int: false,
        }),
        80 => Some(Format {
            exp_bits: 15,
            frac_bits: 63,
            bias: 16383,
            explicit_int: true,
        }),
        _ => None,
    }
}

impl FloatNum {
    pub fn zero(sign: bool) -> Self {
        FloatNum {
            sign,
            exp: 0,
            sig: 0,
            class: Class::Zero,
        }
    }

    pub fn from_f64(v: f64) -> Self {
        let bits = v.to_bits();
        let sign = bits >> 63 != 0;
        let biased = ((bits >> 52) & 0x7FF) as i32;
        let frac = bits & ((1u64 << 52) - 1);
        if biased == 0x7FF {
            return FloatNum {
                sign,
                exp: 0,
                sig: frac,
                class: if frac == 0 { Class::Infinite } else { Class::NaN },
            };
        }
        if biased == 0 {
            if frac == 0 {
                return FloatNum::zero(sign);
            }
            // Subnormal: value = frac * 2^-1074.
            let b = 64 - frac.leading_zeros();
            return FloatNum {
                sign,
                exp: b as i32 - 1075,
                sig: frac << (64 - b),
                class: Class::Normal,
            };
        }
        FloatNum {
            sign,
            exp: biased - 1023,
            sig: (frac | (1u64 << 52)) << 11,
            class: Class::Normal,
        }
    }

    /// Converts an integer, exactly when it fits in 64 significand bits
    /// and with round-to-nearest-even otherwise.
    pub fn from_intnum(v: &IntNum) -> Self {
        if v.is_zero() {
            return FloatNum::zero(false);
        }
        let neg = v.is_negative();
        let mag = v.abs();
        let bits = mag.active_bits();
        if bits <= 64 {
            let sig = mag.extract_bits(0, 64) << (64 - bits);
            return FloatNum {
                sign: neg,
                exp: bits as i32 - 1,
                sig,
                class: Class::Normal,
            };
        }
        let mut sig = mag.extract_bits(bits - 64, 64);
        let mut exp = bits as i32 - 1;
        let round = mag.extract_bits(bits - 65, 1) != 0;
        let sticky = mag.trailing_zeros() < bits - 65;
        if round && (sticky || sig & 1 == 1) {
            let (s, carry) = sig.overflowing_add(1);
            if carry {
                sig = 1u64 << 63;
                exp += 1;
            } else {
                sig = s;
            }
        }
        FloatNum {
            sign: neg,
            exp,
            sig,
            class: Class::Normal,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.class == Class::Zero
    }

    pub fn is_negative(&self) -> bool {
        self.sign
    }

    pub fn negate(&self) -> FloatNum {
        let mut out = *self;
        out.sign = !out.sign;
        out
    }

    pub fn add(&self, rhs: &FloatNum) -> FloatNum {
        match (self.class, rhs.class) {
            (Class::NaN, _) | (_, Class::NaN) => return nan(),
            (Class::Infinite, Class::Infinite) => {
                return if self.sign == rhs.sign { *self } else { nan() };
            }
            (Class::Infinite, _) => return *self,
            (_, Class::Infinite) => return *rhs,
            (Class::Zero, Class::Zero) => {
                return FloatNum::zero(self.sign && rhs.sign);
            }
            (Class::Zero, _) => return *rhs,
            (_, Class::Zero) => return *self,
            (Class::Normal, Class::Normal) => {}
        }

        // Order so `a` has the larger magnitude exponent.
        let (a, b) = if self.exp > rhs.exp
            || (self.exp == rhs.exp && self.sig >= rhs.sig)
        {
            (self, rhs)
        } else {
            (rhs, self)
        };
        let diff = (a.exp - b.exp) as u32;

        // Work with 2 guard bits; collect shifted-out bits as sticky.
        let a_sig = (a.sig as u128) << 2;
        let (b_sig, sticky) = if diff == 0 {
            ((b.sig as u128) << 2, false)
        } else if diff >= 66 {
            (0u128, true)
        } else {
            let full = (b.sig as u128) << 2;
            let kept = full >> diff;
            (kept, kept << diff != full)
        };

        let mut exp = a.exp;
        let mut sig128;
        let sign;
        if a.sign == b.sign {
            sign = a.sign;
            sig128 = a_sig + b_sig;
            if sig128 >> 66 != 0 {
                let lost = sig128 & 1 != 0;
                sig128 >>= 1;
                if lost {
                    sig128 |= 1;
                }
                exp += 1;
            }
        } else {
            sign = a.sign;
            // Subtraction cannot borrow past zero: |a| >= |b|.
            sig128 = a_sig - b_sig;
            if sticky {
                // The sticky borrow is below the guard bits; fold it in
                // conservatively as an odd low bit.
                sig128 = sig128.wrapping_sub(1) | 1;
            }
            if sig128 == 0 {
                return FloatNum::zero(false);
            }
            while sig128 >> 65 == 0 {
                sig128 <<= 1;
                exp -= 1;
            }
        }
        round_pack(sign, exp, sig128, sticky)
    }

    pub fn sub(&self, rhs: &FloatNum) -> FloatNum {
        self.add(&rhs.negate())
    }

    pub fn mul(&self, rhs: &FloatNum) -> FloatNum {
        let sign = self.sign != rhs.sign;
        match (self.class, rhs.class) {
            (Class::NaN, _) | (_, Class::NaN) => return nan(),
            (Class::Infinite, Class::Zero) | (Class::Zero, Class::Infinite) => {
                return nan();
            }
            (Class::Infinite, _) | (_, Class::Infinite) => {
                return FloatNum {
                    sign,
                    exp: 0,
                    sig: 0,
                    class: Class::Infinite,
                };
            }
            (Class::Zero, _) | (_, Class::Zero) => return FloatNum::zero(sign),
            (Class::Normal, Class::Normal) => {}
        }
        let p = (self.sig as u128) * (rhs.sig as u128);
        // p is in [2^126, 2^128). Keep 66 bits for rounding.
        let (sig128, exp) = if p >> 127 != 0 {
            (p >> 62, self.exp + rhs.exp + 1)
        } else {
            (p >> 61, self.exp + rhs.exp)
        };
        let shift = if p >> 127 != 0 { 62 } else { 61 };
        let sticky = (sig128 << shift) != p;
        round_pack(sign, exp, sig128, sticky)
    }

    pub fn div(&self, rhs: &FloatNum) -> FloatNum {
        let sign = self.sign != rhs.sign;
        match (self.class, rhs.class) {
            (Class::NaN, _) | (_, Class::NaN) => return nan(),
            (Class::Infinite, Class::Infinite) | (Class::Zero, Class::Zero) => {
                return nan();
            }
            (Class::Infinite, _) => {
                return FloatNum {
                    sign,
                    exp: 0,
                    sig: 0,
                    class: Class::Infinite,
                };
            }
            (_, Class::Infinite) => return FloatNum::zero(sign),
            (Class::Zero, _) => return FloatNum::zero(sign),
            (_, Class::Zero) => {
                // x/0: return infinity (the expression layer rejects
                // integer division by zero separately).
                return FloatNum {
                    sign,
                    exp: 0,
                    sig: 0,
                    class: Class::Infinite,
                };
            }
            (Class::Normal, Class::Normal) => {}
        }
        let numer = (self.sig as u128) << 64;
        let q = numer / rhs.sig as u128;
        let r = numer % rhs.sig as u128;
        // q is in (2^63, 2^65).
        if q >> 64 != 0 {
            // 65 significant bits; 1 spare for the round bit.
            let sig128 = q << 1;
            round_pack(sign, self.exp - rhs.exp, sig128, r != 0)
        } else {
            // 64 bits; generate two more quotient bits for rounding.
            let numer2 = r << 2;
            let q2 = numer2 / rhs.sig as u128;
            let r2 = numer2 % rhs.sig as u128;
            let sig128 = (q << 2) | q2;
            round_pack(sign, self.exp - rhs.exp - 1, sig128, r2 != 0)
        }
    }

    /// Converts with round-to-nearest-ties-even into the IEEE encoding for
    /// `size` bits (16/32/64/80) and bit-casts the result to an integer.
    /// Returns `None` for an unsupported size.
    pub fn to_bits(&self, size: u32) -> Option<(IntNum, FloatStatus)> {
        let fmt = format_for_size(size)?;
        let mut status = FloatStatus::default();
        let emax = (1i32 << (fmt.exp_bits - 1)) - 1;
        let emin = 1 - emax;
        let max_biased = (1u64 << fmt.exp_bits) - 1;

        let (biased_exp, frac): (u64, u64) = match self.class {
            Class::Zero => (0, 0),
            Class::Infinite => (max_biased, 0),
            Class::NaN => (max_biased, 1u64 << (fmt.frac_bits - 1)),
            Class::Normal => {
                let keep = 1 + fmt.frac_bits; // integer bit + fraction
                let mut exp = self.exp;
                let mut shift = 64 - keep;
                if exp < emin {
                    // Subnormal in the target format: shift further right.
                    let extra = (emin - exp) as u32;
                    if extra >= 64 {
                        status.underflow = true;
                        status.inexact = true;
                        let bits = pack(&fmt, self.sign, 0, 0);
                        return Some((bits, status));
                    }
                    shift += extra;
                    exp = emin;
                }
                if shift >= 64 {
                    status.underflow = true;
                    status.inexact = true;
                    let bits = pack(&fmt, self.sign, 0, 0);
                    return Some((bits, status));
                }
                let kept = self.sig >> shift;
                let lost = if shift == 0 {
                    0
                } else {
                    self.sig & ((1u64 << shift) - 1)
                };
                let round_bit = if shift > 0 {
                    (self.sig >> (shift - 1)) & 1
                } else {
                    0
                };
                let sticky = if shift > 1 {
                    self.sig & ((1u64 << (shift - 1)) - 1) != 0
                } else {
                    false
                };
                if lost != 0 {
                    status.inexact = true;
                }
                let mut sig = kept;
                if round_bit == 1 && (sticky || sig & 1 == 1) {
                    sig += 1;
                    if sig >> keep != 0 {
                        sig >>= 1;
                        exp += 1;
                    }
                }
                if sig >> fmt.frac_bits == 0 {
                    // Still subnormal (or rounded to zero).
                    if sig == 0 || status.inexact {
                        status.underflow = true;
                    }
                    (0, sig & ((1u64 << fmt.frac_bits) - 1))
                } else if exp > emax {
                    status.overflow = true;
                    status.inexact = true;
                    (max_biased, 0)
                } else {
                    let frac = if fmt.explicit_int {
                        sig // keep the integer bit
                    } else {
                        sig & ((1u64 << fmt.frac_bits) - 1)
                    };
                    ((exp + fmt.bias) as u64, frac)
                }
            }
        };

        let bits = if fmt.explicit_int {
            // 80-bit: 1 sign + 15 exponent + 64 significand.
            let hi = ((self.sign as u64) << 15) | (biased_exp & 0x7FFF);
            let lo = match self.class {
                Class::Zero => 0,
                Class::Infinite => 1u64 << 63,
                Class::NaN => (1u64 << 63) | (1u64 << 62),
                Class::Normal => {
                    if biased_exp == 0 {
                        frac
                    } else {
                        frac | (1u64 << 63)
                    }
                }
            };
            let limbs = [lo, hi];
            IntNum::from_bits(&limbs, 80, false)
        } else {
            let v = ((self.sign as u64) << (fmt.exp_bits + fmt.frac_bits))
                | (biased_exp << fmt.frac_bits)
                | frac;
            IntNum::from_bits(&[v], size, false)
        };
        Some((bits, status))
    }
}

fn pack(fmt: &Format, sign: bool, biased_exp: u64, frac: u64) -> IntNum {
    if fmt.explicit_int {
        let hi = ((sign as u64) << 15) | (biased_exp & 0x7FFF);
        IntNum::from_bits(&[frac, hi], 80, false)
    } else {
        let v = ((sign as u64) << (fmt.exp_bits + fmt.frac_bits))
            | (biased_exp << fmt.frac_bits)
            | frac;
        IntNum::from_bits(&[v], fmt.exp_bits + fmt.frac_bits + 1, false)
    }
}

fn nan() -> FloatNum {
    FloatNum {
        sign: false,
        exp: 0,
        sig: 1,
        class: Class::NaN,
    }
}

/// Rounds a 66-bit working significand (64 kept + 2 guard bits) to 64
/// bits with ties-to-even and packs the result.
fn round_pack(sign: bool, mut exp: i32, sig128: u128, extra_sticky: bool) -> FloatNum {
    debug_assert!(sig128 >> 65 != 0, "working significand not normalized");
    let mut sig = (sig128 >> 2) as u64;
    let round_bit = (sig128 >> 1) & 1 != 0;
    let sticky = (sig128 & 1 != 0) || extra_sticky;
    if round_bit && (sticky || sig & 1 == 1) {
        let (s, carry) = sig.overflowing_add(1);
        if carry {
            sig = 1u64 << 63;
            exp += 1;
        } else {
            sig = s;
        }
    }
    FloatNum {
        sign,
        exp,
        sig,
        class: Class::Normal,
    }
}

impl PartialEq for FloatNum {
    fn eq(&self, other: &Self) -> bool {
        match (self.class, other.class) {
            (Class::NaN, _) | (_, Class::NaN) => false,
            (Class::Zero, Class::Zero) => true,
            _ => {
                self.class == other.class
                    && self.sign == other.sign
                    && self.exp == other.exp
                    && self.sig == other.sig
            }
        }
    }
}

impl PartialOrd for FloatNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.class == Class::NaN || other.class == Class::NaN {
            return None;
        }
        if self == other {
            return Some(Ordering::Equal);
        }
        let a_key = self.order_key();
        let b_key = other.order_key();
        Some(a_key.cmp(&b_key))
    }
}

impl FloatNum {
    /// Totally ordered key for non-NaN values.
    fn order_key(&self) -> (i32, i64, u64) {
        let sign_key = if self.sign { -1 } else { 1 };
        match self.class {
            Class::Zero => (0, 0, 0),
            Class::Infinite => (sign_key * 2, 0, 0),
            Class::Normal => {
                if self.sign {
                    (-1, -(self.exp as i64), u64::MAX - self.sig)
                } else {
                    (1, self.exp as i64, self.sig)
                }
            }
            Class::NaN => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits32(v: f64) -> u64 {
        let (b, _) = FloatNum::from_f64(v).to_bits(32).unwrap();
        b.get_u64().unwrap()
    }

    fn bits64(v: f64) -> u64 {
        let (b, _) = FloatNum::from_f64(v).to_bits(64).unwrap();
        b.extract_bits(0, 64)
    }

    #[test]
    fn test_f64_roundtrip_bits() {
        for v in [0.0f64, 1.0, -1.0, 1.5, 0.1, 1e100, -2.5e-7] {
            assert_eq!(bits64(v), v.to_bits(), "double bits of {}", v);
        }
    }

    #[test]
    fn test_single_conversion() {
        assert_eq!(bits32(1.5), (1.5f32).to_bits() as u64);
        assert_eq!(bits32(0.1), (0.1f32).to_bits() as u64);
        assert_eq!(bits32(-3.25), (-3.25f32).to_bits() as u64);
    }

    #[test]
    fn test_half_conversion() {
        let (b, _) = FloatNum::from_f64(1.0).to_bits(16).unwrap();
        assert_eq!(b.get_u64().unwrap(), 0x3C00);
        let (b, _) = FloatNum::from_f64(-2.0).to_bits(16).unwrap();
        assert_eq!(b.get_u64().unwrap(), 0xC000);
    }

    #[test]
    fn test_extended_conversion() {
        let (b, _) = FloatNum::from_f64(1.0).to_bits(80).unwrap();
        // 1.0 = sign 0, exponent 16383, significand 0x8000000000000000.
        assert_eq!(b.extract_bits(64, 16), 0x3FFF);
        assert_eq!(b.extract_bits(0, 64), 1u64 << 63);
    }

    #[test]
    fn test_overflow_to_single() {
        let (_, status) = FloatNum::from_f64(1e100).to_bits(32).unwrap();
        assert!(status.overflow);
    }

    #[test]
    fn test_underflow_to_half() {
        let (_, status) = FloatNum::from_f64(1e-30).to_bits(16).unwrap();
        assert!(status.underflow);
    }

    #[test]
    fn test_invalid_size() {
        assert!(FloatNum::from_f64(1.0).to_bits(24).is_none());
    }

    #[test]
    fn test_arithmetic() {
        let a = FloatNum::from_f64(1.5);
        let b = FloatNum::from_f64(2.25);
        assert_eq!(a.add(&b), FloatNum::from_f64(3.75));
        assert_eq!(b.sub(&a), FloatNum::from_f64(0.75));
        assert_eq!(a.mul(&b), FloatNum::from_f64(3.375));
        assert_eq!(b.div(&a), FloatNum::from_f64(1.5));
        assert_eq!(a.mul(&FloatNum::from_f64(-1.0)), FloatNum::from_f64(-1.5));
    }

    #[test]
    fn test_add_cancellation() {
        let a = FloatNum::from_f64(1.0);
        assert!(a.sub(&a).is_zero());
    }

    #[test]
    fn test_ordering() {
        let a = FloatNum::from_f64(-2.0);
        let b = FloatNum::from_f64(0.5);
        assert!(a < b);
        assert!(b > a);
    }
}
