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

use bitflags::bitflags;

use crate::bytes::{Bytes, Endian};
use crate::errors::{DiagId, Diagnostics, Source};
use crate::floatnum::FloatNum;
use crate::intnum::{IntNum, SizeMode};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct NumWarnings: u32 {
        const INT_OVERFLOW = 1 << 0;
        const FP_OVERFLOW = 1 << 1;
        const FP_UNDERFLOW = 1 << 2;
        const TRUNCATED = 1 << 3;
    }
}

/// Writes sized integers and floats into a byte buffer, accumulating
/// warnings for later emission so source attribution stays accurate.
///
/// The deposit window is `size` bits starting `shift` bits into the
/// buffer; bits outside the window are preserved.
pub struct NumericOutput<'a> {
    bytes: &'a mut Bytes,
    source: Source,
    size: u32,
    shift: u32,
    rshift: u32,
    sign: bool,
    warns_enabled: bool,
    warns: NumWarnings,
}

impl<'a> NumericOutput<'a> {
    pub fn new(bytes: &'a mut Bytes) -> Self {
        NumericOutput {
            bytes,
            source: Source::none(),
            size: 0,
            shift: 0,
            rshift: 0,
            sign: false,
            warns_enabled: false,
            warns: NumWarnings::empty(),
        }
    }

    pub fn set_source(&mut self, source: Source) {
        self.source = source;
    }

    pub fn set_size(&mut self, size: u32) {
        self.size = size;
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn set_shift(&mut self, shift: u32) {
        self.shift = shift;
    }

    pub fn set_rshift(&mut self, rshift: u32) {
        self.rshift = rshift;
    }

    pub fn set_sign(&mut self, sign: bool) {
        self.sign = sign;
    }

    pub fn enable_warnings(&mut self) {
        self.warns_enabled = true;
    }

    pub fn disable_warnings(&mut self) {
        self.warns_enabled = false;
    }

    pub fn output_integer(&mut self, intn: &IntNum) {
        let mode = if self.sign {
            SizeMode::Signed
        } else {
            SizeMode::Unsigned
        };
        if self.warns_enabled && !intn.fits_in_size(self.size, self.rshift, mode) {
            self.warns |= NumWarnings::INT_OVERFLOW;
        }
        if self.warns_enabled && self.rshift > 0 && intn.trailing_zeros() < self.rshift {
            self.warns |= NumWarnings::TRUNCATED;
        }

        let work = if self.rshift > 0 {
            intn.ashr(self.rshift)
        } else {
            intn.clone()
        };
        self.deposit(&work);
    }

    /// Deposits the low `size` bits of `work` at bit position `shift`,
    /// honoring the buffer's endianness; the rest of the buffer is
    /// preserved.
    fn deposit(&mut self, work: &IntNum) {
        let len = self.bytes.len();
        let window_lo = self.shift;
        let window_hi = self.shift + self.size;
        for i in 0..len {
            let byte_lo = (i as u32) * 8;
            let byte_hi = byte_lo + 8;
            let lo = byte_lo.max(window_lo);
            let hi = byte_hi.min(window_hi);
            if lo >= hi {
                continue;
            }
            let width = hi - lo;
            let chunk = work.extract_bits(lo - window_lo, width) as u8;
            let mask = if width == 8 {
                0xFFu8
            } else {
                ((1u8 << width) - 1) << (lo - byte_lo)
            };
            let phys = match self.bytes.endian() {
                Endian::Little => i,
                Endian::Big => len - 1 - i,
            };
            let shifted = (chunk << (lo - byte_lo)) & mask;
            self.bytes[phys] = (self.bytes[phys] & !mask) | shifted;
        }
    }

    /// Converts the float into the semantics matching `size` and writes
    /// the bit pattern. Sizes other than 16/32/64/80 are programming
    /// errors.
    pub fn output_float(&mut self, flt: &FloatNum) {
        let converted = flt.to_bits(self.size);
        debug_assert!(converted.is_some(), "invalid floating point output size");
        let Some((bits, status)) = converted else {
            return;
        };
        if self.warns_enabled {
            if status.overflow {
                self.warns |= NumWarnings::FP_OVERFLOW;
            }
            if status.underflow {
                self.warns |= NumWarnings::FP_UNDERFLOW;
            }
        }
        // Integer size checks do not apply to a bit pattern.
        let was_enabled = self.warns_enabled;
        self.warns_enabled = false;
        self.output_integer(&bits);
        self.warns_enabled = was_enabled;
    }

    /// Emits one diagnostic per accumulated warning flag.
    pub fn emit_warnings(&self, diags: &mut Diagnostics) {
        if self.warns.contains(NumWarnings::INT_OVERFLOW) {
            let id = if self.sign {
                DiagId::SignedOverflow(self.size)
            } else {
                DiagId::UnsignedOverflow(self.size)
            };
            diags.report(self.source, id);
        }
        if self.warns.contains(NumWarnings::FP_UNDERFLOW) {
            diags.report(self.source, DiagId::FloatUnderflow);
        }
        if self.warns.contains(NumWarnings::FP_OVERFLOW) {
            diags.report(self.source, DiagId::FloatOverflow);
        }
        if self.warns.contains(NumWarnings::TRUNCATED) {
            diags.report(self.source, DiagId::Truncated(self.rshift));
        }
    }
}
