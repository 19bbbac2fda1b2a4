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

use std::ops::{Deref, DerefMut};

use crate::intnum::IntNum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// A byte buffer that remembers its target endianness. All fixed-width
/// writers honor the setting.
#[derive(Debug, Clone, Default)]
pub struct Bytes {
    data: Vec<u8>,
    endian: Endian,
}

impl Bytes {
    pub fn new() -> Self {
        Bytes::default()
    }

    pub fn with_endian(endian: Endian) -> Self {
        Bytes {
            data: Vec::new(),
            endian,
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn is_little_endian(&self) -> bool {
        self.endian == Endian::Little
    }

    pub fn write_8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_16(&mut self, v: u16) {
        match self.endian {
            Endian::Little => self.data.extend_from_slice(&v.to_le_bytes()),
            Endian::Big => self.data.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn write_32(&mut self, v: u32) {
        match self.endian {
            Endian::Little => self.data.extend_from_slice(&v.to_le_bytes()),
            Endian::Big => self.data.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn write_64(&mut self, v: u64) {
        match self.endian {
            Endian::Little => self.data.extend_from_slice(&v.to_le_bytes()),
            Endian::Big => self.data.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn write_zeros(&mut self, n: usize) {
        self.data.resize(self.data.len() + n, 0);
    }

    /// Appends an integer as an `nbytes`-wide two's-complement field,
    /// truncating or sign-extending as needed.
    pub fn write_intnum(&mut self, intn: &IntNum, nbytes: usize) {
        let field = match self.endian {
            Endian::Little => intn.to_le_bytes_sized(nbytes),
            Endian::Big => intn.to_be_bytes_sized(nbytes),
        };
        self.data.extend_from_slice(&field);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Deref for Bytes {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.data
    }
}

impl DerefMut for Bytes {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(data: Vec<u8>) -> Self {
        Bytes {
            data,
            endian: Endian::Little,
        }
    }
}

/// Appends the LEB128 encoding of `intn` and returns the encoded length.
/// Signed encoding sign-extends the final 7-bit group.
pub fn write_leb128(bytes: &mut Bytes, intn: &IntNum, sign: bool) -> usize {
    if intn.is_zero() {
        bytes.write_8(0);
        return 1;
    }
    let size = if sign {
        intn.min_signed_bits()
    } else {
        intn.active_bits()
    };
    let orig_len = bytes.len();
    let mut i = 0;
    while i + 7 < size {
        bytes.write_8(intn.extract_bits(i, 7) as u8 | 0x80);
        i += 7;
    }
    bytes.write_8(intn.extract_bits(i, 7) as u8);
    bytes.len() - orig_len
}

/// Encoded length of `intn` without writing it.
pub fn size_leb128(intn: &IntNum, sign: bool) -> usize {
    if intn.is_zero() {
        return 1;
    }
    let size = if sign {
        intn.min_signed_bits()
    } else {
        intn.active_bits()
    };
    ((size + 6) / 7) as usize
}

/// Decodes a LEB128 value from the front of `buf`. Returns the value and
/// the number of bytes consumed, or `None` if the buffer ends before a
/// terminating group.
pub fn read_leb128(buf: &[u8], sign: bool) -> Option<(IntNum, usize)> {
    let mut limbs: Vec<u64> = vec![0];
    let mut nbits = 0u32;
    let mut nread = 0usize;
    for &byte in buf {
        nread += 1;
        let v = (byte & 0x7F) as u64;
        let limb = (nbits / 64) as usize;
        let off = nbits % 64;
        if limb >= limbs.len() {
            limbs.push(0);
        }
        limbs[limb] |= v << off;
        if off + 7 > 64 {
            limbs.push(v >> (64 - off));
        }
        nbits += 7;
        if byte & 0x80 == 0 {
            return Some((IntNum::from_bits(&limbs, nbits, sign), nread));
        }
    }
    None
}
