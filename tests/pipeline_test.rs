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

use std::io::Write;

use coreasm::arch::{BasicArch, BranchBytecode};
use coreasm::assemble;
use coreasm::bytecode::Bytecode;
use coreasm::errors::{DiagId, Diagnostics, Source};
use coreasm::expr::{Expr, Op};
use coreasm::intnum::IntNum;
use coreasm::object::Object;
use coreasm::reloc::RelocKind;
use coreasm::section::SectionFlags;
use coreasm::value::Value;

fn new_object() -> Object {
    Object::new("test", Box::new(BasicArch))
}

#[test]
fn test_equ_forward_reference() {
    // mov eax, X / X equ 0x1234: immediate resolves to a constant, no
    // relocations, little-endian bytes.
    let mut obj = new_object();
    let si = obj.append_section(".text", SectionFlags::CODE);
    let mut diags = Diagnostics::new();

    let x = obj.symbols_mut().get_or_create("X");
    obj.section_mut(si).append_byte(0xB8, Source::at(1));
    let mut v = Value::from_expr(32, Expr::from_sym(x));
    v.set_source(Source::at(1));
    obj.section_mut(si).append_data_value(v, Source::at(1));

    obj.symbols_mut().define_equ(
        x,
        Expr::from_int(IntNum::new(0x1234)),
        Source::at(2),
        &mut diags,
    );
    assert!(!diags.has_error_occurred());

    let (out, warnings) = assemble(&mut obj).unwrap();
    assert_eq!(out.sections[0].bytes, vec![0xB8, 0x34, 0x12, 0x00, 0x00]);
    assert!(warnings.is_empty());
    assert!(obj.section(si).relocs().is_empty());
}

#[test]
fn test_circular_equ_fails() {
    // A equ B + 1 / B equ 2 * C / C equ A - 3 / use A.
    let mut obj = new_object();
    let si = obj.append_section(".text", SectionFlags::CODE);
    let mut diags = Diagnostics::new();

    let a = obj.symbols_mut().get_or_create("A");
    let b = obj.symbols_mut().get_or_create("B");
    let c = obj.symbols_mut().get_or_create("C");

    let mut ae = Expr::from_sym(b);
    ae.calc(Op::Add, Some(&Expr::from_int(IntNum::new(1))), Source::at(1));
    obj.symbols_mut().define_equ(a, ae, Source::at(1), &mut diags);

    let mut be = Expr::from_int(IntNum::new(2));
    be.calc(Op::Mul, Some(&Expr::from_sym(c)), Source::at(2));
    obj.symbols_mut().define_equ(b, be, Source::at(2), &mut diags);

    let mut ce = Expr::from_sym(a);
    ce.calc(Op::Sub, Some(&Expr::from_int(IntNum::new(3))), Source::at(3));
    obj.symbols_mut().define_equ(c, ce, Source::at(3), &mut diags);

    let mut v = Value::from_expr(32, Expr::from_sym(a));
    v.set_source(Source::at(4));
    obj.section_mut(si).append_data_value(v, Source::at(4));

    let err = assemble(&mut obj).unwrap_err();
    assert!(format!("{:#}", err).contains("circular"));
}

#[test]
fn test_short_to_near_branch_bytes() {
    // branch over 200 padding bytes: near form with a 32-bit
    // displacement, then the padding, then the target.
    let mut obj = new_object();
    let si = obj.append_section(".text", SectionFlags::CODE);
    let mut diags = Diagnostics::new();

    let fwd = obj.symbols_mut().get_or_create("fwd");
    obj.section_mut(si).append_bytecode(Bytecode::custom(
        Box::new(BranchBytecode::to_sym(fwd)),
        Source::at(1),
    ));
    obj.section_mut(si).append_gap(200, Source::at(2));
    obj.define_label_here(fwd, si, Source::at(3), &mut diags);
    obj.section_mut(si).append_byte(0xC3, Source::at(3));
    assert!(!diags.has_error_occurred());

    let (out, _) = assemble(&mut obj).unwrap();
    let bytes = &out.sections[0].bytes;
    assert_eq!(bytes.len(), 6 + 200 + 1);
    // Near form: 0F 84 disp32; target is 206, displacement from the
    // end of the 6-byte instruction is 200.
    assert_eq!(&bytes[..6], &[0x0F, 0x84, 200, 0, 0, 0]);
    assert_eq!(bytes[206], 0xC3);
}

#[test]
fn test_short_branch_bytes() {
    let mut obj = new_object();
    let si = obj.append_section(".text", SectionFlags::CODE);
    let mut diags = Diagnostics::new();

    let fwd = obj.symbols_mut().get_or_create("fwd");
    obj.section_mut(si).append_bytecode(Bytecode::custom(
        Box::new(BranchBytecode::to_sym(fwd)),
        Source::at(1),
    ));
    obj.section_mut(si).append_gap(16, Source::at(2));
    obj.define_label_here(fwd, si, Source::at(3), &mut diags);
    obj.section_mut(si).append_byte(0xC3, Source::at(3));

    let (out, _) = assemble(&mut obj).unwrap();
    let bytes = &out.sections[0].bytes;
    // Short form: 74 disp8; target 18, displacement 16.
    assert_eq!(&bytes[..2], &[0x74, 16]);
    assert_eq!(bytes[18], 0xC3);
}

#[test]
fn test_branch_then_align() {
    // branch fwd / align 16 / fwd: ret -- branch stays short, the
    // align pads with the architecture NOP fill, target at 16.
    let mut obj = new_object();
    let si = obj.append_section(".text", SectionFlags::CODE);
    let mut diags = Diagnostics::new();

    let fwd = obj.symbols_mut().get_or_create("fwd");
    obj.section_mut(si).append_bytecode(Bytecode::custom(
        Box::new(BranchBytecode::to_sym(fwd)),
        Source::at(1),
    ));
    obj.section_mut(si)
        .append_bytecode(Bytecode::align(16, None, None, Source::at(2)));
    obj.define_label_here(fwd, si, Source::at(3), &mut diags);
    obj.section_mut(si).append_byte(0xC3, Source::at(3));

    let (out, _) = assemble(&mut obj).unwrap();
    let bytes = &out.sections[0].bytes;
    assert_eq!(bytes.len(), 17);
    assert_eq!(&bytes[..2], &[0x74, 14]);
    // Code-section alignment uses the NOP pattern.
    assert!(bytes[2..16].iter().all(|&b| b == 0x90));
    assert_eq!(bytes[16], 0xC3);
}

#[test]
fn test_cross_section_difference_reloc() {
    // section .a { L1: } section .b { L2: dd L2 - L1 }: not a
    // distance, so a relative relocation against L2 with L1 as
    // subtrahend, residual bytes zero.
    let mut obj = new_object();
    let sa = obj.append_section(".a", SectionFlags::DATA);
    let sb = obj.append_section(".b", SectionFlags::DATA);
    let mut diags = Diagnostics::new();

    let l1 = obj.symbols_mut().get_or_create("L1");
    let l2 = obj.symbols_mut().get_or_create("L2");
    obj.define_label_here(l1, sa, Source::at(1), &mut diags);
    obj.define_label_here(l2, sb, Source::at(2), &mut diags);

    let mut e = Expr::from_sym(l2);
    e.calc(Op::Sub, Some(&Expr::from_sym(l1)), Source::at(3));
    let mut v = Value::from_expr(32, e);
    v.set_source(Source::at(3));
    obj.section_mut(sb).append_data_value(v, Source::at(3));

    let (out, _) = assemble(&mut obj).unwrap();
    assert_eq!(out.sections[1].bytes, vec![0, 0, 0, 0]);
    let relocs = obj.section(sb).relocs();
    assert_eq!(relocs.len(), 1);
    assert_eq!(relocs[0].kind, RelocKind::Relative);
    assert_eq!(relocs[0].sym, l2);
    assert_eq!(relocs[0].sub, Some(l1));
    assert_eq!(relocs[0].size, 32);
}

#[test]
fn test_same_section_difference_is_constant() {
    // dd L2 - L1 with both labels local resolves without relocation.
    let mut obj = new_object();
    let si = obj.append_section(".data", SectionFlags::DATA);
    let mut diags = Diagnostics::new();

    let l1 = obj.symbols_mut().get_or_create("L1");
    let l2 = obj.symbols_mut().get_or_create("L2");
    obj.define_label_here(l1, si, Source::at(1), &mut diags);
    obj.section_mut(si).append_gap(24, Source::at(2));
    obj.define_label_here(l2, si, Source::at(3), &mut diags);

    let mut e = Expr::from_sym(l2);
    e.calc(Op::Sub, Some(&Expr::from_sym(l1)), Source::at(4));
    let mut v = Value::from_expr(32, e);
    v.set_source(Source::at(4));
    obj.section_mut(si).append_data_value(v, Source::at(4));

    let (out, warnings) = assemble(&mut obj).unwrap();
    assert!(obj.section(si).relocs().is_empty());
    let bytes = &out.sections[0].bytes;
    assert_eq!(&bytes[24..28], &[24, 0, 0, 0]);
    // The gap sits in an initialized data section, which warns.
    assert!(warnings.iter().any(|w| w.id == DiagId::UninitContents));
}

#[test]
fn test_and_mask_suppresses_overflow_warning() {
    // dw 0x12345 & 0xFFFF: truncated bytes without a warning; the
    // same value without the mask warns.
    let mut masked = new_object();
    let si = masked.append_section(".data", SectionFlags::DATA);
    let mut e = Expr::from_int(IntNum::new(0x12345));
    e.calc(Op::And, Some(&Expr::from_int(IntNum::new(0xFFFF))), Source::at(1));
    let mut v = Value::from_expr(16, e);
    v.set_source(Source::at(1));
    masked.section_mut(si).append_data_value(v, Source::at(1));

    let (out, warnings) = assemble(&mut masked).unwrap();
    assert_eq!(out.sections[0].bytes, vec![0x45, 0x23]);
    assert!(warnings.is_empty());

    let mut bare = new_object();
    let si = bare.append_section(".data", SectionFlags::DATA);
    let mut v = Value::from_expr(16, Expr::from_int(IntNum::new(0x12345)));
    v.set_source(Source::at(1));
    bare.section_mut(si).append_data_value(v, Source::at(1));

    let (out, warnings) = assemble(&mut bare).unwrap();
    assert_eq!(out.sections[0].bytes, vec![0x45, 0x23]);
    assert!(
        warnings
            .iter()
            .any(|w| w.id == DiagId::UnsignedOverflow(16))
    );
}

#[test]
fn test_times_span_dependent_count() {
    // times (end - start) / 4 db 0x90 / start: <64 bytes> end:
    let mut obj = new_object();
    let si = obj.append_section(".data", SectionFlags::DATA);
    let mut diags = Diagnostics::new();

    let start = obj.symbols_mut().get_or_create("start");
    let end = obj.symbols_mut().get_or_create("end");

    let mut count = Expr::from_sym(end);
    count.calc(Op::Sub, Some(&Expr::from_sym(start)), Source::at(1));
    count.calc(Op::Div, Some(&Expr::from_int(IntNum::new(4))), Source::at(1));
    let mut inner = Bytecode::empty(Source::at(1));
    inner.append_fixed_bytes(&[0x90]);
    obj.section_mut(si)
        .append_bytecode(Bytecode::multiple(count, inner, Source::at(1)));

    obj.define_label_here(start, si, Source::at(2), &mut diags);
    for i in 0..64 {
        obj.section_mut(si).append_byte(i as u8, Source::at(3));
    }
    obj.define_label_here(end, si, Source::at(4), &mut diags);

    let (out, _) = assemble(&mut obj).unwrap();
    let bytes = &out.sections[0].bytes;
    assert_eq!(bytes.len(), 16 + 64);
    assert!(bytes[..16].iter().all(|&b| b == 0x90));
    assert_eq!(bytes[16], 0);
    assert_eq!(bytes[79], 63);
}

#[test]
fn test_org_pads_to_target() {
    let mut obj = new_object();
    let si = obj.append_section(".data", SectionFlags::DATA);

    obj.section_mut(si).append_byte(0xAA, Source::at(1));
    obj.section_mut(si)
        .append_bytecode(Bytecode::org(0x10, 0x00, Source::at(2)));
    obj.section_mut(si).append_byte(0xBB, Source::at(3));

    let (out, _) = assemble(&mut obj).unwrap();
    let bytes = &out.sections[0].bytes;
    assert_eq!(bytes.len(), 0x11);
    assert_eq!(bytes[0], 0xAA);
    assert!(bytes[1..0x10].iter().all(|&b| b == 0));
    assert_eq!(bytes[0x10], 0xBB);
}

#[test]
fn test_leb128_of_label_distance() {
    // start: <200 bytes> end: uleb128 end - start => C8 01.
    let mut obj = new_object();
    let si = obj.append_section(".data", SectionFlags::DATA);
    let mut diags = Diagnostics::new();

    let start = obj.symbols_mut().get_or_create("start");
    let end = obj.symbols_mut().get_or_create("end");
    obj.define_label_here(start, si, Source::at(1), &mut diags);
    for _ in 0..200 {
        obj.section_mut(si).append_byte(0, Source::at(2));
    }
    obj.define_label_here(end, si, Source::at(3), &mut diags);

    let mut e = Expr::from_sym(end);
    e.calc(Op::Sub, Some(&Expr::from_sym(start)), Source::at(4));
    let mut v = Value::from_expr(64, e);
    v.set_source(Source::at(4));
    obj.section_mut(si)
        .append_bytecode(Bytecode::leb128(v, false, Source::at(4)));

    let (out, _) = assemble(&mut obj).unwrap();
    let bytes = &out.sections[0].bytes;
    assert_eq!(&bytes[200..], &[0xC8, 0x01]);
}

#[test]
fn test_leb128_spanning_its_own_distance() {
    // start: uleb128 end - start / <126 bytes> end: the encoding's own
    // length feeds the distance; converges at one byte, value 127.
    let mut obj = new_object();
    let si = obj.append_section(".data", SectionFlags::DATA);
    let mut diags = Diagnostics::new();

    let start = obj.symbols_mut().get_or_create("start");
    let end = obj.symbols_mut().get_or_create("end");
    obj.define_label_here(start, si, Source::at(1), &mut diags);

    let mut e = Expr::from_sym(end);
    e.calc(Op::Sub, Some(&Expr::from_sym(start)), Source::at(2));
    let mut v = Value::from_expr(64, e);
    v.set_source(Source::at(2));
    obj.section_mut(si)
        .append_bytecode(Bytecode::leb128(v, false, Source::at(2)));

    obj.section_mut(si).append_gap(126, Source::at(3));
    obj.define_label_here(end, si, Source::at(4), &mut diags);

    let (out, _) = assemble(&mut obj).unwrap();
    let bytes = &out.sections[0].bytes;
    assert_eq!(bytes.len(), 127);
    assert_eq!(bytes[0], 127);
}

#[test]
fn test_incbin_with_start_and_maxlen() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();

    let mut obj = new_object();
    let si = obj.append_section(".data", SectionFlags::DATA);
    let start = Value::from_expr(64, Expr::from_int(IntNum::new(2)));
    let maxlen = Value::from_expr(64, Expr::from_int(IntNum::new(5)));
    obj.section_mut(si).append_bytecode(Bytecode::incbin(
        file.path().to_path_buf(),
        Some(start),
        Some(maxlen),
        Source::at(1),
    ));

    let (out, _) = assemble(&mut obj).unwrap();
    assert_eq!(out.sections[0].bytes, vec![2, 3, 4, 5, 6]);
}

#[test]
fn test_incbin_missing_file_fails() {
    let mut obj = new_object();
    let si = obj.append_section(".data", SectionFlags::DATA);
    obj.section_mut(si).append_bytecode(Bytecode::incbin(
        "/nonexistent/data.bin".into(),
        None,
        None,
        Source::at(1),
    ));
    assert!(assemble(&mut obj).is_err());
}

#[test]
fn test_full_pipeline_deterministic() {
    let build = || {
        let mut obj = new_object();
        let si = obj.append_section(".text", SectionFlags::CODE);
        let mut diags = Diagnostics::new();

        let fwd = obj.symbols_mut().get_or_create("fwd");
        obj.section_mut(si).append_bytecode(Bytecode::custom(
            Box::new(BranchBytecode::to_sym(fwd)),
            Source::at(1),
        ));
        obj.section_mut(si)
            .append_bytecode(Bytecode::align(8, None, None, Source::at(2)));
        obj.section_mut(si).append_gap(130, Source::at(3));
        obj.define_label_here(fwd, si, Source::at(4), &mut diags);
        obj.section_mut(si).append_byte(0xC3, Source::at(4));

        let (out, _) = assemble(&mut obj).unwrap();
        (
            out.sections[0].bytes.clone(),
            obj.section(si).relocs().to_vec(),
        )
    };
    assert_eq!(build(), build());
}

#[test]
fn test_symbol_redefinition_reports_previous() {
    let mut obj = new_object();
    let si = obj.append_section(".text", SectionFlags::CODE);
    let mut diags = Diagnostics::new();
    let s = obj.symbols_mut().get_or_create("dup");
    obj.define_label_here(s, si, Source::at(1), &mut diags);
    obj.section_mut(si).append_byte(0x90, Source::at(2));
    obj.define_label_here(s, si, Source::at(3), &mut diags);

    assert!(diags.has_error_occurred());
    assert!(
        diags
            .all()
            .iter()
            .any(|d| matches!(d.id, DiagId::SymbolRedefined(ref n) if n == "dup"))
    );
    assert!(
        diags
            .all()
            .iter()
            .any(|d| d.id == DiagId::PreviousDefinition && d.source == Source::at(1))
    );
}
