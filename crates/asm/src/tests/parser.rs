use super::*;
use crate::fragment::FragmentKind;

fn data_bytes<'a>(program: &'a Program, section: &str, index: usize) -> &'a [u8] {
    match &program.sections[section].fragments[index].kind {
        FragmentKind::Data { bytes, .. } => bytes,
        other => panic!("expected data fragment, found {other:?}"),
    }
}

#[test]
fn instructions_emit_one_fragment_each() {
    let program = assemble("nop\nret\nint3\n");
    let section = &program.sections[".text"];
    assert_eq!(section.fragments.len(), 3);
    assert_eq!(data_bytes(&program, ".text", 0), &[0x90]);
    assert_eq!(data_bytes(&program, ".text", 1), &[0xC3]);
    assert_eq!(data_bytes(&program, ".text", 2), &[0xCC]);
}

#[test]
fn jmp_emits_rel32_with_fixup() {
    let program = assemble("start:\n    jmp start\n");
    let FragmentKind::Data { bytes, fixups } = &program.sections[".text"].fragments[0].kind
    else {
        panic!("expected data fragment");
    };
    assert_eq!(bytes, &[0xE9, 0, 0, 0, 0]);
    assert_eq!(fixups.len(), 1);
    assert_eq!(fixups[0].offset, 1);
    assert_eq!(fixups[0].symbol, "start");
}

#[test]
fn call_uses_e8_opcode() {
    let program = assemble("f:\n    call f\n");
    assert_eq!(data_bytes(&program, ".text", 0)[0], 0xE8);
}

#[test]
fn byte_directive_accepts_hex_and_decimal() {
    let program = assemble(".byte 0x01, 2, 0xff\n");
    assert_eq!(data_bytes(&program, ".text", 0), &[0x01, 0x02, 0xFF]);
}

#[test]
fn fill_and_align_directives() {
    let program = assemble(".fill 32, 0xcc\n.align 16\n");
    let section = &program.sections[".text"];
    assert!(matches!(
        section.fragments[0].kind,
        FragmentKind::Fill { value: 0xCC, size: 32 }
    ));
    assert!(matches!(
        section.fragments[1].kind,
        FragmentKind::Align { alignment: 16 }
    ));
}

#[test]
fn section_directive_switches_sections() {
    let program = assemble(".section .dbl_text\nnop\n.section .text\nret\n");
    assert_eq!(program.sections.len(), 2);
    assert_eq!(program.sections[".dbl_text"].fragments.len(), 1);
    assert_eq!(program.sections[".text"].fragments.len(), 1);
}

#[test]
fn labels_bind_to_the_next_fragment() {
    let program = assemble("a:\nb:\n    nop\n");
    let id = program.sections[".text"].fragments[0].id;
    for name in ["a", "b"] {
        let def = &program.symbols[name];
        assert_eq!(def.fragment, id);
        assert_eq!(def.offset, 0);
    }
}

#[test]
fn trailing_label_anchors_to_an_empty_fragment() {
    let program = assemble("nop\nend:\n");
    let section = &program.sections[".text"];
    assert_eq!(section.fragments.len(), 2);
    assert_eq!(data_bytes(&program, ".text", 1), &[] as &[u8]);
    assert_eq!(
        program.symbols["end"].fragment,
        section.fragments[1].id
    );
}

#[test]
fn comments_and_blank_lines_are_skipped() {
    let program = assemble("# header\n\n; note\nnop ; trailing\n");
    assert_eq!(program.sections[".text"].fragments.len(), 1);
}

#[test]
fn begin_fragment_tracks_the_first_fragment() {
    let program = assemble("nop\nret\n");
    let section = &program.sections[".text"];
    assert_eq!(section.begin_fragment, Some(section.fragments[0].id));
}

#[test]
fn rejects_unknown_instruction() {
    let err = parse_source("frobnicate\n").expect_err("unknown mnemonic");
    assert!(err.to_string().contains("line 1"));
    assert!(
        format!("{err:#}").contains("unknown instruction 'frobnicate'"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn rejects_oversized_byte_value() {
    let err = parse_source(".byte 256\n").expect_err("byte overflow");
    assert!(format!("{err:#}").contains("does not fit in one byte"));
}

#[test]
fn rejects_non_power_of_two_alignment() {
    let err = parse_source(".align 12\n").expect_err("bad alignment");
    assert!(format!("{err:#}").contains("power of two"));
}

#[test]
fn rejects_duplicate_labels() {
    let err = parse_source("a:\n    nop\na:\n    ret\n").expect_err("duplicate label");
    assert!(format!("{err:#}").contains("duplicate symbol 'a'"));
}

#[test]
fn rejects_unrecognized_tokens() {
    let err = parse_source("nop @\n").expect_err("bad token");
    assert!(err.to_string().contains("unrecognized token"));
}
