use super::*;
use crate::layout::layout_section;
use crate::tagger::{tag_section, verify_matched};
use crate::target::TargetKind;

fn tag(program: &mut Program, section: &str, targets: &mut TargetIndex) {
    let layout = layout_section(&program.sections[section]);
    let specs = targets
        .sections
        .get_mut(section)
        .expect("section has targets");
    tag_section(
        program.sections.get_mut(section).expect("section exists"),
        &layout,
        specs,
    );
}

#[test]
fn fixed_target_attaches_with_fragment_offset() {
    let mut program = assemble(FIXED_SOURCE);
    let mut targets = target_index(FIXED_TARGETS);
    tag(&mut program, ".dbl_text", &mut targets);

    let section = &program.sections[".dbl_text"];
    let marker = section.fragments[0].target.as_ref().expect("marker attached");
    assert!(matches!(marker.kind, TargetKind::Marker));

    let fixed = section.fragments[1].target.as_ref().expect("fixed attached");
    assert!(matches!(fixed.kind, TargetKind::Fixed { bit: 3, .. }));
    assert_eq!(fixed.offset, 0x10);
    assert_eq!(fixed.offset_in_fragment, 0);

    assert!(targets.sections[".dbl_text"].is_empty());
}

#[test]
fn target_in_the_middle_of_a_fragment_records_its_offset() {
    let mut program = assemble(".section .dbl_text\n.byte 1, 2, 3, 4\n");
    let mut targets = target_index(
        r#"
sections = [
    { name = ".dbl_text", values = [ { type = "fixed", offset = 2, bit = 0, sign = "-" } ] },
]
"#,
    );
    tag(&mut program, ".dbl_text", &mut targets);

    let spec = program.sections[".dbl_text"].fragments[0]
        .target
        .as_ref()
        .expect("attached");
    assert_eq!(spec.offset_in_fragment, 2);
}

#[test]
fn destination_must_sit_at_a_fragment_start() {
    // The destination offset 1 is inside the first fragment, not at a
    // fragment boundary, so it must stay unmatched.
    let mut program = assemble(".section .dbl_text\n.byte 1, 2\n.byte 3\n");
    let mut targets = target_index(
        r#"
sections = [
    { name = ".dbl_text", values = [
        { type = "range", start_offset = 0, range = 4, normal_dest = 1, flipped_dest = 2 },
    ] },
]
"#,
    );
    tag(&mut program, ".dbl_text", &mut targets);

    // The stuck head also blocks the destination at offset 2 from ever
    // being considered, so both stay unmatched.
    let leftover = &targets.sections[".dbl_text"];
    assert_eq!(leftover.len(), 2);
    assert_eq!(leftover[0].offset, 1);
    let err = verify_matched(".dbl_text", leftover).expect_err("unmatched destination");
    assert!(err.to_string().contains("unmatched target offsets: 0x1, 0x2"));
}

#[test]
fn unmatched_target_reports_every_leftover_offset() {
    let mut program = assemble(".section .dbl_text\nnop\n");
    let mut targets = target_index(
        r#"
sections = [
    { name = ".dbl_text", values = [
        { type = "none", offset = 0x0 },
        { type = "fixed", offset = 0x40, bit = 3, sign = "+" },
        { type = "none", offset = 0x80 },
    ] },
]
"#,
    );
    tag(&mut program, ".dbl_text", &mut targets);

    let err =
        verify_matched(".dbl_text", &targets.sections[".dbl_text"]).expect_err("unmatched");
    let message = err.to_string();
    assert!(message.contains("section '.dbl_text'"));
    assert!(message.contains("0x40"));
    assert!(message.contains("0x80"));
}

#[test]
fn verify_passes_when_everything_matched() {
    let mut program = assemble(FIXED_SOURCE);
    let mut targets = target_index(FIXED_TARGETS);
    tag(&mut program, ".dbl_text", &mut targets);
    verify_matched(".dbl_text", &targets.sections[".dbl_text"]).expect("all matched");
}
