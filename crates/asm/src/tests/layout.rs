use super::*;
use crate::layout::{
    align_up, format_listing, layout_program, layout_section, symbol_address, write_image,
};

#[test]
fn fragments_get_sequential_offsets() {
    let program = assemble("nop\n.byte 1, 2, 3\nret\n");
    let section = &program.sections[".text"];
    let layout = layout_section(section);
    let offsets: Vec<u64> = section
        .fragments
        .iter()
        .map(|fragment| layout.offsets[&fragment.id])
        .collect();
    assert_eq!(offsets, vec![0, 1, 4]);
    assert_eq!(layout.size, 5);
}

#[test]
fn align_fragments_pad_to_their_boundary() {
    let program = assemble("nop\n.align 8\nret\n");
    let layout = layout_section(&program.sections[".text"]);
    assert_eq!(layout.size, 9);
}

#[test]
fn neutralized_aligns_take_no_space() {
    let mut program = assemble("nop\n.align 8\nret\n");
    program.neutralize_aligns(".text");
    let layout = layout_section(&program.sections[".text"]);
    assert_eq!(layout.size, 2);
}

#[test]
fn sections_are_placed_on_page_boundaries() {
    let program = assemble("nop\n.section .dbl_text\nret\n");
    let image = layout_program(&program, PAGE).expect("layout");
    assert_eq!(image.bases[".text"], 0);
    assert_eq!(image.bases[".dbl_text"], PAGE);
    assert_eq!(image.image_size, PAGE + 1);
}

#[test]
fn backward_jump_resolves_to_negative_delta() {
    let program = assemble("start:\n    nop\n    jmp start\n");
    let image = layout_program(&program, PAGE).expect("layout");
    let bytes = write_image(&program, &image).expect("write");
    assert_eq!(bytes[1], 0xE9);
    // jmp site is at 1, field at 2; start is at 0: 0 - (2 + 4) = -6
    assert_eq!(&bytes[2..6], &(-6i32).to_le_bytes());
}

#[test]
fn forward_cross_section_call_resolves() {
    let program = assemble(
        ".section .text\n    call helper\n.section .aux\nhelper:\n    ret\n",
    );
    let image = layout_program(&program, PAGE).expect("layout");
    let bytes = write_image(&program, &image).expect("write");
    let helper = symbol_address(&program, &image, "helper").expect("helper defined");
    assert_eq!(helper, PAGE);
    let delta = i32::from_le_bytes(bytes[1..5].try_into().expect("4 bytes"));
    assert_eq!(delta as i64, helper as i64 - 5);
}

#[test]
fn undefined_symbol_is_fatal() {
    let program = assemble("jmp nowhere\n");
    let image = layout_program(&program, PAGE).expect("layout");
    let err = write_image(&program, &image).expect_err("undefined symbol");
    assert!(err.to_string().contains("undefined symbol 'nowhere'"));
}

#[test]
fn fill_fragments_write_their_byte() {
    let program = assemble(".fill 4, 0xcc\n.byte 0xaa\n");
    let image = layout_program(&program, PAGE).expect("layout");
    let bytes = write_image(&program, &image).expect("write");
    assert_eq!(bytes, vec![0xCC, 0xCC, 0xCC, 0xCC, 0xAA]);
}

#[test]
fn listing_shows_section_blocks() {
    let program = assemble("nop\nret\n");
    let image = layout_program(&program, PAGE).expect("layout");
    let bytes = write_image(&program, &image).expect("write");
    let listing = format_listing(&program, &image, &bytes);
    assert!(listing.contains("[.text]"));
    assert!(listing.contains("000000: 90 C3"));
}

#[test]
fn align_up_rounds_to_the_next_multiple() {
    assert_eq!(align_up(0, 4096), 0);
    assert_eq!(align_up(1, 4096), 4096);
    assert_eq!(align_up(4096, 4096), 4096);
    assert_eq!(align_up(4097, 4096), 8192);
    assert_eq!(align_up(77, 1), 77);
}
