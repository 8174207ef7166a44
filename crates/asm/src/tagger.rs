use std::collections::VecDeque;

use anyhow::{Result, bail};

use crate::fragment::Section;
use crate::layout::SectionLayout;
use crate::target::{TargetKind, TargetSpec};

/// Round-one tagging: walk the section's fragments in emission order and
/// attach the head spec to the fragment whose byte range covers it.
/// Destination specs must sit exactly at a fragment start. Specs that no
/// fragment covers stay in the queue and fail verification afterwards.
pub fn tag_section(
    section: &mut Section,
    layout: &SectionLayout,
    specs: &mut VecDeque<TargetSpec>,
) {
    for fragment in &mut section.fragments {
        let Some(head) = specs.front() else {
            break;
        };

        let offset = layout.offsets[&fragment.id];
        let size = fragment.size_at(offset);
        let covers = match head.kind {
            TargetKind::Destination => head.offset == offset,
            _ => head.offset >= offset && head.offset < offset + size,
        };
        if !covers {
            continue;
        }

        let mut spec = specs.pop_front().expect("head spec exists");
        spec.offset_in_fragment = spec.offset - offset;
        fragment.target = Some(spec);
    }
}

/// After round one every spec must have found its fragment.
pub fn verify_matched(section_name: &str, specs: &VecDeque<TargetSpec>) -> Result<()> {
    if specs.is_empty() {
        return Ok(());
    }
    let offsets = specs
        .iter()
        .map(|spec| format!("{:#x}", spec.offset))
        .collect::<Vec<_>>()
        .join(", ");
    bail!("section '{section_name}' has unmatched target offsets: {offsets}");
}
