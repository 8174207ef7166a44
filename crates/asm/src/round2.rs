use anyhow::{Result, bail};

use flipfit_solve::{Block, BlockKind, Solution, VictimRegistry, solve};

use crate::bundle::{Bundle, chain_bundles, cut_bundles, resolve_destinations};
use crate::fragment::{Fragment, FragmentKind, Program};
use crate::target::TargetKind;

/// Result of the second round for one constrained section.
#[derive(Debug)]
pub struct Round2Outcome {
    pub section: String,
    pub solution: Solution,
    pub bundle_sizes: Vec<u64>,
}

/// Re-layout `section_name` under the physical constraints: cut tagged
/// fragments into bundles, chain them with jumps, solve for offsets, then
/// rebuild the fragment list in solved order with breakpoint fill between
/// bundles. Leaves the program ready for a fresh layout pass.
pub fn relayout_section(
    program: &mut Program,
    section_name: &str,
    registry: &VictimRegistry,
    page_size: u64,
) -> Result<Round2Outcome> {
    let Some(section) = program.sections.get_mut(section_name) else {
        bail!("constrained section '{section_name}' was never emitted");
    };

    let mut bundles = cut_bundles(section)?;
    if bundles.is_empty() {
        bail!("section '{section_name}' has no bundles to place");
    }
    let destination_index = resolve_destinations(&bundles)?;
    chain_bundles(program, section_name, &mut bundles)?;

    let blocks: Vec<Block> = bundles
        .iter()
        .map(|bundle| Block {
            size: bundle.size(),
            kind: match bundle.spec.kind {
                TargetKind::Marker => BlockKind::Plain,
                TargetKind::Fixed { bit, sign } => BlockKind::FixedBit {
                    target_offset: bundle.spec.offset_in_fragment,
                    bit,
                    sign,
                },
                TargetKind::Range {
                    normal_dest,
                    flip_dest,
                } => BlockKind::JumpOffset {
                    target_offset: bundle.spec.offset_in_fragment,
                    normal: destination_index[&normal_dest],
                    flip: destination_index[&flip_dest],
                },
                TargetKind::Destination => BlockKind::Destination,
            },
        })
        .collect();
    let bundle_sizes: Vec<u64> = blocks.iter().map(|block| block.size).collect();

    let solution = solve(&blocks, registry, page_size)?;

    // Rebuild the section in ascending solved order: breakpoint fill up to
    // each bundle's offset, then the bundle's own fragments.
    let mut slots: Vec<Option<Bundle>> = bundles.into_iter().map(Some).collect();
    let mut rebuilt: Vec<Fragment> = Vec::new();
    let mut last_end = 0u64;

    for (&offset, placement) in &solution.placements {
        let Some(fill) = offset.checked_sub(last_end) else {
            bail!(
                "bundle {} solved to {offset:#x}, overlapping the previous bundle \
                 ending at {last_end:#x}",
                placement.block
            );
        };
        let bundle = slots[placement.block]
            .take()
            .expect("every bundle is placed exactly once");
        let size = bundle.size();

        let fill_fragment = program.alloc_fragment(FragmentKind::Fill {
            value: 0xCC,
            size: fill,
        });
        program.define_symbol(
            format!("padding_before_bundle{}", placement.block),
            section_name,
            fill_fragment.id,
            0,
        )?;
        rebuilt.push(fill_fragment);
        rebuilt.extend(bundle.fragments);
        last_end = offset + size;
    }
    debug_assert!(slots.iter().all(Option::is_none));

    let section = program
        .sections
        .get_mut(section_name)
        .expect("section existed above");
    section.fragments = rebuilt;
    section.begin_fragment = section.fragments.first().map(|fragment| fragment.id);

    Ok(Round2Outcome {
        section: section_name.to_string(),
        solution,
        bundle_sizes,
    })
}

/// Human-readable placement summary, one line per bundle in final order.
pub fn format_trace(outcome: &Round2Outcome, registry: &VictimRegistry) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "section {}: {} bundle(s), pair distance 2^{}\n",
        outcome.section,
        outcome.bundle_sizes.len(),
        outcome.solution.pair_bit
    ));
    for (offset, placement) in &outcome.solution.placements {
        let size = outcome.bundle_sizes[placement.block];
        match &placement.victim {
            Some(victim) => {
                let bit = registry.get(victim.frame, victim.entry);
                out.push_str(&format!(
                    "  bundle {} at {offset:#x} ({size:#x} bytes) -> victim {:#x} bit {}{}\n",
                    placement.block, bit.addr, bit.bit, bit.sign
                ));
            }
            None => {
                out.push_str(&format!(
                    "  bundle {} at {offset:#x} ({size:#x} bytes)\n",
                    placement.block
                ));
            }
        }
    }
    out
}
