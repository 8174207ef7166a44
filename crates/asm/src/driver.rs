use anyhow::{Context, Result, bail};

use flipfit_solve::VictimRegistry;

use crate::fragment::Program;
use crate::layout::{format_listing, layout_program, write_image};
use crate::parser::parse_source;
use crate::round2::{Round2Outcome, relayout_section};
use crate::tagger::{tag_section, verify_matched};
use crate::target::TargetIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ordinary assembly: no tagging, no solving.
    Baseline,
    /// Tag and verify targets against the unmodified layout, so target
    /// offsets can be iterated against a runnable binary.
    Offsets,
    /// The full two-round pipeline.
    Dbl,
}

#[derive(Debug)]
pub struct BuildOutput {
    pub image: Vec<u8>,
    pub listing: String,
    pub outcome: Option<Round2Outcome>,
}

/// Assemble `source` under the given mode. `targets` is required in
/// offsets/dbl modes, `registry` in dbl mode.
pub fn build(
    source: &str,
    mode: Mode,
    targets: Option<TargetIndex>,
    registry: Option<&VictimRegistry>,
    page_size: u64,
) -> Result<BuildOutput> {
    let mut program = parse_source(source)?;

    if mode == Mode::Baseline {
        return finish(&program, page_size, None);
    }

    let mut targets = targets.context("offsets and dbl modes require a target offsets file")?;

    // Alignment padding would shift target offsets between the rounds.
    for name in targets.section_names() {
        program.neutralize_aligns(&name);
    }

    // Round one: ordinary layout, then tag and verify every targeted section.
    let round1 = layout_program(&program, page_size)?;
    for (name, specs) in targets.sections.iter_mut() {
        if let Some(section) = program.sections.get_mut(name) {
            tag_section(section, &round1.sections[name], specs);
        }
        verify_matched(name, specs)?;
    }

    if mode == Mode::Offsets {
        return finish(&program, page_size, None);
    }

    let registry = registry.context("dbl mode requires a victim addresses file")?;
    let mut targeted = targets.sections.keys();
    let (Some(section_name), None) = (targeted.next(), targeted.next()) else {
        bail!(
            "dbl mode supports exactly one constrained section, the target file names {}",
            targets.sections.len()
        );
    };
    let section_name = section_name.clone();

    // Round two: relayout under the physical constraints, then a fresh
    // layout pass over the spliced fragment list.
    let outcome = relayout_section(&mut program, &section_name, registry, page_size)?;
    finish(&program, page_size, Some(outcome))
}

fn finish(
    program: &Program,
    page_size: u64,
    outcome: Option<Round2Outcome>,
) -> Result<BuildOutput> {
    let layout = layout_program(program, page_size)?;
    let image = write_image(program, &layout)?;
    let listing = format_listing(program, &layout, &image);
    Ok(BuildOutput {
        image,
        listing,
        outcome,
    })
}
