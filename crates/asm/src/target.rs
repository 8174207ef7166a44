use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use serde::Deserialize;

use flipfit_solve::Sign;

/// TOML shape of the target file: a `sections` array, each section naming
/// the byte offsets the compiler must recognize in its output.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetFile {
    sections: Vec<TargetFileSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetFileSection {
    name: String,
    values: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TargetEntry {
    None {
        offset: u64,
    },
    Fixed {
        offset: u64,
        bit: u8,
        sign: String,
    },
    Range {
        start_offset: u64,
        range: u32,
        normal_dest: u64,
        flipped_dest: u64,
    },
}

/// A location the tagging pass must find inside the emitted fragments.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    /// Byte offset in the section's round-one output.
    pub offset: u64,
    /// Offset of the target byte inside its fragment; set by the tagger.
    pub offset_in_fragment: u64,
    pub kind: TargetKind,
}

#[derive(Debug, Clone, Copy)]
pub enum TargetKind {
    /// Cuts a bundle boundary but demands nothing physical.
    Marker,
    /// One bit of the byte at `offset` must land on a matching victim.
    Fixed { bit: u8, sign: Sign },
    /// A 32-bit relative jump offset whose flip retargets the jump between
    /// the two destinations. Destinations are section offsets here and are
    /// remapped to bundle indices before solving.
    Range { normal_dest: u64, flip_dest: u64 },
    /// Start of code that sits at a fixed distance from its pair.
    Destination,
}

impl TargetSpec {
    fn new(offset: u64, kind: TargetKind) -> Self {
        Self {
            offset,
            offset_in_fragment: 0,
            kind,
        }
    }
}

/// Per-section queues of target specs, sorted ascending by offset. The
/// tagging pass consumes specs from the front as fragments are walked.
#[derive(Debug, Default)]
pub struct TargetIndex {
    pub sections: IndexMap<String, VecDeque<TargetSpec>>,
}

impl TargetIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read target file '{}'", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("failed to parse target file '{}'", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let file: TargetFile = toml::from_str(text)?;
        let mut sections = IndexMap::new();

        for section in file.sections {
            let mut specs: Vec<TargetSpec> = Vec::new();
            for entry in section.values {
                match entry {
                    TargetEntry::None { offset } => {
                        specs.push(TargetSpec::new(offset, TargetKind::Marker));
                    }
                    TargetEntry::Fixed { offset, bit, sign } => {
                        if bit >= 8 {
                            bail!(
                                "section '{}': target bit index {bit} must be 0..8",
                                section.name
                            );
                        }
                        let sign = parse_sign(&sign)
                            .with_context(|| format!("section '{}'", section.name))?;
                        specs.push(TargetSpec::new(offset, TargetKind::Fixed { bit, sign }));
                    }
                    TargetEntry::Range {
                        start_offset,
                        range,
                        normal_dest,
                        flipped_dest,
                    } => {
                        // Only 32-bit relative jump offsets are supported;
                        // narrower branches are widened before emission.
                        if range != 4 {
                            bail!(
                                "section '{}': range target at {start_offset:#x} has \
                                 range {range}, only 4-byte jump offsets are supported",
                                section.name
                            );
                        }
                        specs.push(TargetSpec::new(
                            start_offset,
                            TargetKind::Range {
                                normal_dest,
                                flip_dest: flipped_dest,
                            },
                        ));
                        specs.push(TargetSpec::new(normal_dest, TargetKind::Destination));
                        specs.push(TargetSpec::new(flipped_dest, TargetKind::Destination));
                    }
                }
            }

            specs.sort_by_key(|spec| spec.offset);
            for pair in specs.windows(2) {
                if pair[0].offset == pair[1].offset {
                    bail!(
                        "section '{}': duplicate target offset {:#x}",
                        section.name,
                        pair[0].offset
                    );
                }
            }

            if sections
                .insert(section.name.clone(), specs.into_iter().collect())
                .is_some()
            {
                bail!("duplicate section '{}' in target file", section.name);
            }
        }

        Ok(Self { sections })
    }

    pub fn section_names(&self) -> Vec<String> {
        self.sections.keys().cloned().collect()
    }
}

fn parse_sign(text: &str) -> Result<Sign> {
    match text {
        "+" => Ok(Sign::Plus),
        "-" => Ok(Sign::Minus),
        other => bail!("target sign '{other}' must be '+' or '-'"),
    }
}
