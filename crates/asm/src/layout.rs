use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::fragment::{FIXUP_WIDTH, FragmentId, FragmentKind, Program, Section};

/// Fragment offsets of one laid-out section.
#[derive(Debug, Clone)]
pub struct SectionLayout {
    pub offsets: FxHashMap<FragmentId, u64>,
    pub size: u64,
}

/// Section base addresses plus per-section layouts. Sections are placed
/// sequentially on page boundaries; the constrained section relies on
/// starting at a page boundary for its frame arithmetic.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    pub bases: IndexMap<String, u64>,
    pub sections: IndexMap<String, SectionLayout>,
    pub image_size: u64,
}

pub fn layout_section(section: &Section) -> SectionLayout {
    let mut offsets = FxHashMap::default();
    let mut offset = 0u64;
    for fragment in &section.fragments {
        offsets.insert(fragment.id, offset);
        offset += fragment.size_at(offset);
    }
    SectionLayout {
        offsets,
        size: offset,
    }
}

pub fn layout_program(program: &Program, page_size: u64) -> Result<ImageLayout> {
    assert!(page_size.is_power_of_two());
    let mut bases = IndexMap::new();
    let mut sections = IndexMap::new();
    let mut base = 0u64;

    for (name, section) in &program.sections {
        if let Some(begin) = section.begin_fragment
            && section.fragments.first().map(|fragment| fragment.id) != Some(begin)
        {
            bail!(
                "internal layout error: begin symbol of section '{name}' does not \
                 name its first fragment"
            );
        }

        let layout = layout_section(section);
        bases.insert(name.clone(), base);
        base = align_up(base + layout.size, page_size);
        sections.insert(name.clone(), layout);
    }

    let image_size = bases
        .last()
        .map(|(name, base)| base + sections[name].size)
        .unwrap_or(0);

    Ok(ImageLayout {
        bases,
        sections,
        image_size,
    })
}

/// Absolute image address of a defined symbol.
pub fn symbol_address(program: &Program, image: &ImageLayout, name: &str) -> Option<u64> {
    let def = program.symbols.get(name)?;
    let base = image.bases.get(&def.section)?;
    let fragment_offset = image.sections.get(&def.section)?.offsets.get(&def.fragment)?;
    Some(base + fragment_offset + def.offset)
}

/// Produce the flat image: sections at their bases, gaps zero-filled,
/// PC-relative fixups patched through the symbol table.
pub fn write_image(program: &Program, image: &ImageLayout) -> Result<Vec<u8>> {
    let size = usize::try_from(image.image_size).context("image too large")?;
    let mut bytes = vec![0u8; size];

    for (name, section) in &program.sections {
        let base = image.bases[name];
        let layout = &image.sections[name];

        for fragment in &section.fragments {
            let offset = layout.offsets[&fragment.id];
            let addr = usize::try_from(base + offset).context("fragment address overflow")?;
            match &fragment.kind {
                FragmentKind::Data { bytes: data, fixups } => {
                    bytes[addr..addr + data.len()].copy_from_slice(data);
                    for fixup in fixups {
                        let target =
                            symbol_address(program, image, &fixup.symbol).ok_or_else(|| {
                                anyhow::anyhow!(
                                    "undefined symbol '{}' referenced from section '{name}'",
                                    fixup.symbol
                                )
                            })?;
                        let site = base + offset + fixup.offset;
                        let delta = target as i64 - (site + FIXUP_WIDTH) as i64;
                        let Ok(delta) = i32::try_from(delta) else {
                            bail!(
                                "relative reference to '{}' out of range at {site:#x}",
                                fixup.symbol
                            );
                        };
                        let site = usize::try_from(site).context("fixup address overflow")?;
                        bytes[site..site + 4].copy_from_slice(&delta.to_le_bytes());
                    }
                }
                FragmentKind::Fill { value, size } => {
                    let end = addr + usize::try_from(*size).context("fill too large")?;
                    bytes[addr..end].fill(*value);
                }
                FragmentKind::Align { .. } => {}
            }
        }
    }

    Ok(bytes)
}

/// Hex listing of every section, one block per section.
pub fn format_listing(program: &Program, image: &ImageLayout, bytes: &[u8]) -> String {
    let mut blocks = Vec::new();
    for name in program.sections.keys() {
        let base = image.bases[name] as usize;
        let size = image.sections[name].size as usize;
        blocks.push(format_listing_block(name, base, &bytes[base..base + size]));
    }
    blocks.join("\n\n")
}

fn format_listing_block(name: &str, base: usize, bytes: &[u8]) -> String {
    let mut out = String::new();
    out.push_str(&format!("[{name}]\n"));

    if bytes.is_empty() {
        out.push_str(&format!("{base:06X}: <empty>"));
        return out;
    }

    for (index, chunk) in bytes.chunks(16).enumerate() {
        let address = base + index * 16;
        let hex = chunk
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("{address:06X}: {hex}\n"));
    }

    if out.ends_with('\n') {
        out.pop();
    }
    out
}

pub fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    let rem = value % align;
    if rem == 0 { value } else { value + (align - rem) }
}
