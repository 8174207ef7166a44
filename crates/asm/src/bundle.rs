use anyhow::{Result, bail};
use rustc_hash::FxHashMap;

use crate::fragment::{Fixup, Fragment, FragmentKind, Program, Section};
use crate::target::{TargetKind, TargetSpec};

/// The atomic unit of placement: a run of contiguous fragments whose first
/// fragment carries the spec that cut it.
#[derive(Debug)]
pub struct Bundle {
    pub spec: TargetSpec,
    pub fragments: Vec<Fragment>,
}

impl Bundle {
    pub fn size(&self) -> u64 {
        let mut offset = 0u64;
        for fragment in &self.fragments {
            offset += fragment.size_at(offset);
        }
        offset
    }
}

/// Cut the section into bundles, scanning back to front: every fragment
/// with an attached spec starts a bundle running to the previous cut.
/// Fragments before the first spec-carrying fragment belong to no bundle,
/// which is fatal. The section's fragment list is emptied; the fragments
/// live in the returned bundles until round-two surgery rebuilds the list.
pub fn cut_bundles(section: &mut Section) -> Result<Vec<Bundle>> {
    let fragments = std::mem::take(&mut section.fragments);
    let mut bundles = Vec::new();
    let mut run: Vec<Fragment> = Vec::new();

    for fragment in fragments.into_iter().rev() {
        let is_cut = fragment.target.is_some();
        run.push(fragment);
        if is_cut {
            run.reverse();
            let spec = run[0].target.clone().expect("cut fragment carries a spec");
            bundles.push(Bundle {
                spec,
                fragments: std::mem::take(&mut run),
            });
        }
    }

    if !run.is_empty() {
        bail!(
            "section '{}': the first fragment does not start a bundle \
             ({} fragment(s) precede the first target)",
            section.name,
            run.len()
        );
    }

    bundles.reverse();
    Ok(bundles)
}

/// Map every bundle's section offset to its index and check that each
/// range spec's destinations are bundle starts.
pub fn resolve_destinations(bundles: &[Bundle]) -> Result<FxHashMap<u64, usize>> {
    let index: FxHashMap<u64, usize> = bundles
        .iter()
        .enumerate()
        .map(|(position, bundle)| (bundle.spec.offset, position))
        .collect();

    for bundle in bundles {
        let TargetKind::Range {
            normal_dest,
            flip_dest,
        } = bundle.spec.kind
        else {
            continue;
        };
        // A destination that is not a bundle start usually means the
        // target offsets overlap for the size of this binary.
        if !index.contains_key(&normal_dest) {
            bail!("normal destination {normal_dest:#x} is not a bundle start");
        }
        if !index.contains_key(&flip_dest) {
            bail!("flipped destination {flip_dest:#x} is not a bundle start");
        }
    }

    Ok(index)
}

/// Preserve control flow across reordering: label every bundle start and
/// append a 5-byte jump to the next bundle's label at the end of every
/// bundle except the last. The fixup machinery resolves the final offsets.
pub fn chain_bundles(program: &mut Program, section: &str, bundles: &mut [Bundle]) -> Result<()> {
    for (position, bundle) in bundles.iter().enumerate() {
        let first = bundle
            .fragments
            .first()
            .expect("bundles contain at least the cut fragment");
        program.define_symbol(bundle_label(position), section, first.id, 0)?;
    }

    let count = bundles.len();
    for (position, bundle) in bundles.iter_mut().enumerate().take(count.saturating_sub(1)) {
        let jump = program.alloc_fragment(FragmentKind::Data {
            bytes: vec![0xE9, 0, 0, 0, 0],
            fixups: vec![Fixup {
                offset: 1,
                symbol: bundle_label(position + 1),
            }],
        });
        bundle.fragments.push(jump);
    }

    Ok(())
}

fn bundle_label(position: usize) -> String {
    format!(".Lbundle{position}")
}
