use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::free_list::{FreeList, Rollback};
use crate::victims::{Sign, VictimRegistry};

/// One placement unit handed to the solver: a bundle reduced to its size
/// and placement demand. Destination indices refer into the same slice.
#[derive(Debug, Clone)]
pub struct Block {
    pub size: u64,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, Copy)]
pub enum BlockKind {
    /// No physical demand; first-fit anywhere.
    Plain,
    /// A single bit at `target_offset` into the block must land on a victim
    /// with matching bit index and sign.
    FixedBit {
        target_offset: u64,
        bit: u8,
        sign: Sign,
    },
    /// A 32-bit relative jump offset starting at `target_offset`. The flip
    /// bit is chosen by the solver; `normal` and `flip` are the indices of
    /// the two destination blocks.
    JumpOffset {
        target_offset: u64,
        normal: usize,
        flip: usize,
    },
    /// Jump landing site; placed as one half of a fixed-distance pair.
    Destination,
}

/// Where one block ended up. `victim` is set for blocks with a bit demand.
#[derive(Debug, Clone)]
pub struct Placement {
    pub block: usize,
    pub victim: Option<PlacedVictim>,
}

#[derive(Debug, Clone)]
pub struct PlacedVictim {
    /// Frame index into the registry.
    pub frame: usize,
    /// Entry index inside that frame's bucket.
    pub entry: usize,
    /// Section offset of the byte that must land on the victim. For jump
    /// blocks this is the byte holding the flip bit, not the block start.
    pub byte_offset: u64,
}

#[derive(Debug, Clone)]
pub struct Solution {
    /// Final section offset of every block, ascending.
    pub placements: BTreeMap<u64, Placement>,
    /// The flip-bit position inside the 32-bit jump offset.
    pub pair_bit: u32,
    /// Distance between every normal/flip destination pair: `2^pair_bit`.
    pub pair_distance: u64,
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error(
        "no unused victim frame offers bit {bit}{sign} above page offset {target_offset:#x}. \
         Do you have enough victims in the victim address file?"
    )]
    NotEnoughVictims {
        bit: u8,
        sign: Sign,
        target_offset: u64,
    },
    #[error(
        "pair distance 2^{bit} does not fit a 32-bit jump offset \
         (largest bundle is {max_size:#x} bytes)"
    )]
    PairDistanceTooWide { bit: u32, max_size: u64 },
    #[error(
        "target offset {offset:#x} of block {block} does not fit inside the \
         first page of its bundle (page size {page_size:#x})"
    )]
    TargetPastPageTop {
        block: usize,
        offset: u64,
        page_size: u64,
    },
    #[error("blocks {first} and {second} solved to the same section offset {offset:#x}")]
    DuplicateSectionOffset {
        offset: u64,
        first: usize,
        second: usize,
    },
}

/// All mutable state of one solve. A fresh `Solver` is built per call so
/// that nothing leaks between compilations.
pub(crate) struct Solver<'a> {
    pub(crate) free: FreeList,
    used_frames: FxHashSet<u64>,
    page_to_frame: FxHashMap<u64, u64>,
    registry: &'a VictimRegistry,
    page_size: u64,
}

impl<'a> Solver<'a> {
    pub(crate) fn new(registry: &'a VictimRegistry, page_size: u64) -> Self {
        Self {
            free: FreeList::new(),
            used_frames: FxHashSet::default(),
            page_to_frame: FxHashMap::default(),
            registry,
            page_size,
        }
    }

    /// Best-fit victim search: over every registry entry, pick the unused
    /// frame whose page offset sits closest above `target_offset` (least
    /// leading padding), with matching bit index and sign. A victim exactly
    /// at the target offset is rejected. Marks the winning frame used.
    pub(crate) fn find_victim(
        &mut self,
        target_offset: u64,
        bit: u8,
        sign: Sign,
    ) -> Result<(usize, usize), SolveError> {
        let page = self.page_size;
        let mut best: Option<(usize, usize, u64)> = None;

        for (frame_index, frame) in self.registry.frames().iter().enumerate() {
            for (entry_index, victim) in frame.iter().enumerate() {
                let lead = victim.offset_in_frame(page) as i64 - target_offset as i64;
                if lead <= 0 {
                    continue;
                }
                if victim.bit != bit || victim.sign != sign {
                    continue;
                }
                if self.used_frames.contains(&(victim.addr / page)) {
                    continue;
                }
                if best.is_none_or(|(_, _, b)| (lead as u64) < b) {
                    best = Some((frame_index, entry_index, lead as u64));
                }
            }
        }

        let (frame, entry, _) = best.ok_or(SolveError::NotEnoughVictims {
            bit,
            sign,
            target_offset,
        })?;
        self.used_frames
            .insert(self.registry.get(frame, entry).addr / page);
        Ok((frame, entry))
    }

    /// First fit: the first interval at or after `cursor` large enough for
    /// `size`. The sentinel tail guarantees one exists.
    pub(crate) fn assign_spot(&mut self, cursor: usize, size: u64) -> (usize, u64, Rollback) {
        let mut index = cursor;
        while self.free.spans()[index].size < size {
            index += 1;
        }
        let offset = self.free.spans()[index].start;
        let rollback = self.free.reserve(index, 0, size);
        (index, offset, rollback)
    }

    /// Place a normal/flip destination pair exactly `dist` bytes apart.
    /// Tries each interval for the normal block in turn; if the spot at
    /// `dist` is not free and large enough, rolls the normal placement back
    /// and advances the cursor past the failed interval.
    pub(crate) fn assign_spot_at_dist(
        &mut self,
        normal_size: u64,
        flip_size: u64,
        dist: u64,
    ) -> (u64, u64) {
        let mut cursor = 0;
        loop {
            let (index, normal_offset, rollback) = self.assign_spot(cursor, normal_size);
            let flip_offset = normal_offset + dist;

            if let Some(reach) = self.free.span_reaching(flip_offset) {
                let span = self.free.spans()[reach];
                if span.end() >= flip_offset + flip_size {
                    self.free.reserve(reach, flip_offset - span.start, flip_size);
                    return (normal_offset, flip_offset);
                }
            }

            self.free.undo(rollback);
            debug_assert!(index + 1 > cursor);
            cursor = index + 1;
        }
    }

    /// Place a block so that its target byte lands on the victim's page
    /// offset, subject to the frame constraint: each section page is
    /// claimed by at most one victim frame.
    pub(crate) fn assign_spot_victim(&mut self, size: u64, target_offset: u64, victim_addr: u64) -> u64 {
        let page = self.page_size;
        debug_assert!(target_offset < size);
        let victim_offset = victim_addr % page;
        let frame = victim_addr / page;

        let found = self.free.spans().iter().position(|span| {
            let head_fits = target_offset + span.start % page <= victim_offset;
            let tail_fits =
                (size - target_offset) + victim_offset <= span.start % page + span.size;
            let frame_ok = self
                .page_to_frame
                .get(&(span.start / page))
                .is_none_or(|assigned| *assigned == frame);
            head_fits && tail_fits && frame_ok
        });

        // No interval works when every candidate starts too deep into its
        // page; carve a fresh page off the sentinel tail and use that.
        let index = match found {
            Some(index) => index,
            None => {
                let last = self.free.last_index();
                let span = self.free.spans()[last];
                self.free.split(last, page - span.start % page);
                last + 1
            }
        };

        let span = self.free.spans()[index];
        let base = (span.start + target_offset) % page;
        let block_offset = (victim_offset + page - base) % page;
        let section_offset = span.start + block_offset;

        // Frames are consumed once per solve, so the page can only carry
        // an assignment to this same frame, never to another.
        let page_index = span.start / page;
        let previous = self.page_to_frame.insert(page_index, frame);
        debug_assert!(previous.is_none_or(|assigned| assigned == frame));
        self.free.reserve(index, block_offset, size);

        // The sentinel tail must stay free of frame assignments so later
        // placements always have an unconstrained region to fall back to.
        let last = self.free.last_index();
        let tail = self.free.spans()[last];
        if tail.start / page == page_index {
            self.free.split(last, page - tail.start % page);
        }

        section_offset
    }
}

/// Solve the layout puzzle: assign every block a section offset such that
/// bit demands land on victims, destination pairs sit `2^B` apart, no two
/// blocks overlap, and no two victims share a page frame.
pub fn solve(
    blocks: &[Block],
    registry: &VictimRegistry,
    page_size: u64,
) -> Result<Solution, SolveError> {
    assert!(page_size.is_power_of_two());

    let max_size = blocks.iter().map(|block| block.size).max().unwrap_or(1).max(1);
    let pair_distance = max_size.next_power_of_two();
    let pair_bit = pair_distance.trailing_zeros();
    if pair_bit >= 32 {
        return Err(SolveError::PairDistanceTooWide {
            bit: pair_bit,
            max_size,
        });
    }
    let jump_byte_offset = u64::from(pair_bit / 8);
    let jump_bit = (pair_bit % 8) as u8;

    let mut solver = Solver::new(registry, page_size);
    let mut placements: BTreeMap<u64, Placement> = BTreeMap::new();

    let record = |placements: &mut BTreeMap<u64, Placement>,
                      offset: u64,
                      placement: Placement|
     -> Result<(), SolveError> {
        if let Some(previous) = placements.get(&offset) {
            return Err(SolveError::DuplicateSectionOffset {
                offset,
                first: previous.block,
                second: placement.block,
            });
        }
        placements.insert(offset, placement);
        Ok(())
    };

    // Destination pairs first: both halves of each pair go down together so
    // the fixed distance is available while the space is still mostly free.
    for block in blocks {
        let BlockKind::JumpOffset { normal, flip, .. } = block.kind else {
            continue;
        };
        let (normal_offset, flip_offset) =
            solver.assign_spot_at_dist(blocks[normal].size, blocks[flip].size, pair_distance);
        record(
            &mut placements,
            normal_offset,
            Placement {
                block: normal,
                victim: None,
            },
        )?;
        record(
            &mut placements,
            flip_offset,
            Placement {
                block: flip,
                victim: None,
            },
        )?;
    }

    // Then every non-destination block, in bundle order.
    for (index, block) in blocks.iter().enumerate() {
        let (target_offset, bit, sign) = match block.kind {
            BlockKind::Destination => continue,
            BlockKind::Plain => {
                let (_, offset, _) = solver.assign_spot(0, block.size);
                record(
                    &mut placements,
                    offset,
                    Placement {
                        block: index,
                        victim: None,
                    },
                )?;
                continue;
            }
            BlockKind::FixedBit {
                target_offset,
                bit,
                sign,
            } => (target_offset, bit, sign),
            BlockKind::JumpOffset { target_offset, .. } => {
                // Shift to the byte of the jump offset that holds the flip bit.
                (target_offset + jump_byte_offset, jump_bit, Sign::Plus)
            }
        };

        if target_offset >= page_size {
            return Err(SolveError::TargetPastPageTop {
                block: index,
                offset: target_offset,
                page_size,
            });
        }

        let (frame, entry) = solver.find_victim(target_offset, bit, sign)?;
        let victim_addr = registry.get(frame, entry).addr;
        let section_offset = solver.assign_spot_victim(block.size, target_offset, victim_addr);
        record(
            &mut placements,
            section_offset,
            Placement {
                block: index,
                victim: Some(PlacedVictim {
                    frame,
                    entry,
                    byte_offset: target_offset + section_offset,
                }),
            },
        )?;
    }

    Ok(Solution {
        placements,
        pair_bit,
        pair_distance,
    })
}
