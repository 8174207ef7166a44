use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use flipfit_solve::{Solution, VictimRegistry};

/// The layout record consumed by the physical loader: one line per placed
/// victim with the section offset of the target byte, the victim address,
/// its bit and sign, the aggressor rows, and the aggressor init byte.
pub fn compiler_output(section: &str, solution: &Solution, registry: &VictimRegistry) -> String {
    let mut out = String::from("[General]\n\n[Layout]\n");
    for placement in solution.placements.values() {
        let Some(victim) = &placement.victim else {
            continue;
        };
        let bit = registry.get(victim.frame, victim.entry);
        out.push_str(&format!(
            "{section} 0x{:x} 0x{:x} {}{}",
            victim.byte_offset, bit.addr, bit.bit, bit.sign
        ));
        let mut separator = ' ';
        for aggressor in &bit.aggressors {
            out.push_str(&format!("{separator}0x{aggressor:x}"));
            separator = ',';
        }
        out.push_str(&format!(" 0x{:x}\n", bit.aggressor_init));
    }
    out
}

/// The page-allocation record: aggressor rows followed by the victim
/// address (unprefixed hex), one line per placed victim.
pub fn page_allocation(solution: &Solution, registry: &VictimRegistry) -> String {
    let mut out = String::new();
    for placement in solution.placements.values() {
        let Some(victim) = &placement.victim else {
            continue;
        };
        let bit = registry.get(victim.frame, victim.entry);
        out.push_str("0,");
        for aggressor in &bit.aggressors {
            out.push_str(&format!("0x{aggressor:x},"));
        }
        out.push_str(&format!("{:x}\n", bit.addr));
    }
    out
}

/// Write both record files into `dir`, tagged with the compilation id.
pub fn write_records(
    dir: &Path,
    id: &str,
    section: &str,
    solution: &Solution,
    registry: &VictimRegistry,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory '{}'", dir.display()))?;

    let output_path = dir.join(format!("compiler_output_{id}.txt"));
    std::fs::write(&output_path, compiler_output(section, solution, registry))
        .with_context(|| format!("failed to write '{}'", output_path.display()))?;

    let allocation_path = dir.join(format!("page_allocation_{id}.txt"));
    std::fs::write(&allocation_path, page_allocation(solution, registry))
        .with_context(|| format!("failed to write '{}'", allocation_path.display()))?;

    Ok((output_path, allocation_path))
}
