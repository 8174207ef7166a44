use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use flipfit_asm::{Mode, TargetIndex, build, format_trace};
use flipfit_solve::VictimRegistry;

#[derive(Debug, Parser)]
#[command(
    name = "flipfit",
    version,
    about = "Assembler with physically constrained code layout for bit-flip experiments",
    long_about = None,
    after_help = "Examples:\n  flipfit program.s\n  flipfit --dbl-mode offsets --TO targets.toml program.s\n  flipfit --dbl-mode dbl --TO targets.toml --VA victims.txt --dbl-id run1 program.s"
)]
struct Cli {
    /// Input assembly source file.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Pipeline selection: plain assembly, tag-and-verify, or the full
    /// two-round constrained layout.
    #[arg(long = "dbl-mode", value_enum, default_value_t = CliMode::Baseline)]
    dbl_mode: CliMode,

    /// Target offsets file (TOML).
    #[arg(long = "TO", value_name = "FILE")]
    target_offsets: Option<PathBuf>,

    /// Victim addresses file (text, one candidate per line).
    #[arg(long = "VA", value_name = "FILE")]
    victim_addresses: Option<PathBuf>,

    /// Directory for the layout record files.
    #[arg(long = "dbl-output", value_name = "DIR", default_value = ".")]
    dbl_output: PathBuf,

    /// Identifier suffix for the record file names.
    #[arg(long = "dbl-id", value_name = "ID", default_value = "")]
    dbl_id: String,

    /// Output image path. Defaults to the input path with a .bin extension.
    #[arg(short = 'o', long = "output", value_name = "OUTPUT_FILE")]
    output: Option<PathBuf>,

    /// Page size used for all frame arithmetic.
    #[arg(long = "page-size", value_name = "BYTES", default_value_t = 4096)]
    page_size: u64,

    /// Optional listing output path.
    #[arg(long = "listing", value_name = "LISTING_FILE")]
    listing: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Baseline,
    Offsets,
    Dbl,
}

impl CliMode {
    fn mode(self) -> Mode {
        match self {
            Self::Baseline => Mode::Baseline,
            Self::Offsets => Mode::Offsets,
            Self::Dbl => Mode::Dbl,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if !cli.page_size.is_power_of_two() {
        anyhow::bail!("page size {} must be a power of two", cli.page_size);
    }

    let mode = cli.dbl_mode.mode();

    let targets = match (&cli.target_offsets, mode) {
        (_, Mode::Baseline) => None,
        (Some(path), _) => Some(TargetIndex::load(path)?),
        (None, _) => anyhow::bail!("--TO is required in offsets and dbl modes"),
    };

    let registry = match (&cli.victim_addresses, mode) {
        (Some(path), Mode::Dbl) => {
            let text = std::fs::read_to_string(path).map_err(|err| {
                anyhow::anyhow!("failed to read victim file '{}': {err}", path.display())
            })?;
            Some(VictimRegistry::parse(
                &path.display().to_string(),
                &text,
                cli.page_size,
            )?)
        }
        (None, Mode::Dbl) => anyhow::bail!("--VA is required in dbl mode"),
        _ => None,
    };

    let source = std::fs::read_to_string(&cli.input).map_err(|err| {
        anyhow::anyhow!("failed to read input '{}': {err}", cli.input.display())
    })?;

    let output = build(&source, mode, targets, registry.as_ref(), cli.page_size)?;

    if let Some(outcome) = &output.outcome {
        let registry = registry.as_ref().expect("dbl mode parsed a registry");
        eprint!("{}", format_trace(outcome, registry));
        let (output_record, allocation_record) = flipfit_asm::records::write_records(
            &cli.dbl_output,
            &cli.dbl_id,
            &outcome.section,
            &outcome.solution,
            registry,
        )?;
        eprintln!("wrote {}", output_record.display());
        eprintln!("wrote {}", allocation_record.display());
    }

    let output_path = cli
        .output
        .unwrap_or_else(|| default_output_path(&cli.input));
    std::fs::write(&output_path, &output.image).map_err(|err| {
        anyhow::anyhow!("failed to write '{}': {err}", output_path.display())
    })?;

    if let Some(path) = cli.listing {
        std::fs::write(&path, &output.listing)
            .map_err(|err| anyhow::anyhow!("failed to write '{}': {err}", path.display()))?;
    }

    Ok(())
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("out");
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}.bin"))
}
