use std::collections::BTreeMap;
use std::fmt;

use ariadne::{Color, Config, IndexType, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Direction of a flippable bit: `Plus` charges 0 -> 1, `Minus` 1 -> 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Plus => write!(f, "+"),
            Sign::Minus => write!(f, "-"),
        }
    }
}

/// One flippable DRAM bit, as described by a line of the victim file.
#[derive(Debug, Clone)]
pub struct VictimBit {
    /// Physical address of the byte holding the bit.
    pub addr: u64,
    /// Bit index inside that byte, 0..8.
    pub bit: u8,
    pub sign: Sign,
    /// Frame-aligned addresses of the rows that hammer this bit.
    pub aggressors: Vec<u64>,
    /// Byte value the aggressor rows must be initialized with.
    pub aggressor_init: u8,
}

impl VictimBit {
    pub fn frame_addr(&self, page_size: u64) -> u64 {
        self.addr & !(page_size - 1)
    }

    pub fn offset_in_frame(&self, page_size: u64) -> u64 {
        self.addr & (page_size - 1)
    }
}

/// All known flippable bits, bucketed by physical page frame in ascending
/// frame-address order. Built once per compile and never mutated.
#[derive(Debug, Clone)]
pub struct VictimRegistry {
    frames: Vec<Vec<VictimBit>>,
}

#[derive(Debug, Error)]
#[error("{rendered}")]
pub struct VictimParseError {
    pub rendered: String,
}

impl VictimRegistry {
    pub fn from_bits(bits: Vec<VictimBit>, page_size: u64) -> Self {
        assert!(page_size.is_power_of_two());
        let mut buckets: BTreeMap<u64, Vec<VictimBit>> = BTreeMap::new();
        for bit in bits {
            buckets.entry(bit.frame_addr(page_size)).or_default().push(bit);
        }
        Self {
            frames: buckets.into_values().collect(),
        }
    }

    /// Parse the line-oriented victim file: one candidate per line,
    /// whitespace-separated `addr(hex) bit sign aggressors(csv hex)
    /// init(hex)`, `#` lines and blank lines skipped.
    pub fn parse(
        source_name: &str,
        text: &str,
        page_size: u64,
    ) -> Result<Self, VictimParseError> {
        let mut bits = Vec::new();
        let mut line_start = 0usize;

        for line in text.split_inclusive('\n') {
            let start = line_start;
            line_start += line.len();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let span = start..start + line.len().max(1);
            let fail = |message: String| VictimParseError {
                rendered: render_line_report(source_name, text, span.clone(), &message),
            };

            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() != 5 {
                return Err(fail(format!(
                    "expected 5 fields (addr bit sign aggressors init), found {}",
                    fields.len()
                )));
            }

            let addr = parse_hex(fields[0])
                .ok_or_else(|| fail(format!("invalid victim address '{}'", fields[0])))?;
            let bit: u8 = fields[1]
                .parse()
                .ok()
                .filter(|bit| *bit < 8)
                .ok_or_else(|| fail(format!("bit index '{}' must be 0..8", fields[1])))?;
            let sign = match fields[2] {
                "+" => Sign::Plus,
                "-" => Sign::Minus,
                other => return Err(fail(format!("sign '{other}' must be '+' or '-'"))),
            };
            let mut aggressors = Vec::new();
            for part in fields[3].split(',') {
                aggressors.push(
                    parse_hex(part)
                        .ok_or_else(|| fail(format!("invalid aggressor address '{part}'")))?,
                );
            }
            let aggressor_init = parse_hex(fields[4])
                .and_then(|value| u8::try_from(value).ok())
                .ok_or_else(|| fail(format!("invalid aggressor init byte '{}'", fields[4])))?;

            bits.push(VictimBit {
                addr,
                bit,
                sign,
                aggressors,
                aggressor_init,
            });
        }

        Ok(Self::from_bits(bits, page_size))
    }

    pub fn frames(&self) -> &[Vec<VictimBit>] {
        &self.frames
    }

    pub fn get(&self, frame: usize, entry: usize) -> &VictimBit {
        &self.frames[frame][entry]
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

fn render_line_report(
    source_name: &str,
    text: &str,
    span: std::ops::Range<usize>,
    message: &str,
) -> String {
    let mut output = Vec::new();
    let report = Report::build(ReportKind::Error, (source_name.to_string(), span.clone()))
        .with_config(
            Config::default()
                .with_index_type(IndexType::Byte)
                .with_color(false),
        )
        .with_message(format!("invalid victim file: {message}"))
        .with_label(
            Label::new((source_name.to_string(), span))
                .with_color(Color::Red)
                .with_message("in this candidate line"),
        )
        .finish();

    if report
        .write(
            (source_name.to_string(), Source::from(text.to_string())),
            &mut output,
        )
        .is_ok()
    {
        String::from_utf8_lossy(&output).into_owned()
    } else {
        format!("invalid victim file: {message}")
    }
}
