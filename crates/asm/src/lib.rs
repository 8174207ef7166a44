//! Two-round assembler pipeline with physically constrained layout.
//!
//! Round one assembles the input normally and tags the fragments that
//! contain the configured target offsets. Round two cuts the constrained
//! section into bundles, asks the solver for a layout in which every
//! target bit lands on a flippable victim bit's page offset, and rebuilds
//! the fragment list accordingly, padding the gaps with breakpoints.

pub mod bundle;
pub mod driver;
pub mod fragment;
pub mod layout;
pub mod lexer;
pub mod parser;
pub mod records;
pub mod round2;
pub mod tagger;
pub mod target;

pub use driver::{BuildOutput, Mode, build};
pub use fragment::{Fragment, FragmentKind, Program, Section};
pub use parser::parse_source;
pub use round2::{Round2Outcome, format_trace};
pub use target::{TargetIndex, TargetKind, TargetSpec};
