use anyhow::{Result, bail};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::target::TargetSpec;

pub type FragmentId = u32;

/// A byte range emitted by the assembler. Ids are stable for the lifetime
/// of a program, so symbols stay valid when fragments are spliced around.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: FragmentId,
    pub kind: FragmentKind,
    /// Attached by the tagging pass; at most one per fragment.
    pub target: Option<TargetSpec>,
}

#[derive(Debug, Clone)]
pub enum FragmentKind {
    Data { bytes: Vec<u8>, fixups: Vec<Fixup> },
    Fill { value: u8, size: u64 },
    Align { alignment: u64 },
}

/// A 32-bit PC-relative reference to a symbol, patched after layout.
#[derive(Debug, Clone)]
pub struct Fixup {
    /// Byte offset of the 32-bit field inside the fragment.
    pub offset: u64,
    pub symbol: String,
}

pub const FIXUP_WIDTH: u64 = 4;

impl Fragment {
    pub fn size_at(&self, offset: u64) -> u64 {
        match &self.kind {
            FragmentKind::Data { bytes, .. } => bytes.len() as u64,
            FragmentKind::Fill { size, .. } => *size,
            FragmentKind::Align { alignment } => {
                if *alignment <= 1 {
                    0
                } else {
                    (*alignment - offset % *alignment) % *alignment
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub fragments: Vec<Fragment>,
    /// The section's begin symbol binding; must always name the first
    /// fragment, the linker derives inter-section offsets from it.
    pub begin_fragment: Option<FragmentId>,
}

#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub section: String,
    pub fragment: FragmentId,
    pub offset: u64,
}

/// Sections in creation order plus the symbol table.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub sections: IndexMap<String, Section>,
    pub symbols: FxHashMap<String, SymbolDef>,
    next_fragment: FragmentId,
}

impl Program {
    /// Allocate a fragment with a fresh id without attaching it anywhere.
    pub fn alloc_fragment(&mut self, kind: FragmentKind) -> Fragment {
        let id = self.next_fragment;
        self.next_fragment += 1;
        Fragment {
            id,
            kind,
            target: None,
        }
    }

    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        self.sections
            .entry(name.to_string())
            .or_insert_with(|| Section {
                name: name.to_string(),
                fragments: Vec::new(),
                begin_fragment: None,
            })
    }

    /// Append a new fragment to `section` and return its id.
    pub fn push_fragment(&mut self, section: &str, kind: FragmentKind) -> FragmentId {
        let fragment = self.alloc_fragment(kind);
        let id = fragment.id;
        let section = self.section_mut(section);
        if section.fragments.is_empty() {
            section.begin_fragment = Some(id);
        }
        section.fragments.push(fragment);
        id
    }

    pub fn define_symbol(
        &mut self,
        name: impl Into<String>,
        section: &str,
        fragment: FragmentId,
        offset: u64,
    ) -> Result<()> {
        let name = name.into();
        let def = SymbolDef {
            section: section.to_string(),
            fragment,
            offset,
        };
        if self.symbols.insert(name.clone(), def).is_some() {
            bail!("duplicate symbol '{name}'");
        }
        Ok(())
    }

    /// Set every align fragment in `section` to alignment 1 so alignment
    /// padding cannot shift fragment offsets between the two rounds.
    pub fn neutralize_aligns(&mut self, section: &str) {
        let Some(section) = self.sections.get_mut(section) else {
            return;
        };
        for fragment in &mut section.fragments {
            if let FragmentKind::Align { alignment } = &mut fragment.kind {
                *alignment = 1;
            }
        }
    }
}
