//! ELF export view.
//!
//! Wraps the external ELF reader: collects the dynamic exports as symbol
//! records, answers whether the image is a DLL, and owns the filtered-out
//! set the reconciler uses to suppress runtime-support and non-callable
//! exports. The reconciler holds no references into this view; it syncs
//! ordinals back by name after the join.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use object::{Object, ObjectSection, ObjectSymbol, SectionKind};

use crate::error::{Error, Result};
use crate::symbol::{kind_of, Symbol, SymbolStatus};

pub struct ExportView {
    /// Authoritative export list, keyed (and iterated) by name.
    exports: BTreeMap<String, Symbol>,
    /// Names suppressed from the export surface.
    filtered: BTreeSet<String>,
    entry_point_offset: u32,
    ro_base: u32,
    is_dll: bool,
}

impl ExportView {
    pub fn new(symbols: Vec<Symbol>, entry_point_offset: u32, ro_base: u32, is_dll: bool) -> Self {
        let exports = symbols.into_iter().map(|s| (s.name.clone(), s)).collect();
        ExportView {
            exports,
            filtered: BTreeSet::new(),
            entry_point_offset,
            ro_base,
            is_dll,
        }
    }

    /// Builds the view from a parsed ELF file.
    ///
    /// Exports are the defined global dynamic symbols; their kind comes
    /// from the name prefix, not from the ELF symbol type.
    pub fn from_object(obj: &object::File, path: &Path) -> Result<Self> {
        let ro_base = obj
            .sections()
            .filter(|s| matches!(s.kind(), SectionKind::Text | SectionKind::ReadOnlyData))
            .map(|s| s.address())
            .min()
            .unwrap_or(0) as u32;
        let entry_point_offset = (obj.entry() as u32).saturating_sub(ro_base);

        let mut symbols = Vec::new();
        for sym in obj.dynamic_symbols() {
            if sym.is_undefined() || sym.is_local() {
                continue;
            }
            let name = sym.name().map_err(|e| Error::elf_read(path, e))?;
            if name.is_empty() {
                continue;
            }
            let mut record = Symbol::new(name);
            record.kind = kind_of(name);
            record.address = sym.address() as u32;
            record.size = sym.size() as u32;
            symbols.push(record);
        }

        let is_dll = obj
            .symbols()
            .any(|s| s.name().is_ok_and(|n| n == "_E32Dll"));

        Ok(ExportView::new(symbols, entry_point_offset, ro_base, is_dll))
    }

    /// The exports in ascending name order.
    pub fn exports(&self) -> impl Iterator<Item = &Symbol> {
        self.exports.values()
    }

    pub fn has_exports(&self) -> bool {
        !self.exports.is_empty()
    }

    pub fn is_dll(&self) -> bool {
        self.is_dll
    }

    /// Sentinel address stored in absent export slots.
    pub fn entry_sentinel(&self) -> u32 {
        self.entry_point_offset + self.ro_base
    }

    pub fn entry_point_offset(&self) -> u32 {
        self.entry_point_offset
    }

    pub fn ro_base(&self) -> u32 {
        self.ro_base
    }

    /// Registers a symbol synthesized by the reconciler (absent carry-over).
    pub fn add(&mut self, sym: Symbol) {
        self.exports.insert(sym.name.clone(), sym);
    }

    /// Copies a reconciled ordinal (and absent flag) onto the export with
    /// the given name.
    pub fn sync(&mut self, name: &str, ordinal: Option<u32>, absent: bool) {
        if let Some(sym) = self.exports.get_mut(name) {
            sym.ordinal = ordinal;
            sym.absent = absent;
        }
    }

    /// Marks an export as suppressed. It stays in the list until
    /// [`erase_filtered`](Self::erase_filtered) runs.
    pub fn filter_out(&mut self, name: &str) {
        if let Some(sym) = self.exports.get_mut(name) {
            sym.status = SymbolStatus::Filtered;
        }
        self.filtered.insert(name.to_string());
    }

    pub fn filtered(&self) -> &BTreeSet<String> {
        &self.filtered
    }

    /// Drops every filtered name from the authoritative export list.
    pub fn erase_filtered(&mut self) {
        for name in &self.filtered {
            self.exports.remove(name);
        }
    }

    /// The reconciled exports in ascending ordinal order. Exports that
    /// never received an ordinal are not part of the export surface.
    pub fn in_ordinal_order(&self) -> Vec<Symbol> {
        let mut ordered: Vec<Symbol> = self
            .exports
            .values()
            .filter(|s| s.ordinal.is_some())
            .cloned()
            .collect();
        ordered.sort_by_key(|s| s.ordinal);
        ordered
    }
}
