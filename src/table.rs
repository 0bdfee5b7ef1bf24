//! Export table construction.
//!
//! The table is a dense array with one 32-bit slot per ordinal: slot
//! `i - 1` holds the image-relative virtual address of the export with
//! ordinal `i`. Gaps and absent exports hold the sentinel address (the
//! image entry point), which is what the descriptor encoder later keys on.

use crate::symbol::{Symbol, SymbolStatus};

pub struct ExportTable {
    /// One virtual address per ordinal, ordinal 1 at index 0.
    pub addresses: Vec<u32>,
    /// Address stored in slots that must trap: `entry_point + ro_base`.
    pub sentinel: u32,
}

impl ExportTable {
    /// Builds the table from the reconciled, ordinal-ordered export list.
    ///
    /// Missing symbols never reach the table; absent symbols keep their
    /// slot but trap at the entry point.
    pub fn build(symbols: &[Symbol], sentinel: u32) -> Self {
        let max_ordinal = symbols.iter().filter_map(|s| s.ordinal).max().unwrap_or(0);
        let mut addresses = vec![sentinel; max_ordinal as usize];
        for sym in symbols {
            if sym.status == SymbolStatus::Missing || sym.absent {
                continue;
            }
            if let Some(ordinal) = sym.ordinal {
                addresses[(ordinal - 1) as usize] = sym.address;
            }
        }
        ExportTable { addresses, sentinel }
    }

    pub fn num_exports(&self) -> usize {
        self.addresses.len()
    }

    /// True when slot `index` holds the trap address.
    pub fn is_absent(&self, index: usize) -> bool {
        self.addresses[index] == self.sentinel
    }

    /// Serialized little-endian form: one reserved header word (filled in
    /// by the image writer) followed by the address slots.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 * (self.addresses.len() + 1));
        bytes.extend_from_slice(&0u32.to_le_bytes());
        for addr in &self.addresses {
            bytes.extend_from_slice(&addr.to_le_bytes());
        }
        bytes
    }
}
