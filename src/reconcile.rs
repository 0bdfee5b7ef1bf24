//! Export reconciliation.
//!
//! Joins the symbol list parsed from the DEF file with the exports pulled
//! out of the ELF, classifies every symbol and assigns stable ordinals.
//! Once an ordinal has been handed out it is never reused, even after the
//! symbol is deleted and its slot goes absent.
//!
//! With `D` the DEF symbols partitioned into valid (`Dv`) and absent
//! (`Da`) sets, and `E` the ELF exports, the four phases are:
//!
//! 1. `Dv − E`: frozen exports gone from the ELF. Fatal unless unfrozen.
//! 2. `Da ∩ E`: symbols marked ABSENT but exported anyway. Warn; the DEF
//!    keeps the ABSENT line while the export slot gets the real address.
//! 3. `E − Dv`: new exports. Filtered or given the next free ordinal.
//! 4. `Da − E`: absent carry-overs, re-registered so their slots survive.
//!
//! All set operations compare by name over name-sorted vectors.

use tracing::warn;

use crate::exports::ExportView;
use crate::symbol::{Symbol, SymbolKind, SymbolStatus};

/// Runtime-support symbols excluded from custom DLL exports.
pub const UNWANTED_RUNTIME_SYMBOLS: &[&str] = &[
    "_ZdaPv",
    "_ZdaPvRKSt9nothrow_t",
    "_ZdlPv",
    "_ZdlPvRKSt9nothrow_t",
    "_Znaj",
    "_ZnajRKSt9nothrow_t",
    "_Znwj",
    "_ZnwjRKSt9nothrow_t",
    "__cxa_bad_cast",
    "__cxa_bad_typeid",
    "__cxa_begin_catch",
    "__cxa_begin_cleanup",
    "__cxa_call_unexpected",
    "__cxa_end_catch",
    "__cxa_end_cleanup",
    "__cxa_free_exception",
    "__cxa_get_exception_ptr",
    "__cxa_guard_abort",
    "__cxa_guard_acquire",
    "__cxa_guard_release",
    "__cxa_pure_virtual",
    "__cxa_rethrow",
    "__cxa_throw",
    "__cxa_type_match",
    "__aeabi_unwind_cpp_pr0",
    "__aeabi_unwind_cpp_pr1",
    "__aeabi_unwind_cpp_pr2",
    "__gxx_personality_v0",
    "_Unwind_Backtrace",
    "_Unwind_Complete",
    "_Unwind_DeleteException",
    "_Unwind_ForcedUnwind",
    "_Unwind_RaiseException",
    "_Unwind_Resume",
    "_Unwind_Resume_or_Rethrow",
    "_Unwind_VRS_Get",
    "_Unwind_VRS_Pop",
    "_Unwind_VRS_Set",
];

/// Option flags consumed by the reconciler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    /// Allow missing frozen exports (warn instead of failing).
    pub unfrozen: bool,
    /// Drop new `_ZTI`/`_ZTV` exports instead of admitting them.
    pub ignore_non_callable: bool,
    pub custom_dll: bool,
    pub exclude_unwanted_exports: bool,
    /// One warning line per newly admitted export.
    pub warn_new_exports: bool,
}

/// Phase-1 failure: frozen exports missing in frozen mode.
///
/// `partial` is the output list as it stood when the check failed (the
/// valid DEF symbols with missing statuses applied); the caller flushes it
/// into a regenerated DEF before reporting the fatal error.
#[derive(Debug)]
pub struct MissingFrozenExports {
    pub partial: Vec<Symbol>,
    pub missing: Vec<String>,
}

/// True when the name belongs to the runtime-support set. The export name
/// is matched by containment within a list entry.
pub fn is_unwanted(name: &str) -> bool {
    UNWANTED_RUNTIME_SYMBOLS.iter().any(|u| u.contains(name))
}

/// Reconciles DEF symbols against the ELF export view.
///
/// On success returns the output list sorted by ordinal, with ordinals
/// synced back onto the view and filtered names erased from it.
pub fn reconcile(
    def_symbols: Vec<Symbol>,
    view: &mut ExportView,
    flags: &Flags,
) -> Result<Vec<Symbol>, MissingFrozenExports> {
    let mut max_ordinal = def_symbols
        .iter()
        .filter_map(|s| s.ordinal)
        .max()
        .unwrap_or(0);

    let (mut def_absent, mut def_valid): (Vec<Symbol>, Vec<Symbol>) =
        def_symbols.into_iter().partition(|s| s.absent);
    def_valid.sort();
    def_absent.sort();

    let mut elf: Vec<Symbol> = view.exports().cloned().collect();
    elf.sort();

    let valid_names: Vec<String> = def_valid.iter().map(|s| s.name.clone()).collect();

    // Phase 1: Dv − E. The output list starts as Dv; names matched in the
    // ELF absorb its address, size and kind, the rest go missing.
    let mut out: Vec<Symbol> = Vec::with_capacity(def_valid.len());
    let mut missing: Vec<String> = Vec::new();
    {
        let mut j = 0;
        for mut sym in def_valid {
            while j < elf.len() && elf[j].name < sym.name {
                j += 1;
            }
            if j < elf.len() && elf[j].name == sym.name {
                if sym.kind != elf[j].kind {
                    warn!(
                        "export {} declared {:?} in DEF but {:?} by name derivation",
                        sym.name, sym.kind, elf[j].kind
                    );
                }
                sym.kind = elf[j].kind;
                sym.size = elf[j].size;
                sym.address = elf[j].address;
                view.sync(&sym.name, sym.ordinal, false);
                j += 1;
            } else {
                sym.status = SymbolStatus::Missing;
                missing.push(sym.name.clone());
            }
            out.push(sym);
        }
    }
    if !missing.is_empty() {
        if !flags.unfrozen {
            return Err(MissingFrozenExports {
                partial: out,
                missing,
            });
        }
        warn!(
            "{} frozen export(s) missing from the ELF file",
            missing.len()
        );
    }

    // Phase 2: Da ∩ E. The symbol was frozen out but the ELF still exports
    // it; keep the DEF ordinal and ABSENT line, give the slot the address.
    // The ELF-side record is annotated absent so Phase 3 won't re-admit it.
    for sym in &def_absent {
        if let Ok(i) = elf.binary_search_by(|s| s.name.as_str().cmp(&sym.name)) {
            warn!(
                "symbol {} absent in the DEF file, but present in the ELF file",
                sym.name
            );
            let mut kept = sym.clone();
            kept.kind = elf[i].kind;
            kept.size = elf[i].size;
            kept.address = elf[i].address;
            view.sync(&sym.name, sym.ordinal, false);
            elf[i].absent = true;
            out.push(kept);
        }
    }

    // Phase 3: E − Dv, ascending by name so ordinal assignment is
    // deterministic.
    {
        let mut j = 0;
        for elf_sym in &elf {
            while j < valid_names.len() && valid_names[j].as_str() < elf_sym.name.as_str() {
                j += 1;
            }
            if j < valid_names.len() && valid_names[j] == elf_sym.name {
                continue;
            }
            if elf_sym.absent {
                continue;
            }
            if (flags.custom_dll || flags.exclude_unwanted_exports) && is_unwanted(&elf_sym.name) {
                view.filter_out(&elf_sym.name);
                continue;
            }
            if flags.ignore_non_callable
                && (elf_sym.name.starts_with("_ZTI") || elf_sym.name.starts_with("_ZTV"))
            {
                view.filter_out(&elf_sym.name);
                continue;
            }
            max_ordinal += 1;
            let mut sym = elf_sym.clone();
            sym.ordinal = Some(max_ordinal);
            sym.status = SymbolStatus::New;
            view.sync(&sym.name, sym.ordinal, false);
            if flags.warn_new_exports {
                warn!("new symbol {} found, export(s) not yet frozen", sym.name);
            }
            out.push(sym);
        }
    }

    // Phase 4: Da − E. The ordinal stays reserved; a fresh code symbol is
    // registered back into the view so the slot gets its sentinel.
    for sym in &def_absent {
        if elf
            .binary_search_by(|s| s.name.as_str().cmp(&sym.name))
            .is_err()
        {
            let mut copy = sym.clone();
            copy.kind = SymbolKind::Code;
            copy.absent = true;
            view.add(copy.clone());
            out.push(copy);
        }
    }

    out.sort_by_key(|s| s.ordinal.unwrap_or(0));
    view.erase_filtered();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{is_unwanted, reconcile, Flags};
    use crate::exports::ExportView;
    use crate::symbol::{Symbol, SymbolKind, SymbolStatus};

    fn def_sym(name: &str, ordinal: u32) -> Symbol {
        let mut s = Symbol::new(name);
        s.ordinal = Some(ordinal);
        s
    }

    fn elf_sym(name: &str, address: u32) -> Symbol {
        let mut s = Symbol::new(name);
        s.address = address;
        s.size = 4;
        s
    }

    fn view_of(symbols: Vec<Symbol>) -> ExportView {
        ExportView::new(symbols, 0x19, 0x8000, true)
    }

    #[test]
    fn happy_path_keeps_frozen_ordinals() {
        let defs = vec![def_sym("a", 1), def_sym("b", 2)];
        let mut view = view_of(vec![elf_sym("a", 0x8020), elf_sym("b", 0x8030)]);
        let out = reconcile(defs, &mut view, &Flags::default()).expect("frozen");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "a");
        assert_eq!(out[0].ordinal, Some(1));
        assert_eq!(out[0].address, 0x8020);
        assert_eq!(out[0].status, SymbolStatus::Matching);
        assert_eq!(out[1].name, "b");
        assert_eq!(out[1].ordinal, Some(2));
    }

    #[test]
    fn new_symbols_get_next_ordinal_in_name_order() {
        let defs = vec![def_sym("a", 1)];
        let mut view = view_of(vec![
            elf_sym("a", 0x8020),
            elf_sym("d", 0x8040),
            elf_sym("c", 0x8030),
        ]);
        let flags = Flags {
            unfrozen: true,
            ..Flags::default()
        };
        let out = reconcile(defs, &mut view, &flags).expect("unfrozen");
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].name, "c");
        assert_eq!(out[1].ordinal, Some(2));
        assert_eq!(out[1].status, SymbolStatus::New);
        assert_eq!(out[2].name, "d");
        assert_eq!(out[2].ordinal, Some(3));
    }

    #[test]
    fn missing_frozen_export_fails_with_partial_output() {
        let defs = vec![def_sym("a", 1), def_sym("b", 2)];
        let mut view = view_of(vec![elf_sym("a", 0x8020)]);
        let err = reconcile(defs, &mut view, &Flags::default()).unwrap_err();
        assert_eq!(err.missing, vec!["b".to_string()]);
        assert_eq!(err.partial.len(), 2);
        let b = err.partial.iter().find(|s| s.name == "b").unwrap();
        assert_eq!(b.status, SymbolStatus::Missing);
    }

    #[test]
    fn missing_frozen_export_warns_when_unfrozen() {
        let defs = vec![def_sym("a", 1), def_sym("b", 2)];
        let mut view = view_of(vec![elf_sym("a", 0x8020)]);
        let flags = Flags {
            unfrozen: true,
            ..Flags::default()
        };
        let out = reconcile(defs, &mut view, &flags).expect("unfrozen tolerates missing");
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].status, SymbolStatus::Missing);
        // The missing symbol never reaches the export surface.
        assert_eq!(view.in_ordinal_order().len(), 1);
    }

    #[test]
    fn absent_carry_over_reserves_ordinal() {
        let mut absent = def_sym("b", 2);
        absent.absent = true;
        let defs = vec![def_sym("a", 1), absent];
        let mut view = view_of(vec![elf_sym("a", 0x8020)]);
        let out = reconcile(defs, &mut view, &Flags::default()).expect("frozen");
        assert_eq!(out.len(), 2);
        assert!(out[1].absent);
        assert_eq!(out[1].ordinal, Some(2));
        assert_eq!(out[1].kind, SymbolKind::Code);
        // Registered back into the view so the table gets a slot for it.
        let ordered = view.in_ordinal_order();
        assert_eq!(ordered.len(), 2);
        assert!(ordered[1].absent);
    }

    #[test]
    fn absent_but_present_in_elf_keeps_def_line_and_real_slot() {
        let mut absent = def_sym("b", 2);
        absent.absent = true;
        let defs = vec![def_sym("a", 1), absent];
        let mut view = view_of(vec![elf_sym("a", 0x8020), elf_sym("b", 0x8030)]);
        let out = reconcile(defs, &mut view, &Flags::default()).expect("frozen");
        // Not re-admitted as a new export on top of the kept ordinal.
        assert_eq!(out.len(), 2);
        // The regenerated DEF keeps the ABSENT marking and the ordinal.
        let b = out.iter().find(|s| s.name == "b").unwrap();
        assert!(b.absent);
        assert_eq!(b.ordinal, Some(2));
        assert_eq!(b.address, 0x8030);
        // The export surface sees a live redefinition.
        let ordered = view.in_ordinal_order();
        let slot = ordered.iter().find(|s| s.name == "b").unwrap();
        assert!(!slot.absent);
        assert_eq!(slot.ordinal, Some(2));
    }

    #[test]
    fn new_ordinals_start_past_absent_ordinals() {
        let mut absent = def_sym("zz_gone", 5);
        absent.absent = true;
        let defs = vec![def_sym("a", 1), absent];
        let mut view = view_of(vec![elf_sym("a", 0x8020), elf_sym("b", 0x8030)]);
        let flags = Flags {
            unfrozen: true,
            ..Flags::default()
        };
        let out = reconcile(defs, &mut view, &flags).expect("unfrozen");
        let b = out.iter().find(|s| s.name == "b").unwrap();
        assert_eq!(b.ordinal, Some(6));
    }

    #[test]
    fn custom_dll_filters_unwanted_runtime_symbols() {
        let defs = vec![def_sym("a", 1)];
        let mut view = view_of(vec![
            elf_sym("a", 0x8020),
            elf_sym("__cxa_pure_virtual", 0x8040),
        ]);
        let flags = Flags {
            custom_dll: true,
            ..Flags::default()
        };
        let out = reconcile(defs, &mut view, &flags).expect("frozen");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a");
        assert!(view.filtered().contains("__cxa_pure_virtual"));
        assert!(view.exports().all(|s| s.name != "__cxa_pure_virtual"));
    }

    #[test]
    fn ignore_non_callable_filters_typeinfo_and_vtables() {
        let defs = vec![def_sym("a", 1)];
        let mut view = view_of(vec![
            elf_sym("a", 0x8020),
            elf_sym("_ZTV3Foo", 0x8040),
            elf_sym("_ZTI3Foo", 0x8050),
            elf_sym("_ZTS3Foo", 0x8060),
        ]);
        let flags = Flags {
            ignore_non_callable: true,
            unfrozen: true,
            ..Flags::default()
        };
        let out = reconcile(defs, &mut view, &flags).expect("unfrozen");
        // _ZTS is not filtered by this option; it becomes a new data export.
        let names: Vec<&str> = out.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "_ZTS3Foo"]);
        assert_eq!(out[1].kind, SymbolKind::Data);
        assert!(view.filtered().contains("_ZTV3Foo"));
        assert!(view.filtered().contains("_ZTI3Foo"));
    }

    #[test]
    fn empty_def_and_elf_reconcile_to_nothing() {
        let mut view = view_of(Vec::new());
        let out = reconcile(Vec::new(), &mut view, &Flags::default()).expect("empty");
        assert!(out.is_empty());
        assert!(view.in_ordinal_order().is_empty());
    }

    #[test]
    fn ordinals_stay_unique() {
        let mut absent = def_sym("gone", 3);
        absent.absent = true;
        let defs = vec![def_sym("a", 1), def_sym("b", 2), absent];
        let mut view = view_of(vec![
            elf_sym("a", 0x8020),
            elf_sym("b", 0x8030),
            elf_sym("n1", 0x8040),
            elf_sym("n2", 0x8050),
        ]);
        let flags = Flags {
            unfrozen: true,
            ..Flags::default()
        };
        let out = reconcile(defs, &mut view, &flags).expect("unfrozen");
        let mut ordinals: Vec<u32> = out.iter().filter_map(|s| s.ordinal).collect();
        let len = ordinals.len();
        ordinals.sort_unstable();
        ordinals.dedup();
        assert_eq!(ordinals.len(), len);
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn unwanted_matches_by_containment() {
        assert!(is_unwanted("__cxa_pure_virtual"));
        assert!(is_unwanted("_ZdlPv"));
        assert!(!is_unwanted("MyApi_Frobnicate"));
    }
}
