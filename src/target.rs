//! Target dispatcher.
//!
//! Sequences one translation: read the ELF, reconcile exports against the
//! DEF file, build the export table and descriptor, then emit the
//! requested outputs. DLL targets regenerate the DEF and DSO; EXE targets
//! skip both but still get an export surface when they export anything.

use std::fs::File;

use anyhow::{Context, Result};
use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::def;
use crate::descriptor;
use crate::dso;
use crate::error::Error;
use crate::exports::ExportView;
use crate::image;
use crate::reconcile::{self, Flags};
use crate::symbol::Symbol;
use crate::table::ExportTable;

/// Runs a full translation, one shot.
pub fn run(config: &Config) -> Result<()> {
    let path = &config.elf_input;
    let file = File::open(path).map_err(|e| Error::elf_read(path, e))?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::elf_read(path, e))?;
    let obj = object::File::parse(&*mmap).map_err(|e| Error::elf_read(path, e))?;

    let mut view = ExportView::from_object(&obj, path)?;
    let is_dll = view.is_dll();
    debug!(
        "{} is {}",
        path.display(),
        if is_dll { "a DLL" } else { "an EXE" }
    );

    // EXE targets carry no frozen interface; their exports (if any) are
    // reconciled against an empty DEF set.
    let def_symbols = if is_dll {
        read_def(config)?
    } else {
        Vec::new()
    };

    let symbols = reconcile_exports(config, def_symbols, &mut view)?;

    let ordered = view.in_ordinal_order();
    let table = ExportTable::build(&ordered, view.entry_sentinel());
    let descriptor = descriptor::encode(&table);

    if is_dll {
        if let Some(out) = &config.def_output {
            def::write_file(out, &symbols)?;
            info!("wrote DEF file {}", out.display());
        }
        write_dso(config, &symbols)?;
    }

    if let Some(out) = &config.output {
        let source = image::gather(&obj, path)?;
        image::write(
            out,
            &source,
            &table,
            &descriptor,
            is_dll,
            config.named_symlookup,
        )?;
        info!("wrote E32 image {}", out.display());
    } else {
        warn!("--output not specified; skipping E32 image");
    }

    Ok(())
}

fn read_def(config: &Config) -> Result<Vec<Symbol>> {
    let Some(path) = &config.def_input else {
        return Ok(Vec::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read DEF file {}", path.display()))?;
    Ok(def::parse(&text, path)?)
}

/// Runs the reconciler. A frozen-mode failure still flushes the partial
/// symbol list into the regenerated DEF so the operator can inspect what
/// was lost, then surfaces the fatal error.
fn reconcile_exports(
    config: &Config,
    def_symbols: Vec<Symbol>,
    view: &mut ExportView,
) -> Result<Vec<Symbol>> {
    let flags: Flags = config.reconcile_flags();
    match reconcile::reconcile(def_symbols, view, &flags) {
        Ok(symbols) => Ok(symbols),
        Err(failure) => {
            if let Some(out) = &config.def_output {
                def::write_file(out, &failure.partial)?;
                info!("wrote DEF file {}", out.display());
            }
            Err(Error::SymbolsMissingFromElf {
                file: config.elf_input.clone(),
                missing: failure.missing,
            }
            .into())
        }
    }
}

fn write_dso(config: &Config, symbols: &[Symbol]) -> Result<()> {
    let Some(out) = &config.dso_output else {
        warn!("--dso not specified; skipping import library");
        return Ok(());
    };
    let soname = match &config.link_as {
        Some(name) => name.clone(),
        None => out
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    dso::write(out, symbols, &soname)?;
    info!("wrote DSO {}", out.display());
    Ok(())
}
