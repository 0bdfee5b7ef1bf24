//! Command-line configuration.
//!
//! The translator is normally driven by a build system, so every input and
//! output is an explicit long option rather than a positional argument.
//! Only `--elfinput` is mandatory; emission steps whose output path is
//! missing are skipped with a warning.

use clap::Parser;
use std::path::PathBuf;

use crate::reconcile::Flags;

/// Translates a post-linked ELF binary into an E32 image, reconciling its
/// exports against a frozen DEF file.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Config {
    /// Input ELF shared object or executable.
    #[arg(long = "elfinput", value_name = "FILE")]
    pub elf_input: PathBuf,

    /// Input DEF file holding the frozen exports.
    #[arg(long = "definput", value_name = "FILE")]
    pub def_input: Option<PathBuf>,

    /// Output E32 image.
    #[arg(long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Regenerated DEF file.
    #[arg(long = "defoutput", value_name = "FILE")]
    pub def_output: Option<PathBuf>,

    /// Proxy DSO (import library) for dependents.
    #[arg(long = "dso", value_name = "FILE")]
    pub dso_output: Option<PathBuf>,

    /// Name dependents link against at runtime (the DSO soname).
    #[arg(long = "linkas", value_name = "NAME")]
    pub link_as: Option<String>,

    /// Tolerate frozen exports missing from the ELF (warn instead of fail).
    #[arg(long)]
    pub unfrozen: bool,

    /// Do not export new typeinfo and vtable symbols.
    #[arg(long = "ignore-non-callable")]
    pub ignore_non_callable: bool,

    /// Restrict exports to the frozen DEF set for a custom DLL.
    #[arg(long = "custom-dll")]
    pub custom_dll: bool,

    /// Drop runtime-support symbols from the new-export set.
    #[arg(long = "exclude-unwanted-exports")]
    pub exclude_unwanted_exports: bool,

    /// Warn once per export not yet frozen in the DEF file.
    #[arg(long = "warn-new-exports")]
    pub warn_new_exports: bool,

    /// Build the export surface even without exports, for by-name lookup.
    #[arg(long = "named-symlookup")]
    pub named_symlookup: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Config {
    /// The option flags the reconciler consumes.
    pub fn reconcile_flags(&self) -> Flags {
        Flags {
            unfrozen: self.unfrozen,
            ignore_non_callable: self.ignore_non_callable,
            custom_dll: self.custom_dll,
            exclude_unwanted_exports: self.exclude_unwanted_exports,
            warn_new_exports: self.warn_new_exports,
        }
    }
}
