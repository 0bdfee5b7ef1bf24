//! Error kinds for the translation pipeline.
//!
//! Each kind maps to a distinct process exit code so build systems can tell
//! a stale DEF file from a broken ELF input.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A DEF line the tokenizer could not take to its final state.
    #[error("{}:{line}: DEF syntax error near '{token}'", .file.display())]
    DefSyntax {
        file: PathBuf,
        line: usize,
        token: String,
    },

    /// Two DEF records share an ordinal.
    #[error("{}: ordinal {ordinal} assigned more than once", .file.display())]
    DefDuplicateOrdinal { file: PathBuf, ordinal: u32 },

    /// Frozen exports present in the DEF file but gone from the ELF.
    #[error("{}: {} frozen export(s) missing from the ELF file: {}",
        .file.display(), .missing.len(), .missing.join(", "))]
    SymbolsMissingFromElf { file: PathBuf, missing: Vec<String> },

    /// Opaque failure surfaced from the ELF reader.
    #[error("failed to read ELF file {}: {detail}", .file.display())]
    ElfRead { file: PathBuf, detail: String },

    /// Could not create or write an output file.
    #[error("failed to write {}", .file.display())]
    OutputWrite {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn elf_read(file: &Path, detail: impl std::fmt::Display) -> Self {
        Error::ElfRead {
            file: file.to_path_buf(),
            detail: detail.to_string(),
        }
    }

    pub fn output_write(file: &Path, source: std::io::Error) -> Self {
        Error::OutputWrite {
            file: file.to_path_buf(),
            source,
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::DefSyntax { .. } => 2,
            Error::DefDuplicateOrdinal { .. } => 3,
            Error::SymbolsMissingFromElf { .. } => 4,
            Error::ElfRead { .. } => 5,
            Error::OutputWrite { .. } => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::path::PathBuf;

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let errors = [
            Error::DefSyntax {
                file: PathBuf::from("a.def"),
                line: 1,
                token: "x".into(),
            },
            Error::DefDuplicateOrdinal {
                file: PathBuf::from("a.def"),
                ordinal: 2,
            },
            Error::SymbolsMissingFromElf {
                file: PathBuf::from("a.so"),
                missing: vec!["b".into()],
            },
            Error::elf_read(std::path::Path::new("a.so"), "truncated"),
            Error::output_write(
                std::path::Path::new("out.e32"),
                std::io::Error::other("disk full"),
            ),
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn missing_symbols_message_lists_names() {
        let err = Error::SymbolsMissingFromElf {
            file: PathBuf::from("libfoo.so"),
            missing: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 frozen export(s)"));
        assert!(msg.contains("a, b"));
    }
}
