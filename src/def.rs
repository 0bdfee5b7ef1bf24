//! DEF file parser and emitter.
//!
//! DEF files are line-oriented: `;` starts a comment running to end of
//! line, blank lines are ignored, and every other line must match
//!
//! ```text
//! <name> @ <ordinal> [NONAME] [DATA <dec-size>] [R3UNUSED] [ABSENT] [; comment]
//! ```
//!
//! Keywords are case-sensitive, ordinals decimal and 1-based. The emitter
//! writes the same canonical form back in ascending ordinal order, so a
//! regenerated file re-parses to the list it was written from.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::symbol::{kind_of, Symbol, SymbolKind, SymbolStatus};

/// Tokenizer states for one DEF line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Name,
    At,
    Ordinal,
    Options,
    Comment,
    Final,
    Invalid,
}

/// Parses a DEF buffer into symbol records, in file order.
///
/// `file` is only used for error reporting.
pub fn parse(text: &str, file: &Path) -> Result<Vec<Symbol>> {
    let mut symbols = Vec::new();
    let mut seen_ordinals = BTreeSet::new();
    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        if let Some(sym) = parse_line(line, line_num, file)? {
            let ordinal = sym.ordinal.unwrap_or(0);
            if !seen_ordinals.insert(ordinal) {
                return Err(Error::DefDuplicateOrdinal {
                    file: file.to_path_buf(),
                    ordinal,
                });
            }
            symbols.push(sym);
        }
    }
    Ok(symbols)
}

/// Runs the line tokenizer. Returns `None` for blank and comment-only lines.
fn parse_line(line: &str, line_num: usize, file: &Path) -> Result<Option<Symbol>> {
    let invalid = |token: &str| Error::DefSyntax {
        file: file.to_path_buf(),
        line: line_num,
        token: token.to_string(),
    };

    // The comment, if any, runs to end of line.
    let (body, comment) = match line.find(';') {
        Some(pos) => (&line[..pos], Some(line[pos + 1..].trim())),
        None => (line, None),
    };

    let mut state = State::Initial;
    let mut name = "";
    let mut ordinal = 0u32;
    let mut noname = false;
    let mut declared_data: Option<u32> = None;
    let mut r3unused = false;
    let mut absent = false;

    let mut tokens = body.split_whitespace();
    let mut last = "";
    while let Some(token) = tokens.next() {
        last = token;
        state = match state {
            State::Initial => {
                name = token;
                State::Name
            }
            State::Name => {
                if token == "@" {
                    State::At
                } else {
                    State::Invalid
                }
            }
            State::At => match token.parse::<u32>() {
                Ok(n) if n >= 1 => {
                    ordinal = n;
                    State::Ordinal
                }
                _ => State::Invalid,
            },
            State::Ordinal | State::Options => match token {
                "NONAME" => {
                    noname = true;
                    State::Options
                }
                "DATA" => match tokens.next().map(str::parse::<u32>) {
                    Some(Ok(size)) => {
                        declared_data = Some(size);
                        State::Options
                    }
                    _ => State::Invalid,
                },
                "R3UNUSED" => {
                    r3unused = true;
                    State::Options
                }
                "ABSENT" => {
                    absent = true;
                    State::Options
                }
                _ => State::Invalid,
            },
            State::Comment | State::Final | State::Invalid => State::Invalid,
        };
        if state == State::Invalid {
            return Err(invalid(last));
        }
    }

    // A trailing comment is only legal once the ordinal has been read.
    if comment.is_some() && matches!(state, State::Ordinal | State::Options) {
        state = State::Comment;
    }

    // The line terminator forces the final state.
    state = match state {
        State::Initial => {
            // Nothing but whitespace and maybe a comment.
            return Ok(None);
        }
        State::Ordinal | State::Options | State::Comment => State::Final,
        _ => State::Invalid,
    };
    if state != State::Final {
        return Err(invalid(last));
    }

    let mut sym = Symbol::new(name);
    sym.ordinal = Some(ordinal);
    sym.noname = noname;
    sym.r3unused = r3unused;
    sym.absent = absent;
    if let Some(size) = declared_data {
        sym.kind = SymbolKind::Data;
        sym.size = size;
    } else {
        sym.kind = kind_of(name);
    }
    sym.comment = comment.filter(|c| !c.is_empty()).map(str::to_string);
    Ok(Some(sym))
}

/// Emits the canonical DEF text for a reconciled symbol list.
///
/// Lines come out in ascending ordinal order. A blank line and the `; NEW`
/// header precede each contiguous block of new symbols; missing symbols
/// keep their line but are flagged with a `; MISSING` comment so the
/// ordinal stays reserved.
pub fn emit(symbols: &[Symbol]) -> String {
    let mut ordered: Vec<&Symbol> = symbols.iter().collect();
    ordered.sort_by_key(|s| s.ordinal.unwrap_or(0));

    let mut out = String::new();
    let mut in_new_block = false;
    for sym in ordered {
        let is_new = sym.status == SymbolStatus::New;
        if is_new && !in_new_block {
            out.push('\n');
            out.push_str("; NEW\n");
        }
        in_new_block = is_new;

        out.push_str(&sym.name);
        out.push_str(" @ ");
        out.push_str(&sym.ordinal.unwrap_or(0).to_string());
        if sym.noname {
            out.push_str(" NONAME");
        }
        if sym.kind == SymbolKind::Data && sym.size > 0 {
            out.push_str(" DATA ");
            out.push_str(&sym.size.to_string());
        }
        if sym.r3unused {
            out.push_str(" R3UNUSED");
        }
        if sym.absent {
            out.push_str(" ABSENT");
        }
        if sym.status == SymbolStatus::Missing {
            out.push_str(" ; MISSING");
        } else if let Some(comment) = &sym.comment {
            out.push_str(" ; ");
            out.push_str(comment);
        }
        out.push('\n');
    }
    out
}

/// Writes the canonical DEF text to `path`.
pub fn write_file(path: &Path, symbols: &[Symbol]) -> Result<()> {
    std::fs::write(path, emit(symbols)).map_err(|e| Error::output_write(path, e))
}

#[cfg(test)]
mod tests {
    use super::{emit, parse};
    use crate::error::Error;
    use crate::symbol::{Symbol, SymbolKind, SymbolStatus};
    use std::path::Path;

    fn parse_ok(text: &str) -> Vec<Symbol> {
        parse(text, Path::new("test.def")).expect("parse")
    }

    #[test]
    fn parses_canonical_lines() {
        let syms = parse_ok("alpha @ 1\nbeta @ 2 NONAME\n");
        assert_eq!(syms.len(), 2);
        assert_eq!(syms[0].name, "alpha");
        assert_eq!(syms[0].ordinal, Some(1));
        assert_eq!(syms[0].kind, SymbolKind::Code);
        assert!(syms[1].noname);
    }

    #[test]
    fn parses_all_options_and_comment() {
        let syms = parse_ok("_ZTV3Foo @ 3 DATA 12 R3UNUSED ABSENT ; vtable\n");
        let s = &syms[0];
        assert_eq!(s.kind, SymbolKind::Data);
        assert_eq!(s.size, 12);
        assert!(s.r3unused);
        assert!(s.absent);
        assert_eq!(s.comment.as_deref(), Some("vtable"));
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let syms = parse_ok("\n; frozen exports\n\nalpha @ 1\n");
        assert_eq!(syms.len(), 1);
        assert_eq!(syms[0].name, "alpha");
    }

    #[test]
    fn rejects_line_without_at() {
        let err = parse("alpha 1\n", Path::new("bad.def")).unwrap_err();
        match err {
            Error::DefSyntax { line, token, .. } => {
                assert_eq!(line, 1);
                assert_eq!(token, "1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_zero_and_malformed_ordinals() {
        assert!(parse("alpha @ 0\n", Path::new("bad.def")).is_err());
        assert!(parse("alpha @ x\n", Path::new("bad.def")).is_err());
        assert!(parse("alpha @\n", Path::new("bad.def")).is_err());
    }

    #[test]
    fn rejects_data_without_size() {
        assert!(parse("alpha @ 1 DATA\n", Path::new("bad.def")).is_err());
        assert!(parse("alpha @ 1 DATA x\n", Path::new("bad.def")).is_err());
    }

    #[test]
    fn rejects_unknown_option_with_line_number() {
        let err = parse("alpha @ 1\nbeta @ 2 FROZEN\n", Path::new("bad.def")).unwrap_err();
        match err {
            Error::DefSyntax { line, token, .. } => {
                assert_eq!(line, 2);
                assert_eq!(token, "FROZEN");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_duplicate_ordinals() {
        let err = parse("alpha @ 1\nbeta @ 1\n", Path::new("dup.def")).unwrap_err();
        match err {
            Error::DefDuplicateOrdinal { ordinal, .. } => assert_eq!(ordinal, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn emits_in_ordinal_order() {
        let mut a = Symbol::new("late");
        a.ordinal = Some(2);
        let mut b = Symbol::new("early");
        b.ordinal = Some(1);
        assert_eq!(emit(&[a, b]), "early @ 1\nlate @ 2\n");
    }

    #[test]
    fn emits_new_block_header() {
        let mut a = Symbol::new("alpha");
        a.ordinal = Some(1);
        let mut c = Symbol::new("gamma");
        c.ordinal = Some(2);
        c.status = SymbolStatus::New;
        assert_eq!(emit(&[a, c]), "alpha @ 1\n\n; NEW\ngamma @ 2\n");
    }

    #[test]
    fn emits_missing_as_comment() {
        let mut a = Symbol::new("alpha");
        a.ordinal = Some(1);
        let mut b = Symbol::new("beta");
        b.ordinal = Some(2);
        b.status = SymbolStatus::Missing;
        assert_eq!(emit(&[a, b]), "alpha @ 1\nbeta @ 2 ; MISSING\n");
    }

    #[test]
    fn round_trips_canonical_text() {
        let text = "alpha @ 1\n_ZTV3Foo @ 2 DATA 8\nbeta @ 3 NONAME R3UNUSED ABSENT ; trap\n";
        let syms = parse_ok(text);
        assert_eq!(emit(&syms), text);
    }

    #[test]
    fn round_trips_parsed_list() {
        let mut a = Symbol::new("alpha");
        a.ordinal = Some(1);
        a.comment = Some("kept".into());
        let mut b = Symbol::new("_ZTI3Bar");
        b.ordinal = Some(4);
        b.size = 8;
        b.absent = true;
        let emitted = emit(&[a.clone(), b.clone()]);
        let reparsed = parse_ok(&emitted);
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed[0].name, a.name);
        assert_eq!(reparsed[0].ordinal, a.ordinal);
        assert_eq!(reparsed[0].comment, a.comment);
        assert_eq!(reparsed[1].name, b.name);
        assert_eq!(reparsed[1].ordinal, b.ordinal);
        assert_eq!(reparsed[1].kind, SymbolKind::Data);
        assert_eq!(reparsed[1].size, b.size);
        assert!(reparsed[1].absent);
    }
}
