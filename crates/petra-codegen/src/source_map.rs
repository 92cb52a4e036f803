//! Source mapping: generated C++ line ranges → model elements.
//!
//! Every piece of user code copied into the output (extern codec bodies,
//! user functions, transition bodies, place initializers) gets one entry.
//! With line directives enabled the C++ compiler already reports user-code
//! errors as `*<id>/<part>`; the map covers the other direction, resolving a
//! line of the generated file back to the element it came from.

use petra_types::Origin;
use serde::{Deserialize, Serialize};

use crate::writer::{string_literal, CodeWriter};

/// A complete source map for one generated program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMap {
    pub entries: Vec<SourceMapEntry>,
}

/// One user-code fragment of the generated file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMapEntry {
    /// Name of the emitted C++ function wrapping the fragment.
    pub func_name: String,
    pub kind: FragmentKind,
    /// Model element the code belongs to.
    pub origin: Origin,
    /// First and last line of the fragment body (1-based, inclusive).
    pub first_line: usize,
    pub last_line: usize,
}

/// Classification of a fragment for front ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// `getstring`/`getsize`/`pack`/`unpack` of an extern type.
    ExternCode,
    /// A project level user function.
    Function,
    /// The body of a transition.
    Transition,
    /// The initializer code of a place.
    PlaceInit,
}

impl SourceMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: SourceMapEntry) {
        self.entries.push(entry);
    }

    /// The fragment containing a generated line.
    pub fn find_by_line(&self, line: usize) -> Option<&SourceMapEntry> {
        self.entries
            .iter()
            .find(|e| e.first_line <= line && line <= e.last_line)
    }

    pub fn find_by_origin(&self, origin: &Origin) -> Option<&SourceMapEntry> {
        self.entries.iter().find(|e| &e.origin == origin)
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Fragment writer
// ══════════════════════════════════════════════════════════════════════════════

/// Copies user code into the output, wrapping it in `#line` directives when
/// enabled and recording it in the source map.
#[derive(Debug)]
pub struct Fragments {
    line_directives: bool,
    output_name: String,
    pub map: SourceMap,
}

impl Fragments {
    pub fn new(line_directives: bool, output_name: impl Into<String>) -> Self {
        Self {
            line_directives,
            output_name: output_name.into(),
            map: SourceMap::new(),
        }
    }

    /// Emit `decl { code }`.
    pub fn write_function(
        &mut self,
        w: &mut CodeWriter,
        func_name: &str,
        decl: &str,
        code: &str,
        kind: FragmentKind,
        origin: Origin,
    ) {
        w.line(decl);
        w.line("{");
        if self.line_directives {
            w.raw(&format!("#line 1 {}", string_literal(&origin.to_string())));
        }
        let first_line = w.next_line();
        w.raw(code);
        let last_line = w.next_line().saturating_sub(1).max(first_line);
        if self.line_directives {
            // The directive names the line that follows it.
            let next = w.next_line() + 1;
            w.raw(&format!("#line {next} {}", string_literal(&self.output_name)));
        }
        w.line("}");
        w.emptyline();
        self.map.push(SourceMapEntry {
            func_name: func_name.to_string(),
            kind,
            origin,
            first_line,
            last_line,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_json() {
        let mut frags = Fragments::new(false, "out.cpp");
        let mut w = CodeWriter::new();
        frags.write_function(
            &mut w,
            "ufunction_f",
            "int ufunction_f()",
            "return 1;\n",
            FragmentKind::Function,
            Origin::part(4, "function"),
        );
        let json = frags.map.to_json();
        let back = SourceMap::from_json(&json).expect("parse failed");
        assert_eq!(back, frags.map);
        assert_eq!(back.entries[0].kind, FragmentKind::Function);
    }

    #[test]
    fn line_directives_restore_output_numbering() {
        let mut frags = Fragments::new(true, "out.cpp");
        let mut w = CodeWriter::new();
        frags.write_function(
            &mut w,
            "f",
            "void f()",
            "a();\nb();\n",
            FragmentKind::Transition,
            Origin::part(7, "function"),
        );
        let text = w.as_str();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[2], "#line 1 \"*7/function\"");
        // The directive sits on line 6, so the closing brace is line 7.
        assert_eq!(lines[5], "#line 7 \"out.cpp\"");
        assert_eq!(lines[6], "}");
    }

    #[test]
    fn find_by_line() {
        let mut frags = Fragments::new(false, "out.cpp");
        let mut w = CodeWriter::new();
        w.line("// header");
        frags.write_function(
            &mut w,
            "f",
            "void f()",
            "a();\nb();\n",
            FragmentKind::Transition,
            Origin::part(7, "function"),
        );
        let entry = frags.map.find_by_line(4).expect("line 4 is user code");
        assert_eq!(entry.origin, Origin::part(7, "function"));
        assert!(frags.map.find_by_line(1).is_none());
        assert!(frags.map.find_by_origin(&Origin::part(7, "function")).is_some());
    }
}
