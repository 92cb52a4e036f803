//! Indented C++ text buffer.
//!
//! Every emitter writes through a [`CodeWriter`]; it owns indentation,
//! block structure and the running line count used for `#line`
//! directives and the source map.

const INDENT: &str = "\t";

#[derive(Debug, Default)]
pub struct CodeWriter {
    out: String,
    indent: usize,
    lines: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one line at the current indentation.
    pub fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
        self.lines += 1;
    }

    pub fn emptyline(&mut self) {
        self.out.push('\n');
        self.lines += 1;
    }

    /// Write text verbatim, without indentation. Used for user code and
    /// preprocessor directives.
    pub fn raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.out.push_str(text);
        self.lines += text.matches('\n').count();
        if !text.ends_with('\n') {
            self.out.push('\n');
            self.lines += 1;
        }
    }

    /// Number the next written line will have (1-based).
    pub fn next_line(&self) -> usize {
        self.lines + 1
    }

    // ── Blocks ──

    pub fn block_begin(&mut self) {
        self.line("{");
        self.indent += 1;
    }

    pub fn block_end(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("}");
    }

    /// `if (cond) {`
    pub fn if_begin(&mut self, cond: impl AsRef<str>) {
        self.line(format!("if ({}) {{", cond.as_ref()));
        self.indent += 1;
    }

    /// `} else {`
    pub fn else_branch(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("} else {");
        self.indent += 1;
    }

    /// `if (cond) { stmt }` on a single line.
    pub fn if_line(&mut self, cond: impl AsRef<str>, stmt: impl AsRef<str>) {
        self.line(format!("if ({}) {{ {} }}", cond.as_ref(), stmt.as_ref()));
    }

    pub fn do_begin(&mut self) {
        self.line("do {");
        self.indent += 1;
    }

    /// `} while (cond);`
    pub fn do_end(&mut self, cond: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(format!("}} while ({});", cond.as_ref()));
    }

    /// `for (size_t i = 0; i < bound; i++) {`
    pub fn for_index(&mut self, var: &str, bound: impl AsRef<str>) {
        self.line(format!(
            "for (size_t {var} = 0; {var} < {}; {var}++) {{",
            bound.as_ref()
        ));
        self.indent += 1;
    }

    /// `switch (expr) {`, closed with [`CodeWriter::block_end`].
    pub fn switch_begin(&mut self, expr: impl AsRef<str>) {
        self.line(format!("switch ({}) {{", expr.as_ref()));
        self.indent += 1;
    }

    /// `case label:`; the body follows one level deeper.
    pub fn case_begin(&mut self, label: impl AsRef<str>) {
        self.line(format!("case {}:", label.as_ref()));
        self.indent += 1;
    }

    pub fn case_end(&mut self) {
        self.line("break;");
        self.indent = self.indent.saturating_sub(1);
    }

    /// `class Name [: public Parent] {` followed by `public:`.
    pub fn class_begin(&mut self, name: &str, parent: Option<&str>) {
        match parent {
            Some(parent) => self.line(format!("class {name} : public {parent} {{")),
            None => self.line(format!("class {name} {{")),
        }
        self.line("public:");
        self.indent += 1;
    }

    pub fn class_end(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("};");
    }

    /// Function head on its own line, body opened on the next.
    pub fn function_begin(&mut self, decl: impl AsRef<str>) {
        self.line(decl);
        self.block_begin();
    }

    pub fn function_end(&mut self) {
        self.block_end();
        self.emptyline();
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// A C++ string literal for `text`.
pub fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
