//! Lightweight structural extraction.
//!
//! Splits source text into named [`ExtractedElement`]s (functions, methods,
//! classes, imports, variables and other top-level statements). This is a
//! line-oriented scanner, not a parser: Python blocks are scoped by
//! indentation, everything else by bracket depth with strings and comments
//! skipped. It only has to be good enough to key elements by name and find
//! their line spans.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Source languages the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    /// Anything else; tracked as whole-file text.
    Unknown,
}

impl Language {
    /// Detect language from a file extension (with or without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            "rs" => Self::Rust,
            "go" => Self::Go,
            _ => Self::Unknown,
        }
    }

    /// Detect language from a file path.
    pub fn from_path(path: &str) -> Self {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }

    /// Whether structural extraction is available.
    pub fn is_structured(self) -> bool {
        self != Self::Unknown
    }

    pub(crate) fn is_python(self) -> bool {
        self == Self::Python
    }

    /// Reserved words, excluded from dependency names.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Python => &[
                "False", "None", "True", "and", "as", "assert", "async", "await", "break",
                "class", "continue", "def", "del", "elif", "else", "except", "finally", "for",
                "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not", "or",
                "pass", "raise", "return", "try", "while", "with", "yield", "self", "cls",
                "print", "len", "str", "int", "dict", "list", "set", "tuple", "bool", "float",
            ],
            Self::JavaScript | Self::TypeScript => &[
                "async", "await", "break", "case", "catch", "class", "const", "continue",
                "default", "delete", "do", "else", "export", "extends", "false", "finally",
                "for", "function", "if", "import", "in", "instanceof", "interface", "let", "new",
                "null", "of", "return", "static", "super", "switch", "this", "throw", "true",
                "try", "type", "typeof", "undefined", "var", "void", "while", "yield", "string",
                "number", "boolean", "any", "unknown", "console", "from",
            ],
            Self::Rust => &[
                "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else",
                "enum", "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop",
                "match", "mod", "move", "mut", "pub", "ref", "return", "self", "Self", "static",
                "struct", "super", "trait", "true", "type", "unsafe", "use", "where", "while",
                "Some", "None", "Ok", "Err", "String", "Vec", "Option", "Result",
            ],
            Self::Go => &[
                "break", "case", "chan", "const", "continue", "default", "defer", "else",
                "fallthrough", "for", "func", "go", "goto", "if", "import", "interface", "map",
                "package", "range", "return", "select", "struct", "switch", "type", "var", "nil",
                "true", "false", "string", "int", "error", "bool", "make", "len",
            ],
            Self::Unknown => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Elements
// ---------------------------------------------------------------------------

/// Kind of structural element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Function,
    Method,
    Class,
    Import,
    Variable,
    /// Any other top-level statement.
    Statement,
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Import => "import",
            Self::Variable => "variable",
            Self::Statement => "statement",
        };
        f.write_str(s)
    }
}

/// A named structural element of one source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedElement {
    pub element_type: ElementType,
    /// Qualified key: `Parent.name` for methods; normalized text for
    /// imports and statements.
    pub name: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub content: String,
    pub parent: Option<String>,
}

impl ExtractedElement {
    /// Name without the parent qualifier.
    pub fn simple_name(&self) -> &str {
        match &self.parent {
            Some(parent) => self
                .name
                .strip_prefix(parent.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(&self.name),
            None => &self.name,
        }
    }
}

/// Extract elements from `content` in source order.
///
/// Returns an empty list for [`Language::Unknown`].
pub fn extract_elements(content: &str, language: Language) -> Vec<ExtractedElement> {
    let lines: Vec<&str> = content.lines().collect();
    let mut builder = ElementBuilder::new(&lines);
    match language {
        Language::Python => extract_python(&lines, &mut builder),
        Language::JavaScript | Language::TypeScript | Language::Rust | Language::Go => {
            extract_braced(&lines, language, &mut builder)
        }
        Language::Unknown => {}
    }
    trace!(?language, count = builder.elements.len(), "extracted elements");
    builder.elements
}

/// Collapse runs of whitespace to single spaces and trim.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `text` with every whitespace character removed.
pub(crate) fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

pub(crate) fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Accumulates elements, keeping qualified names unique.
struct ElementBuilder<'a> {
    lines: &'a [&'a str],
    elements: Vec<ExtractedElement>,
    seen: HashMap<String, usize>,
}

impl<'a> ElementBuilder<'a> {
    fn new(lines: &'a [&'a str]) -> Self {
        Self {
            lines,
            elements: Vec::new(),
            seen: HashMap::new(),
        }
    }

    /// Record lines `start..=end` (0-based) as an element.
    fn push(
        &mut self,
        element_type: ElementType,
        name: String,
        parent: Option<String>,
        start: usize,
        end: usize,
    ) {
        let end = end.max(start).min(self.lines.len().saturating_sub(1));
        let content = self.lines[start..=end].join("\n");
        let name = match &parent {
            Some(p) => format!("{p}.{name}"),
            None => name,
        };
        let count = self.seen.entry(name.clone()).or_insert(0);
        *count += 1;
        let name = if *count > 1 {
            format!("{name}#{count}")
        } else {
            name
        };
        self.elements.push(ExtractedElement {
            element_type,
            name,
            start_line: start + 1,
            end_line: end + 1,
            content,
            parent,
        });
    }
}

// ---------------------------------------------------------------------------
// Line scanning
// ---------------------------------------------------------------------------

/// Cross-line lexical state: open block comment or multi-line string.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ScanState {
    in_block_comment: bool,
    open_string: Option<char>,
}

impl ScanState {
    pub(crate) fn is_inside_literal(&self) -> bool {
        self.in_block_comment || self.open_string.is_some()
    }
}

/// Net bracket movement over one line.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LineScan {
    pub braces: i32,
    pub parens: i32,
    pub opened_brace: bool,
}

/// Scan one line, ignoring brackets inside strings and comments.
pub(crate) fn scan_line(line: &str, lang: Language, state: &mut ScanState) -> LineScan {
    let chars: Vec<char> = line.chars().collect();
    let mut scan = LineScan::default();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if state.in_block_comment {
            if c == '*' && next == Some('/') {
                state.in_block_comment = false;
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }

        if let Some(quote) = state.open_string {
            if c == '\\' {
                i += 2;
                continue;
            }
            if lang.is_python() {
                if c == quote && next == Some(quote) && chars.get(i + 2) == Some(&quote) {
                    state.open_string = None;
                    i += 3;
                    continue;
                }
            } else if c == quote {
                state.open_string = None;
            }
            i += 1;
            continue;
        }

        match c {
            '#' if lang.is_python() => break,
            '/' if !lang.is_python() && next == Some('/') => break,
            '/' if !lang.is_python() && next == Some('*') => {
                state.in_block_comment = true;
                i += 2;
                continue;
            }
            '"' | '\''
                if lang.is_python() && next == Some(c) && chars.get(i + 2) == Some(&c) =>
            {
                state.open_string = Some(c);
                i += 3;
                continue;
            }
            '`' if matches!(lang, Language::JavaScript | Language::TypeScript | Language::Go) => {
                state.open_string = Some('`');
            }
            '\'' if lang == Language::Rust => {
                // Char literal ('x', '\n') or a lifetime ('a).
                if next == Some('\\') {
                    i = skip_string(&chars, i, '\'');
                    continue;
                }
                if chars.get(i + 2) == Some(&'\'') {
                    i += 3;
                    continue;
                }
            }
            '"' | '\'' => {
                i = skip_string(&chars, i, c);
                continue;
            }
            '{' => {
                scan.braces += 1;
                scan.opened_brace = true;
            }
            '}' => scan.braces -= 1,
            '(' | '[' => scan.parens += 1,
            ')' | ']' => scan.parens -= 1,
            _ => {}
        }
        i += 1;
    }
    scan
}

fn skip_string(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote {
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Text of a line with a trailing `//` or `#` comment removed (approximate).
fn code_part(line: &str, lang: Language) -> &str {
    let marker = if lang.is_python() { "#" } else { "//" };
    match line.find(marker) {
        Some(pos) if !line[..pos].contains('"') && !line[..pos].contains('\'') => &line[..pos],
        _ => line,
    }
}

/// Whether a statement ending at `current` carries on into `next`.
fn continues(current: &str, next: Option<&&str>, base_indent: usize) -> bool {
    const TRAILING: [&str; 14] = [
        "=", "(", ",", "=>", "->", "+", "-", "*", "&&", "||", "?", ":", ".", "|",
    ];
    if TRAILING.iter().any(|t| current.ends_with(t)) {
        return true;
    }
    let Some(next) = next else {
        return false;
    };
    let trimmed = next.trim_start();
    if trimmed.is_empty() {
        return false;
    }
    if indent_of(next) > base_indent {
        return true;
    }
    ["{", ".", "?", ")", "]", "where", "&&", "||", "+", ":"]
        .iter()
        .any(|p| trimmed.starts_with(p))
}

/// Last line (0-based) of the bracket-scoped item starting at `start`.
pub(crate) fn brace_item_end(lines: &[&str], start: usize, lang: Language) -> usize {
    let base_indent = indent_of(lines[start]);
    let mut state = ScanState::default();
    let mut depth = 0i32;
    let mut parens = 0i32;
    let mut opened = false;
    for j in start..lines.len() {
        let scan = scan_line(lines[j], lang, &mut state);
        depth += scan.braces;
        parens += scan.parens;
        opened |= scan.opened_brace;
        if state.is_inside_literal() || depth > 0 || parens > 0 {
            continue;
        }
        let code = code_part(lines[j], lang).trim_end();
        if opened || code.ends_with(';') || !continues(code, lines.get(j + 1), base_indent) {
            return j;
        }
    }
    lines.len().saturating_sub(1)
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

struct Patterns {
    py_def: Regex,
    py_class: Regex,
    py_import: Regex,
    py_assign: Regex,
    js_import: Regex,
    js_function: Regex,
    js_class: Regex,
    js_binding: Regex,
    js_type: Regex,
    js_method: Regex,
    js_arrow_member: Regex,
    rs_use: Regex,
    rs_fn: Regex,
    rs_type_item: Regex,
    rs_impl: Regex,
    rs_value: Regex,
    rs_macro: Regex,
    rs_mod_decl: Regex,
    go_import: Regex,
    go_method: Regex,
    go_func: Regex,
    go_type_class: Regex,
    go_type: Regex,
    go_value: Regex,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static extractor pattern")
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        py_def: re(r"^(?:async\s+)?def\s+([A-Za-z_]\w*)"),
        py_class: re(r"^class\s+([A-Za-z_]\w*)"),
        py_import: re(r"^(?:import|from)\s+\S"),
        py_assign: re(r"^([A-Za-z_]\w*)\s*(?::[^=]+)?=[^=]"),
        js_import: re(r#"^import(?:\s|\{|\*|'|")"#),
        js_function: re(r"^(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)"),
        js_class: re(r"^(?:abstract\s+)?(?:class|interface|enum|namespace)\s+([A-Za-z_$][\w$]*)"),
        js_binding: re(r"^(?:const|let|var)\s+([A-Za-z_$][\w$]*)"),
        js_type: re(r"^type\s+([A-Za-z_$][\w$]*)"),
        js_method: re(
            r"^(?:(?:public|private|protected|static|async|readonly|override|abstract|get|set)\s+)*\*?(#?[A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*\(",
        ),
        js_arrow_member: re(
            r"^(?:(?:public|private|protected|static|readonly)\s+)*(#?[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>",
        ),
        rs_use: re(r"^(?:use|extern\s+crate)\s"),
        rs_fn: re(r#"^(?:(?:const|async|unsafe|extern\s+"[^"]*")\s+)*fn\s+([A-Za-z_]\w*)"#),
        rs_type_item: re(r"^(?:struct|enum|trait|union|mod)\s+([A-Za-z_]\w*)"),
        rs_impl: re(r"^(?:unsafe\s+)?impl\b"),
        rs_value: re(r"^(?:const|static|type)\s+(?:mut\s+)?([A-Za-z_]\w*)"),
        rs_macro: re(r"^macro_rules!\s*([A-Za-z_]\w*)"),
        rs_mod_decl: re(r"^mod\s+[A-Za-z_]\w*\s*;"),
        go_import: re(r"^import\s"),
        go_method: re(r"^func\s*\(\s*(?:[A-Za-z_]\w*\s+)?\*?\s*([A-Za-z_]\w*)[^)]*\)\s*([A-Za-z_]\w*)"),
        go_func: re(r"^func\s+([A-Za-z_]\w*)"),
        go_type_class: re(r"^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b"),
        go_type: re(r"^type\s+([A-Za-z_]\w*)"),
        go_value: re(r"^(?:var|const)\s+([A-Za-z_]\w*)"),
    })
}

fn capture(re: &Regex, text: &str, group: usize) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(group))
        .map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn extract_python(lines: &[&str], out: &mut ElementBuilder<'_>) {
    let p = patterns();
    let mut pending: Option<usize> = None;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();
        if trimmed.is_empty() || indent_of(line) > 0 {
            i += 1;
            continue;
        }
        if trimmed.starts_with('#') {
            pending = None;
            i += 1;
            continue;
        }
        if trimmed.starts_with('@') {
            pending.get_or_insert(i);
            i += 1;
            continue;
        }
        let start = pending.take().unwrap_or(i);

        let end = if let Some(name) = capture(&p.py_def, trimmed, 1) {
            let end = python_block_end(lines, i, 0);
            out.push(ElementType::Function, name, None, start, end);
            end
        } else if let Some(name) = capture(&p.py_class, trimmed, 1) {
            let end = python_block_end(lines, i, 0);
            out.push(ElementType::Class, name.clone(), None, start, end);
            python_methods(lines, i, end, &name, out);
            end
        } else if p.py_import.is_match(trimmed) {
            let end = python_statement_end(lines, i);
            let text = normalize_whitespace(&lines[i..=end].join(" "));
            out.push(ElementType::Import, text, None, start, end);
            end
        } else if let Some(name) = capture(&p.py_assign, trimmed, 1) {
            let end = python_statement_end(lines, i);
            out.push(ElementType::Variable, name, None, start, end);
            end
        } else {
            let end = if code_part(trimmed, Language::Python).trim_end().ends_with(':') {
                python_compound_end(lines, i)
            } else {
                python_statement_end(lines, i)
            };
            let text = normalize_whitespace(&lines[start..=end].join(" "));
            out.push(ElementType::Statement, text, None, start, end);
            end
        };
        i = end + 1;
    }
}

/// Last line of the indented block introduced at `start` with `indent`.
pub(crate) fn python_block_end(lines: &[&str], start: usize, indent: usize) -> usize {
    let mut state = ScanState::default();
    let mut depth = 0i32;
    let mut j = start;
    let mut last = start;

    // Header, possibly spanning several lines.
    while j < lines.len() {
        let scan = scan_line(lines[j], Language::Python, &mut state);
        depth += scan.braces + scan.parens;
        last = j;
        j += 1;
        if depth <= 0 && !state.is_inside_literal() {
            break;
        }
    }

    while j < lines.len() {
        let line = lines[j];
        if !state.is_inside_literal() && depth <= 0 {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                j += 1;
                continue;
            }
            if indent_of(line) <= indent && !trimmed.starts_with(')') {
                break;
            }
        }
        let scan = scan_line(line, Language::Python, &mut state);
        depth += scan.braces + scan.parens;
        last = j;
        j += 1;
    }
    last
}

/// A top-level `if:`/`try:`/`for:` block including its `elif`/`else`/
/// `except`/`finally` continuations.
fn python_compound_end(lines: &[&str], start: usize) -> usize {
    let mut end = python_block_end(lines, start, 0);
    loop {
        let next = (end + 1..lines.len()).find(|&k| !lines[k].trim().is_empty());
        match next {
            Some(k)
                if indent_of(lines[k]) == 0
                    && ["elif", "else", "except", "finally"]
                        .iter()
                        .any(|kw| lines[k].trim_start().starts_with(kw)) =>
            {
                end = python_block_end(lines, k, 0);
            }
            _ => return end,
        }
    }
}

/// Last line of a simple statement (bracket and backslash continuations).
fn python_statement_end(lines: &[&str], start: usize) -> usize {
    let mut state = ScanState::default();
    let mut depth = 0i32;
    for (j, line) in lines.iter().enumerate().skip(start) {
        let scan = scan_line(line, Language::Python, &mut state);
        depth += scan.braces + scan.parens;
        if depth <= 0 && !state.is_inside_literal() && !line.trim_end().ends_with('\\') {
            return j;
        }
    }
    lines.len().saturating_sub(1)
}

fn python_methods(
    lines: &[&str],
    class_start: usize,
    class_end: usize,
    class_name: &str,
    out: &mut ElementBuilder<'_>,
) {
    let p = patterns();
    let class_indent = indent_of(lines[class_start]);
    let Some(body_indent) = (class_start + 1..=class_end)
        .map(|k| lines[k])
        .find(|l| !l.trim().is_empty() && indent_of(l) > class_indent)
        .map(indent_of)
    else {
        return;
    };

    let mut state = ScanState::default();
    let mut pending: Option<usize> = None;
    let mut j = class_start + 1;
    while j <= class_end {
        let line = lines[j];
        let trimmed = line.trim();
        if !state.is_inside_literal() && indent_of(line) == body_indent && !trimmed.is_empty() {
            if trimmed.starts_with('@') {
                pending.get_or_insert(j);
                j += 1;
                continue;
            }
            if let Some(name) = capture(&p.py_def, trimmed, 1) {
                let start = pending.take().unwrap_or(j);
                let end = python_block_end(lines, j, body_indent).min(class_end);
                out.push(
                    ElementType::Method,
                    name,
                    Some(class_name.to_string()),
                    start,
                    end,
                );
                j = end + 1;
                state = ScanState::default();
                continue;
            }
            pending = None;
        }
        scan_line(line, Language::Python, &mut state);
        j += 1;
    }
}

// ---------------------------------------------------------------------------
// Brace languages
// ---------------------------------------------------------------------------

/// What a top-level line introduces.
struct ItemHead {
    element_type: ElementType,
    name: Option<String>,
    parent: Option<String>,
}

impl ItemHead {
    fn new(element_type: ElementType, name: Option<String>) -> Self {
        Self {
            element_type,
            name,
            parent: None,
        }
    }
}

fn is_member_prefix(trimmed: &str, lang: Language) -> bool {
    match lang {
        Language::Rust => trimmed.starts_with("#[") || trimmed.starts_with("///"),
        Language::JavaScript | Language::TypeScript => {
            trimmed.starts_with('@') && !trimmed.starts_with("@(")
        }
        _ => false,
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

fn extract_braced(lines: &[&str], lang: Language, out: &mut ElementBuilder<'_>) {
    let mut state = ScanState::default();
    let mut pending: Option<usize> = None;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if state.is_inside_literal() || trimmed.is_empty() || indent_of(line) > 0 {
            scan_line(line, lang, &mut state);
            i += 1;
            continue;
        }
        if is_member_prefix(trimmed, lang) {
            pending.get_or_insert(i);
            i += 1;
            continue;
        }
        if is_comment(trimmed) {
            scan_line(line, lang, &mut state);
            pending = None;
            i += 1;
            continue;
        }

        let start = pending.take().unwrap_or(i);
        let end = brace_item_end(lines, i, lang);
        let head = classify_top_level(trimmed, lang, &lines[i..=end]);
        let name = head.name.unwrap_or_else(|| {
            normalize_whitespace(&lines[i..=end].join(" "))
        });
        out.push(head.element_type, name.clone(), head.parent, start, end);
        if head.element_type == ElementType::Class {
            braced_methods(lines, i, end, &name, lang, out);
        }
        i = end + 1;
    }
}

fn strip_js_export(trimmed: &str) -> &str {
    let mut text = trimmed;
    for prefix in ["export default ", "export ", "declare "] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
        }
    }
    text
}

fn strip_rust_visibility(trimmed: &str) -> &str {
    let Some(rest) = trimmed.strip_prefix("pub") else {
        return trimmed;
    };
    if let Some(scoped) = rest.strip_prefix('(') {
        return match scoped.find(')') {
            Some(close) => scoped[close + 1..].trim_start(),
            None => trimmed,
        };
    }
    if rest.starts_with(char::is_whitespace) {
        rest.trim_start()
    } else {
        trimmed
    }
}

fn classify_top_level(trimmed: &str, lang: Language, item: &[&str]) -> ItemHead {
    let p = patterns();
    match lang {
        Language::JavaScript | Language::TypeScript => {
            let text = strip_js_export(trimmed);
            if p.js_import.is_match(text) {
                return ItemHead::new(ElementType::Import, None);
            }
            if let Some(name) = capture(&p.js_function, text, 1) {
                return ItemHead::new(ElementType::Function, Some(name));
            }
            if let Some(name) = capture(&p.js_class, text, 1) {
                return ItemHead::new(ElementType::Class, Some(name));
            }
            if let Some(name) = capture(&p.js_binding, text, 1) {
                let joined = item.join("\n");
                let rhs = joined.split_once('=').map(|(_, r)| r.trim_start()).unwrap_or("");
                if rhs.starts_with("require(") {
                    return ItemHead::new(ElementType::Import, None);
                }
                let is_function = rhs.starts_with("function")
                    || rhs.starts_with("async function")
                    || ((rhs.starts_with('(') || rhs.starts_with("async"))
                        && joined.contains("=>"))
                    || rhs
                        .split_once("=>")
                        .map(|(head, _)| {
                            head.trim()
                                .chars()
                                .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
                        })
                        .unwrap_or(false);
                let kind = if is_function {
                    ElementType::Function
                } else {
                    ElementType::Variable
                };
                return ItemHead::new(kind, Some(name));
            }
            if let Some(name) = capture(&p.js_type, text, 1) {
                return ItemHead::new(ElementType::Variable, Some(name));
            }
            ItemHead::new(ElementType::Statement, None)
        }
        Language::Rust => {
            let text = strip_rust_visibility(trimmed);
            if p.rs_use.is_match(text) || p.rs_mod_decl.is_match(text) {
                return ItemHead::new(ElementType::Import, None);
            }
            if let Some(name) = capture(&p.rs_fn, text, 1) {
                return ItemHead::new(ElementType::Function, Some(name));
            }
            if let Some(name) = capture(&p.rs_macro, text, 1) {
                return ItemHead::new(ElementType::Function, Some(name));
            }
            if p.rs_impl.is_match(text) {
                let joined = normalize_whitespace(&item.join(" "));
                let header = joined.split('{').next().unwrap_or(&joined);
                let header = header.split(" where ").next().unwrap_or(header);
                let header = header.strip_prefix("pub ").unwrap_or(header);
                return ItemHead::new(ElementType::Class, Some(header.trim().to_string()));
            }
            if let Some(name) = capture(&p.rs_type_item, text, 1) {
                return ItemHead::new(ElementType::Class, Some(name));
            }
            if let Some(name) = capture(&p.rs_value, text, 1) {
                return ItemHead::new(ElementType::Variable, Some(name));
            }
            ItemHead::new(ElementType::Statement, None)
        }
        Language::Go => {
            if p.go_import.is_match(trimmed) {
                return ItemHead::new(ElementType::Import, None);
            }
            if let Some(caps) = p.go_method.captures(trimmed) {
                let receiver = caps.get(1).map(|m| m.as_str().to_string());
                let name = caps.get(2).map(|m| m.as_str().to_string());
                return ItemHead {
                    element_type: ElementType::Method,
                    name,
                    parent: receiver,
                };
            }
            if let Some(name) = capture(&p.go_func, trimmed, 1) {
                return ItemHead::new(ElementType::Function, Some(name));
            }
            if let Some(name) = capture(&p.go_type_class, trimmed, 1) {
                return ItemHead::new(ElementType::Class, Some(name));
            }
            if let Some(name) = capture(&p.go_type, trimmed, 1) {
                return ItemHead::new(ElementType::Variable, Some(name));
            }
            if let Some(name) = capture(&p.go_value, trimmed, 1) {
                return ItemHead::new(ElementType::Variable, Some(name));
            }
            ItemHead::new(ElementType::Statement, None)
        }
        Language::Python | Language::Unknown => ItemHead::new(ElementType::Statement, None),
    }
}

/// Method name if `trimmed` opens a member function inside a class body.
fn method_name(trimmed: &str, lang: Language) -> Option<String> {
    const CONTROL: [&str; 8] = [
        "if", "for", "while", "switch", "catch", "return", "function", "with",
    ];
    let p = patterns();
    match lang {
        Language::JavaScript | Language::TypeScript => {
            let name = capture(&p.js_method, trimmed, 1)
                .or_else(|| capture(&p.js_arrow_member, trimmed, 1))?;
            if CONTROL.contains(&name.as_str()) {
                None
            } else {
                Some(name)
            }
        }
        Language::Rust => capture(&p.rs_fn, strip_rust_visibility(trimmed), 1),
        _ => None,
    }
}

fn braced_methods(
    lines: &[&str],
    class_start: usize,
    class_end: usize,
    class_name: &str,
    lang: Language,
    out: &mut ElementBuilder<'_>,
) {
    if !matches!(
        lang,
        Language::JavaScript | Language::TypeScript | Language::Rust
    ) {
        return;
    }
    let mut state = ScanState::default();
    let mut depth = 0i32;
    let mut pending: Option<usize> = None;
    let mut j = class_start;
    while j < class_end {
        let line = lines[j];
        let trimmed = line.trim();
        if j > class_start && depth == 1 && !state.is_inside_literal() && !trimmed.is_empty() {
            if is_member_prefix(trimmed, lang) {
                pending.get_or_insert(j);
                j += 1;
                continue;
            }
            if let Some(name) = method_name(trimmed, lang) {
                let start = pending.take().unwrap_or(j);
                let end = brace_item_end(lines, j, lang).min(class_end.saturating_sub(1)).max(j);
                out.push(
                    ElementType::Method,
                    name,
                    Some(class_name.to_string()),
                    start,
                    end,
                );
                j = end + 1;
                continue;
            }
            if !is_comment(trimmed) {
                pending = None;
            }
        }
        let scan = scan_line(line, lang, &mut state);
        depth += scan.braces;
        j += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(elements: &[ExtractedElement]) -> Vec<&str> {
        elements.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_path("src/app.py"), Language::Python);
        assert_eq!(Language::from_extension(".tsx"), Language::TypeScript);
        assert_eq!(Language::from_path("lib.rs"), Language::Rust);
        assert_eq!(Language::from_path("README.md"), Language::Unknown);
        assert_eq!(Language::from_path("Makefile"), Language::Unknown);
    }

    #[test]
    fn test_python_elements() {
        let src = r#"import os
from typing import (
    List,
    Dict,
)

MAX = 10

@decorator
def helper(x):
    """Doc.

not indented inside the docstring
"""
    return x + 1


class Api(Base):
    """Api docs."""

    def get(self):
        return 1

    @property
    async def name(self):
        return "api"

if __name__ == "__main__":
    main()
else:
    pass
"#;
        let elements = extract_elements(src, Language::Python);
        assert_eq!(
            names(&elements),
            vec![
                "import os",
                "from typing import ( List, Dict, )",
                "MAX",
                "helper",
                "Api",
                "Api.get",
                "Api.name",
                "if __name__ == \"__main__\": main() else: pass",
            ]
        );
        let helper = &elements[3];
        assert_eq!(helper.element_type, ElementType::Function);
        assert_eq!(helper.start_line, 9);
        assert_eq!(helper.end_line, 15);
        assert!(helper.content.starts_with("@decorator"));

        let name = &elements[6];
        assert_eq!(name.element_type, ElementType::Method);
        assert_eq!(name.parent.as_deref(), Some("Api"));
        assert_eq!(name.simple_name(), "name");
        assert!(name.content.trim_start().starts_with("@property"));
    }

    #[test]
    fn test_typescript_elements() {
        let src = r#"import { a } from "./a";
import {
  b,
} from "./b";

export const LIMIT = 5;

export function run(x: number): number {
  if (x) {
    return x;
  }
  return 0;
}

const handler = async (req) => {
  return req;
};

export class Service extends Base {
  private count = 0;

  constructor(private dep: Dep) {
    super();
  }

  @Log()
  async fetch(id: string): Promise<void> {
    await this.dep.get(id);
  }

  onClick = (e) => {
    this.count++;
  };
}

app.listen(3000);
"#;
        let elements = extract_elements(src, Language::TypeScript);
        let got = names(&elements);
        assert_eq!(got[0], "import { a } from \"./a\";");
        assert_eq!(got[1], "import { b, } from \"./b\";");
        assert_eq!(got[2], "LIMIT");
        assert_eq!(got[3], "run");
        assert_eq!(elements[3].element_type, ElementType::Function);
        assert_eq!(elements[3].end_line, 13);
        assert_eq!(got[4], "handler");
        assert_eq!(elements[4].element_type, ElementType::Function);
        assert_eq!(got[5], "Service");
        assert!(got.contains(&"Service.constructor"));
        assert!(got.contains(&"Service.fetch"));
        assert!(got.contains(&"Service.onClick"));
        let fetch = elements.iter().find(|e| e.name == "Service.fetch").unwrap();
        assert!(fetch.content.trim_start().starts_with("@Log()"));
        assert_eq!(got.last(), Some(&"app.listen(3000);"));
    }

    #[test]
    fn test_rust_elements() {
        let src = r#"use std::fmt;

/// A point.
#[derive(Debug)]
pub struct Point {
    x: i32,
}

impl Point {
    pub fn new(x: i32) -> Self {
        Self { x }
    }

    fn lifetime<'a>(&'a self) -> &'a i32 {
        &self.x
    }
}

pub(crate) fn origin() -> Point
where
    Point: Sized,
{
    Point::new(0)
}

const ZERO: i32 = 0;
"#;
        let elements = extract_elements(src, Language::Rust);
        assert_eq!(
            names(&elements),
            vec![
                "use std::fmt;",
                "Point",
                "impl Point",
                "impl Point.new",
                "impl Point.lifetime",
                "origin",
                "ZERO",
            ]
        );
        assert_eq!(elements[1].start_line, 3);
        assert_eq!(elements[5].end_line, 24);
    }

    #[test]
    fn test_go_elements() {
        let src = r#"package main

import (
	"fmt"
)

type Server struct {
	port int
}

func (s *Server) Start() error {
	return nil
}

func main() {
	fmt.Println("hi")
}
"#;
        let elements = extract_elements(src, Language::Go);
        let got = names(&elements);
        assert!(got.contains(&"Server"));
        assert!(got.contains(&"Server.Start"));
        assert!(got.contains(&"main"));
        let start = elements.iter().find(|e| e.name == "Server.Start").unwrap();
        assert_eq!(start.element_type, ElementType::Method);
        assert_eq!(start.parent.as_deref(), Some("Server"));
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let src = "print(1)\nprint(1)\n";
        let elements = extract_elements(src, Language::Python);
        assert_eq!(names(&elements), vec!["print(1)", "print(1)#2"]);
    }

    #[test]
    fn test_unknown_language_yields_nothing() {
        assert!(extract_elements("# Title\n\ntext\n", Language::Unknown).is_empty());
        assert!(extract_elements("", Language::Python).is_empty());
    }

    #[test]
    fn test_scan_line_ignores_strings_and_comments() {
        let mut state = ScanState::default();
        let scan = scan_line(r#"let s = "{"; // }"#, Language::Rust, &mut state);
        assert_eq!(scan.braces, 0);
        let scan = scan_line("fn a<'a>(x: &'a str) {", Language::Rust, &mut state);
        assert_eq!(scan.braces, 1);
        assert_eq!(scan.parens, 0);
    }
}
