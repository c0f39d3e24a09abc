//! Anchor-based text edits used by the merge strategies.
//!
//! Every edit re-extracts the current text to find its anchor by element
//! name, so edits compose in any order over an evolving file. Edits that
//! need an anchor return `None` when it is missing; insertions of elements
//! that already exist are skipped.

use std::collections::HashSet;

use crate::semantic::analyzer::{body_start_index, return_expression};
use crate::semantic::extract::{
    extract_elements, indent_of, normalize_whitespace, ElementType, ExtractedElement, Language,
};

/// Element of `content` with qualified `name`.
pub(crate) fn find_element(content: &str, lang: Language, name: &str) -> Option<ExtractedElement> {
    extract_elements(content, lang)
        .into_iter()
        .find(|e| e.name == name)
}

struct Lines {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl Lines {
    fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
            trailing_newline: content.is_empty() || content.ends_with('\n'),
        }
    }

    fn render(self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    fn is_blank(&self, index: usize) -> bool {
        self.lines.get(index).map_or(true, |l| l.trim().is_empty())
    }

    /// Insert `block` before line `at`, padded with blank lines from
    /// non-blank neighbours when `pad` is set.
    fn insert(&mut self, at: usize, block: Vec<String>, pad: bool) {
        let at = at.min(self.lines.len());
        let mut insertion = Vec::with_capacity(block.len() + 2);
        if pad && at > 0 && !self.is_blank(at - 1) {
            insertion.push(String::new());
        }
        insertion.extend(block);
        if pad && at < self.lines.len() && !self.is_blank(at) {
            insertion.push(String::new());
        }
        self.lines.splice(at..at, insertion);
    }
}

fn block_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// Index where top-of-file content goes: after a shebang, encoding line,
/// module docstring, Go package clause, or Rust inner attributes.
fn top_anchor(lines: &[String], lang: Language) -> usize {
    let mut i = 0;
    match lang {
        Language::Python => {
            while i < lines.len()
                && (lines[i].starts_with("#!")
                    || lines[i].starts_with("# -*-")
                    || lines[i].starts_with("# coding"))
            {
                i += 1;
            }
            let Some(first) = (i..lines.len()).find(|&k| !lines[k].trim().is_empty()) else {
                return i;
            };
            let text = lines[first].trim_start();
            for quote in ["\"\"\"", "'''"] {
                if let Some(rest) = text.strip_prefix(quote) {
                    if rest.contains(quote) {
                        return first + 1;
                    }
                    return (first + 1..lines.len())
                        .find(|&k| lines[k].contains(quote))
                        .map_or(lines.len(), |k| k + 1);
                }
            }
            i
        }
        Language::Go => lines
            .iter()
            .position(|l| l.starts_with("package "))
            .map_or(0, |k| k + 1),
        Language::Rust => {
            while i < lines.len()
                && (lines[i].starts_with("//!") || lines[i].starts_with("#!["))
            {
                i += 1;
            }
            i
        }
        Language::JavaScript | Language::TypeScript => {
            while i < lines.len() {
                let t = lines[i].trim();
                if t.starts_with("#!") || t == "\"use strict\";" || t == "'use strict';" {
                    i += 1;
                } else {
                    break;
                }
            }
            i
        }
        Language::Unknown => 0,
    }
}

/// Line index just past the last import, if any.
fn after_last_import(elements: &[ExtractedElement]) -> Option<usize> {
    elements
        .iter()
        .filter(|e| e.element_type == ElementType::Import)
        .map(|e| e.end_line)
        .max()
}

/// Add import lines after the last existing import (or at the top).
/// Imports already present are skipped.
pub fn insert_imports(content: &str, lang: Language, imports: &[&str]) -> String {
    let elements = extract_elements(content, lang);
    let mut seen: HashSet<String> = elements
        .iter()
        .filter(|e| e.element_type == ElementType::Import)
        .map(|e| normalize_whitespace(&e.content))
        .collect();
    let block: Vec<String> = imports
        .iter()
        .filter(|text| seen.insert(normalize_whitespace(text)))
        .flat_map(|text| block_lines(text))
        .collect();
    if block.is_empty() {
        return content.to_string();
    }

    let mut lines = Lines::parse(content);
    match after_last_import(&elements) {
        Some(at) => lines.insert(at, block, false),
        None => {
            let at = top_anchor(&lines.lines, lang);
            lines.insert(at, block, true);
        }
    }
    lines.render()
}

/// Add top-level statements right after the import block (or at the top).
/// Blocks whose text already appears as an element are skipped.
pub fn insert_after_imports(content: &str, lang: Language, blocks: &[&str]) -> String {
    let elements = extract_elements(content, lang);
    let mut seen: HashSet<String> = elements
        .iter()
        .map(|e| normalize_whitespace(&e.content))
        .collect();
    let block: Vec<String> = blocks
        .iter()
        .filter(|text| seen.insert(normalize_whitespace(text)))
        .flat_map(|text| block_lines(text))
        .collect();
    if block.is_empty() {
        return content.to_string();
    }

    let mut lines = Lines::parse(content);
    let at = after_last_import(&elements).unwrap_or_else(|| top_anchor(&lines.lines, lang));
    lines.insert(at, block, true);
    lines.render()
}

/// Append named top-level blocks (functions, classes) at end of file.
/// Names that already exist are skipped.
pub fn append_top_level(content: &str, lang: Language, blocks: &[(&str, &str)]) -> String {
    let mut names: HashSet<String> = extract_elements(content, lang)
        .into_iter()
        .map(|e| e.name)
        .collect();
    let separator = if lang.is_python() { 2 } else { 1 };

    let mut lines = Lines::parse(content);
    while lines.lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.lines.pop();
    }
    let mut changed = false;
    for (name, text) in blocks {
        if !names.insert((*name).to_string()) {
            continue;
        }
        if !lines.lines.is_empty() {
            lines
                .lines
                .extend(std::iter::repeat(String::new()).take(separator));
        }
        lines.lines.extend(block_lines(text));
        changed = true;
    }
    if !changed {
        return content.to_string();
    }
    lines.trailing_newline = true;
    lines.render()
}

/// Append named methods at the end of class `class_name`'s body.
/// `None` if the class is missing or has no multi-line body.
pub fn append_to_class(
    content: &str,
    lang: Language,
    class_name: &str,
    methods: &[(&str, &str)],
) -> Option<String> {
    let elements = extract_elements(content, lang);
    let class = elements
        .iter()
        .find(|e| e.element_type == ElementType::Class && e.name == class_name)?;
    if class.start_line == class.end_line {
        return None;
    }
    let mut names: HashSet<&str> = elements.iter().map(|e| e.name.as_str()).collect();

    let mut block = Vec::new();
    for (name, text) in methods {
        if !names.insert(*name) {
            continue;
        }
        block.push(String::new());
        block.extend(block_lines(text));
    }
    if block.is_empty() {
        return Some(content.to_string());
    }

    let mut lines = Lines::parse(content);
    // Python bodies end at the last body line; braced bodies end with `}`.
    let at = if lang.is_python() {
        class.end_line
    } else {
        class.end_line - 1
    };
    lines.lines.splice(at..at, block);
    Some(lines.render())
}

/// Insert hook call lines at the top of `target`'s body, indented like the
/// body. Hooks already present in the body are skipped.
pub fn insert_hooks(content: &str, lang: Language, target: &str, hooks: &[String]) -> Option<String> {
    let element = find_element(content, lang, target)?;
    let element_lines: Vec<&str> = element.content.lines().collect();
    let body_start = body_start_index(&element.content, lang);
    if body_start >= element_lines.len() {
        return None;
    }
    let indent_source = element_lines[body_start..]
        .iter()
        .find(|l| !l.trim().is_empty() && l.trim() != "}")
        .copied()
        .unwrap_or(element_lines[0]);
    let indent: String = indent_source
        .chars()
        .take(indent_of(indent_source))
        .collect();
    let indent = if indent_of(indent_source) <= indent_of(element_lines[0]) {
        format!("{indent}    ")
    } else {
        indent
    };

    let mut present: HashSet<&str> = element_lines[body_start..].iter().map(|l| l.trim()).collect();
    let block: Vec<String> = hooks
        .iter()
        .filter(|h| present.insert(h.trim()))
        .map(|h| format!("{indent}{}", h.trim()))
        .collect();
    if block.is_empty() {
        return Some(content.to_string());
    }

    let mut lines = Lines::parse(content);
    let at = element.start_line - 1 + body_start;
    lines.insert(at, block, false);
    Some(lines.render())
}

/// Rewrite `return <expr_before>` inside `target` to `return <expr_after>`.
/// Already-rewritten returns are left as they are.
pub fn wrap_return(
    content: &str,
    lang: Language,
    target: &str,
    expr_before: &str,
    expr_after: &str,
) -> Option<String> {
    let element = find_element(content, lang, target)?;
    let wanted = normalize_whitespace(expr_before);
    let done = normalize_whitespace(expr_after);
    let mut lines = Lines::parse(content);
    for index in element.start_line - 1..element.end_line {
        let line = lines.lines.get(index)?;
        let Some(expr) = return_expression(line) else {
            continue;
        };
        let expr = normalize_whitespace(expr);
        if expr == done {
            return Some(content.to_string());
        }
        if expr == wanted {
            let indent: String = line.chars().take(indent_of(line)).collect();
            let semicolon = if line.trim_end().ends_with(';') { ";" } else { "" };
            lines.lines[index] = format!("{indent}return {expr_after}{semicolon}");
            return Some(lines.render());
        }
    }
    None
}

/// Replace the line `line_before` (trimmed match) inside `target` with
/// `line_after`, keeping its indentation.
pub fn replace_line(
    content: &str,
    lang: Language,
    target: &str,
    line_before: &str,
    line_after: &str,
) -> Option<String> {
    let element = find_element(content, lang, target)?;
    let mut lines = Lines::parse(content);
    let range = element.start_line - 1..element.end_line;
    if lines.lines[range.clone()]
        .iter()
        .any(|l| l.trim() == line_after.trim())
    {
        return Some(content.to_string());
    }
    let index = range
        .into_iter()
        .find(|&i| lines.lines[i].trim() == line_before.trim())?;
    let indent: String = lines.lines[index]
        .chars()
        .take(indent_of(&lines.lines[index]))
        .collect();
    lines.lines[index] = format!("{indent}{}", line_after.trim());
    Some(lines.render())
}

/// Replace the whole of `target` with `new_text`.
pub fn replace_element(content: &str, lang: Language, target: &str, new_text: &str) -> Option<String> {
    let element = find_element(content, lang, target)?;
    let mut lines = Lines::parse(content);
    lines
        .lines
        .splice(element.start_line - 1..element.end_line, block_lines(new_text));
    Some(lines.render())
}

/// Delete `target`, collapsing the blank line it leaves behind.
pub fn remove_element(content: &str, lang: Language, target: &str) -> Option<String> {
    let element = find_element(content, lang, target)?;
    let mut lines = Lines::parse(content);
    let start = element.start_line - 1;
    lines.lines.drain(start..element.end_line);
    while start < lines.lines.len()
        && lines.is_blank(start)
        && (start == 0 || lines.is_blank(start - 1))
    {
        lines.lines.remove(start);
    }
    if start == lines.lines.len() {
        while lines.lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.lines.pop();
        }
    }
    Some(lines.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_imports_after_last_import() {
        let src = "\"\"\"Module.\"\"\"\nimport os\n\nX = 1\n";
        let out = insert_imports(src, Language::Python, &["import sys", "import os"]);
        assert_eq!(out, "\"\"\"Module.\"\"\"\nimport os\nimport sys\n\nX = 1\n");
    }

    #[test]
    fn test_insert_imports_after_docstring_when_none() {
        let src = "\"\"\"Module.\"\"\"\ndef f():\n    pass\n";
        let out = insert_imports(src, Language::Python, &["import sys"]);
        assert_eq!(out, "\"\"\"Module.\"\"\"\n\nimport sys\n\ndef f():\n    pass\n");
    }

    #[test]
    fn test_insert_after_imports() {
        let src = "import os\n\ndef existing():\n    pass\n";
        let out = insert_after_imports(src, Language::Python, &["X = 1", "Y = X"]);
        assert_eq!(out, "import os\n\nX = 1\nY = X\n\ndef existing():\n    pass\n");
        let again = insert_after_imports(&out, Language::Python, &["X = 1"]);
        assert_eq!(again, out);
    }

    #[test]
    fn test_append_top_level_skips_existing() {
        let src = "def existing():\n    pass\n";
        let out = append_top_level(
            src,
            Language::Python,
            &[("helper", "def helper():\n    pass"), ("existing", "def existing():\n    pass")],
        );
        assert_eq!(out, "def existing():\n    pass\n\n\ndef helper():\n    pass\n");
        assert_eq!(append_top_level("", Language::Rust, &[("a", "fn a() {}")]), "fn a() {}\n");
    }

    #[test]
    fn test_append_to_class() {
        let py = "class Api:\n    def get(self):\n        return 1\n\nX = 1\n";
        let out = append_to_class(py, Language::Python, "Api", &[("Api.put", "    def put(self):\n        return 2")])
            .unwrap();
        assert_eq!(
            out,
            "class Api:\n    def get(self):\n        return 1\n\n    def put(self):\n        return 2\n\nX = 1\n"
        );

        let ts = "class Api {\n  get() {\n    return 1;\n  }\n}\n";
        let out = append_to_class(ts, Language::TypeScript, "Api", &[("Api.put", "  put() {\n    return 2;\n  }")])
            .unwrap();
        assert_eq!(out, "class Api {\n  get() {\n    return 1;\n  }\n\n  put() {\n    return 2;\n  }\n}\n");
        assert!(append_to_class(ts, Language::TypeScript, "Missing", &[]).is_none());
    }

    #[test]
    fn test_insert_hooks_and_wrap() {
        let src = "def handler(req):\n    \"\"\"Doc.\"\"\"\n    return process(req)\n";
        let hooked = insert_hooks(src, Language::Python, "handler", &["audit(req)".into(), "trace()".into()])
            .unwrap();
        assert_eq!(
            hooked,
            "def handler(req):\n    \"\"\"Doc.\"\"\"\n    audit(req)\n    trace()\n    return process(req)\n"
        );
        let again = insert_hooks(&hooked, Language::Python, "handler", &["audit(req)".into()]).unwrap();
        assert_eq!(again, hooked);

        let wrapped = wrap_return(&hooked, Language::Python, "handler", "process(req)", "cache(process(req))")
            .unwrap();
        assert!(wrapped.contains("    return cache(process(req))\n"));
        assert!(wrap_return(src, Language::Python, "handler", "nothing", "x(nothing)").is_none());
        assert!(insert_hooks(src, Language::Python, "missing", &[]).is_none());
    }

    #[test]
    fn test_replace_and_remove() {
        let src = "fn a() {\n    call(1);\n}\n\nfn b() {}\n";
        let out = replace_line(src, Language::Rust, "a", "call(1);", "call(1, 2);").unwrap();
        assert_eq!(out, "fn a() {\n    call(1, 2);\n}\n\nfn b() {}\n");
        let out = replace_element(&out, Language::Rust, "b", "fn b() -> u8 {\n    1\n}").unwrap();
        assert!(out.ends_with("fn b() -> u8 {\n    1\n}\n"));
        let out = remove_element(&out, Language::Rust, "a").unwrap();
        assert_eq!(out, "fn b() -> u8 {\n    1\n}\n");
    }
}
