//! Typed structural diff between two versions of a file.
//!
//! The analyzer keys extracted elements by qualified name and reports what
//! was added, removed or modified. Modified functions and methods are
//! sub-classified from a line diff so the merge stage can replay a narrow
//! edit (an inserted hook call, a wrapped return, new call arguments)
//! instead of replacing the whole body.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, instrument};

use crate::models::{
    ChangeType, SemanticChange, META_CALLEE, META_CALL_AFTER, META_CALL_BEFORE, META_DEPENDS_ON,
    META_ELEMENT_TYPE, META_HOOKS, META_PARENT, META_RETURN_AFTER, META_RETURN_BEFORE,
    META_WRAPPER,
};
use crate::semantic::extract::{
    extract_elements, normalize_whitespace, scan_line, strip_whitespace, ElementType,
    ExtractedElement, Language, ScanState,
};

/// Location key for changes outside any function or class.
pub const FILE_TOP: &str = "file_top";

/// Stateless structural differ.
#[derive(Debug, Default, Clone, Copy)]
pub struct SemanticAnalyzer;

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Extract the elements of `content`, choosing the language from
    /// `file_path`.
    pub fn extract(&self, file_path: &str, content: &str) -> Vec<ExtractedElement> {
        extract_elements(content, Language::from_path(file_path))
    }

    /// Classified changes taking `before` to `after`.
    ///
    /// Files the extractor does not understand produce a single
    /// [`ChangeType::ModifyFile`] change when their text differs.
    #[instrument(skip(self, before, after))]
    pub fn analyze_diff(&self, file_path: &str, before: &str, after: &str) -> Vec<SemanticChange> {
        if before == after {
            return Vec::new();
        }
        let language = Language::from_path(file_path);
        if !language.is_structured() {
            debug!("no structural extractor, recording whole-file change");
            return vec![SemanticChange::new(
                ChangeType::ModifyFile,
                file_path,
                FILE_TOP,
                1,
                after.lines().count().max(1),
            )
            .with_before(before)
            .with_after(after)];
        }

        let before_elements = extract_elements(before, language);
        let after_elements = extract_elements(after, language);
        let changes = self.compare_language(&before_elements, &after_elements, language);
        debug!(count = changes.len(), "classified changes");
        changes
    }

    /// Compare two element sets of the same file.
    ///
    /// `file_extension` selects the keyword list used for dependency names
    /// and the sub-classification rules.
    pub fn compare_elements(
        &self,
        before: &[ExtractedElement],
        after: &[ExtractedElement],
        file_extension: &str,
    ) -> Vec<SemanticChange> {
        self.compare_language(before, after, Language::from_extension(file_extension))
    }

    fn compare_language(
        &self,
        before: &[ExtractedElement],
        after: &[ExtractedElement],
        language: Language,
    ) -> Vec<SemanticChange> {
        let before_by_name: HashMap<&str, &ExtractedElement> =
            before.iter().map(|e| (e.name.as_str(), e)).collect();
        let after_by_name: HashMap<&str, &ExtractedElement> =
            after.iter().map(|e| (e.name.as_str(), e)).collect();

        let mut changes = Vec::new();

        for element in before {
            if after_by_name.contains_key(element.name.as_str())
                || covered_by_parent(element, before, &after_by_name)
            {
                continue;
            }
            changes.push(self.removal(element));
        }

        for element in after {
            match before_by_name.get(element.name.as_str()) {
                None => {
                    if covered_by_parent(element, after, &before_by_name) {
                        continue;
                    }
                    changes.push(self.addition(element, language));
                }
                Some(old) if old.content != element.content => {
                    if element.element_type == ElementType::Class
                        && class_skeleton(old, before) == class_skeleton(element, after)
                    {
                        // Only member bodies changed; methods report those.
                        continue;
                    }
                    changes.extend(self.classify_modification(old, element, language));
                }
                Some(_) => {}
            }
        }
        changes
    }

    /// Add-kind change type for an element kind.
    pub fn get_add_change_type(&self, element_type: ElementType) -> ChangeType {
        match element_type {
            ElementType::Function => ChangeType::AddFunction,
            ElementType::Method => ChangeType::AddMethod,
            ElementType::Class => ChangeType::AddClass,
            ElementType::Import => ChangeType::AddImport,
            ElementType::Variable => ChangeType::AddVariable,
            ElementType::Statement => ChangeType::AddStatement,
        }
    }

    /// Remove-kind change type for an element kind.
    pub fn get_remove_change_type(&self, element_type: ElementType) -> ChangeType {
        match element_type {
            ElementType::Function => ChangeType::RemoveFunction,
            ElementType::Method => ChangeType::RemoveMethod,
            ElementType::Class => ChangeType::RemoveClass,
            ElementType::Import => ChangeType::RemoveImport,
            ElementType::Variable => ChangeType::RemoveVariable,
            ElementType::Statement => ChangeType::RemoveStatement,
        }
    }

    /// Conflict grouping key for an element.
    pub fn get_location(&self, element: &ExtractedElement) -> String {
        match (element.element_type, &element.parent) {
            (ElementType::Method, Some(parent)) => format!("class:{parent}"),
            (ElementType::Class, _) => format!("class:{}", element.name),
            (ElementType::Function, _) | (ElementType::Method, None) => {
                format!("function:{}", element.name)
            }
            _ => FILE_TOP.to_string(),
        }
    }

    fn addition(&self, element: &ExtractedElement, language: Language) -> SemanticChange {
        let mut change = SemanticChange::new(
            self.get_add_change_type(element.element_type),
            &element.name,
            self.get_location(element),
            element.start_line,
            element.end_line,
        )
        .with_after(&element.content)
        .with_metadata(
            META_DEPENDS_ON,
            dependency_names(&element.content, element.simple_name(), language),
        );
        change = annotate(change, element);
        change
    }

    fn removal(&self, element: &ExtractedElement) -> SemanticChange {
        let change = SemanticChange::new(
            self.get_remove_change_type(element.element_type),
            &element.name,
            self.get_location(element),
            element.start_line,
            element.end_line,
        )
        .with_before(&element.content);
        annotate(change, element)
    }

    /// Classify an element present in both versions with differing content.
    pub fn classify_modification(
        &self,
        before: &ExtractedElement,
        after: &ExtractedElement,
        language: Language,
    ) -> Vec<SemanticChange> {
        let base = || {
            SemanticChange::new(
                ChangeType::ModifyFunction,
                &after.name,
                self.get_location(after),
                after.start_line,
                after.end_line,
            )
            .with_before(&before.content)
            .with_after(&after.content)
        };

        if strip_whitespace(&before.content) == strip_whitespace(&after.content) {
            let mut change = base();
            change.change_type = ChangeType::FormattingOnly;
            return vec![annotate(change, after)];
        }

        match after.element_type {
            ElementType::Function | ElementType::Method => {
                self.classify_function_modification(before, after, language)
            }
            ElementType::Class => {
                let mut change = base();
                change.change_type = ChangeType::ModifyClass;
                vec![change]
            }
            ElementType::Variable => {
                let mut change = base();
                change.change_type = ChangeType::ModifyVariable;
                vec![annotate(change, after)]
            }
            ElementType::Import | ElementType::Statement => {
                vec![self.removal(before), self.addition(after, language)]
            }
        }
    }

    /// Sub-classify a function or method body change.
    ///
    /// Recognized shapes: hook calls inserted at the top of the body, one
    /// `return X` rewritten to `return W(X)`, and call lines whose arguments
    /// changed. Hooks combined with a single wrap yield both changes.
    /// Anything else is a plain `ModifyFunction`/`ModifyMethod`.
    pub fn classify_function_modification(
        &self,
        before: &ExtractedElement,
        after: &ExtractedElement,
        language: Language,
    ) -> Vec<SemanticChange> {
        let location = self.get_location(after);
        let generic_type = if after.element_type == ElementType::Method {
            ChangeType::ModifyMethod
        } else {
            ChangeType::ModifyFunction
        };
        let narrow = |change_type: ChangeType| {
            annotate(
                SemanticChange::new(
                    change_type,
                    &after.name,
                    &location,
                    after.start_line,
                    after.end_line,
                )
                .with_before(&before.content)
                .with_after(&after.content),
                after,
            )
        };
        let generic = || {
            vec![narrow(generic_type).with_metadata(
                META_DEPENDS_ON,
                dependency_names(&after.content, after.simple_name(), language),
            )]
        };

        let body_start = body_start_index(&before.content, language);
        let mut hooks: Vec<String> = Vec::new();
        let mut wraps: Vec<(String, String, String)> = Vec::new();
        let mut calls: Vec<(String, String, String)> = Vec::new();

        for block in edit_blocks(&before.content, &after.content) {
            let deleted = non_blank(&block.deleted);
            let inserted = non_blank(&block.inserted);

            if deleted.is_empty() && inserted.is_empty() {
                continue;
            }
            if strip_whitespace(&deleted.join("")) == strip_whitespace(&inserted.join("")) {
                continue;
            }
            if deleted.is_empty()
                && block.old_index == body_start
                && inserted.iter().all(|l| is_call_statement(l))
            {
                hooks.extend(inserted.iter().map(|l| l.trim().to_string()));
                continue;
            }
            if deleted.len() == 1 && inserted.len() == 1 {
                if let Some(wrap) = parse_wrap(deleted[0], inserted[0]) {
                    wraps.push(wrap);
                    continue;
                }
            }
            if deleted.len() == inserted.len() {
                let pairs: Option<Vec<_>> = deleted
                    .iter()
                    .zip(&inserted)
                    .map(|(d, i)| parse_argument_change(d, i))
                    .collect();
                if let Some(pairs) = pairs {
                    calls.extend(pairs);
                    continue;
                }
            }
            debug!(element = %after.name, "body edit is not a narrow shape");
            return generic();
        }

        let mut changes = Vec::new();
        match (hooks.is_empty(), wraps.len(), calls.is_empty()) {
            (true, 0, true) => return generic(),
            (_, 0 | 1, true) => {
                if !hooks.is_empty() {
                    changes.push(narrow(ChangeType::AddHookCall).with_metadata(META_HOOKS, hooks));
                }
                if let Some((expr_before, expr_after, wrapper)) = wraps.pop() {
                    changes.push(
                        narrow(ChangeType::WrapReturn)
                            .with_metadata(META_RETURN_BEFORE, expr_before)
                            .with_metadata(META_RETURN_AFTER, expr_after)
                            .with_metadata(META_WRAPPER, wrapper),
                    );
                }
            }
            (true, 0, false) => {
                for (callee, call_before, call_after) in calls {
                    changes.push(
                        narrow(ChangeType::ModifyCallArguments)
                            .with_metadata(META_CALLEE, callee)
                            .with_metadata(META_CALL_BEFORE, call_before)
                            .with_metadata(META_CALL_AFTER, call_after),
                    );
                }
            }
            _ => return generic(),
        }
        changes
    }
}

/// Parent/element-kind metadata shared by every change on `element`.
fn annotate(change: SemanticChange, element: &ExtractedElement) -> SemanticChange {
    let change = match &element.parent {
        Some(parent) => change.with_metadata(META_PARENT, parent.as_str()),
        None => change,
    };
    match element.element_type {
        ElementType::Import | ElementType::Variable | ElementType::Statement => {
            change.with_metadata(META_ELEMENT_TYPE, element.element_type.to_string())
        }
        _ => change,
    }
}

/// Whether `element` sits textually inside a parent class that is absent
/// from `other`, so the parent's own add/remove already carries it.
fn covered_by_parent(
    element: &ExtractedElement,
    siblings: &[ExtractedElement],
    other: &HashMap<&str, &ExtractedElement>,
) -> bool {
    let Some(parent) = &element.parent else {
        return false;
    };
    if other.contains_key(parent.as_str()) {
        return false;
    }
    siblings.iter().any(|p| {
        p.element_type == ElementType::Class
            && &p.name == parent
            && p.start_line <= element.start_line
            && element.end_line <= p.end_line
    })
}

/// Class text with member bodies removed, whitespace-normalized.
fn class_skeleton(class: &ExtractedElement, elements: &[ExtractedElement]) -> String {
    let lines: Vec<&str> = class.content.lines().collect();
    let mut keep = vec![true; lines.len()];
    for member in elements
        .iter()
        .filter(|e| e.element_type == ElementType::Method && e.parent.as_ref() == Some(&class.name))
    {
        for line in member.start_line..=member.end_line {
            if let Some(slot) = line
                .checked_sub(class.start_line)
                .and_then(|i| keep.get_mut(i))
            {
                *slot = false;
            }
        }
    }
    let kept: Vec<&str> = lines
        .iter()
        .zip(keep)
        .filter_map(|(l, k)| k.then_some(*l))
        .collect();
    normalize_whitespace(&kept.join("\n"))
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static identifier pattern"))
}

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\\n]|\\.)*'"#).expect("static string pattern")
    })
}

/// Identifiers referenced by `content`, minus its own name and keywords.
pub fn dependency_names(content: &str, own_name: &str, language: Language) -> Vec<String> {
    let keywords: HashSet<&str> = language.keywords().iter().copied().collect();
    let own = own_name.split('#').next().unwrap_or(own_name);
    let stripped = string_literal_re().replace_all(content, " ");
    let names: BTreeSet<String> = identifier_re()
        .find_iter(&stripped)
        .map(|m| m.as_str())
        .filter(|name| *name != own && !keywords.contains(name))
        .map(str::to_string)
        .collect();
    names.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Line-diff helpers
// ---------------------------------------------------------------------------

/// A run of consecutive deleted/inserted lines at one position.
#[derive(Debug, Default)]
struct EditBlock {
    /// 0-based line index in the old text where the run starts.
    old_index: usize,
    deleted: Vec<String>,
    inserted: Vec<String>,
}

fn edit_blocks(before: &str, after: &str) -> Vec<EditBlock> {
    let patch = diffy::create_patch(before, after);
    let mut blocks = Vec::new();
    for hunk in patch.hunks() {
        let mut old_index = hunk.old_range().start().saturating_sub(1);
        let mut current: Option<EditBlock> = None;
        for line in hunk.lines() {
            match line {
                diffy::Line::Context(_) => {
                    blocks.extend(current.take());
                    old_index += 1;
                }
                diffy::Line::Delete(text) => {
                    current
                        .get_or_insert_with(|| EditBlock {
                            old_index,
                            ..EditBlock::default()
                        })
                        .deleted
                        .push(text.trim_end_matches(['\n', '\r']).to_string());
                    old_index += 1;
                }
                diffy::Line::Insert(text) => {
                    current
                        .get_or_insert_with(|| EditBlock {
                            old_index,
                            ..EditBlock::default()
                        })
                        .inserted
                        .push(text.trim_end_matches(['\n', '\r']).to_string());
                }
            }
        }
        blocks.extend(current.take());
    }
    blocks
}

fn non_blank(lines: &[String]) -> Vec<&str> {
    lines
        .iter()
        .map(String::as_str)
        .filter(|l| !l.trim().is_empty())
        .collect()
}

/// 0-based index of the first body line of a function element, after the
/// signature and (for Python) a leading docstring.
pub(crate) fn body_start_index(content: &str, language: Language) -> usize {
    let lines: Vec<&str> = content.lines().collect();
    let mut state = ScanState::default();
    let mut depth = 0i32;
    let mut header_end = None;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if header_end.is_none() && (trimmed.starts_with('@') || trimmed.starts_with("#[")) {
            continue;
        }
        let scan = scan_line(line, language, &mut state);
        depth += scan.parens;
        let done = if language.is_python() {
            let code = trimmed.split('#').next().unwrap_or(trimmed).trim_end();
            depth <= 0 && code.ends_with(':')
        } else {
            scan.opened_brace
        };
        if done {
            header_end = Some(i);
            break;
        }
    }
    let Some(header_end) = header_end else {
        return lines.len();
    };
    let mut start = header_end + 1;
    if language.is_python() {
        if let Some(first) = lines.get(start).map(|l| l.trim_start()) {
            for quote in ["\"\"\"", "'''"] {
                if let Some(rest) = first.strip_prefix(quote) {
                    if rest.contains(quote) {
                        return start + 1;
                    }
                    if let Some(close) = lines[start + 1..].iter().position(|l| l.contains(quote)) {
                        start += close + 2;
                    }
                    return start;
                }
            }
        }
    }
    start
}

fn call_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?:let|const|var)\s+)?(?:[A-Za-z_][\w.]*\s*(?::=|=)\s*)?(?:await\s+|try\s+)?([A-Za-z_][\w.:]*!?)\s*\((.*)\)\s*[;?]*$",
        )
        .expect("static call pattern")
    })
}

fn wrap_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][\w.:]*)\s*\((.*)\)$").expect("static wrap pattern")
    })
}

const CONTROL_WORDS: [&str; 9] = [
    "if", "for", "while", "switch", "return", "match", "elif", "catch", "with",
];

/// Whether `line` is a bare call statement, usable as a hook.
pub(crate) fn is_call_statement(line: &str) -> bool {
    let trimmed = line.trim();
    let Some(caps) = call_line_re().captures(trimmed) else {
        return false;
    };
    let callee = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    !CONTROL_WORDS.contains(&callee) && !trimmed.starts_with("return")
}

/// Text after `return`, without a trailing semicolon.
pub(crate) fn return_expression(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("return")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim().trim_end_matches(';').trim_end())
}

/// `(X, W(X), W)` if `after` wraps the return expression of `before`.
fn parse_wrap(before: &str, after: &str) -> Option<(String, String, String)> {
    let expr_before = return_expression(before)?;
    let expr_after = return_expression(after)?;
    let caps = wrap_re().captures(expr_after)?;
    let wrapper = caps.get(1)?.as_str();
    let inner = caps.get(2)?.as_str();
    if normalize_whitespace(inner) != normalize_whitespace(expr_before) || expr_before.is_empty() {
        return None;
    }
    Some((
        expr_before.to_string(),
        expr_after.to_string(),
        wrapper.to_string(),
    ))
}

/// `(callee, before, after)` if both lines call the same callee with
/// different arguments.
fn parse_argument_change(before: &str, after: &str) -> Option<(String, String, String)> {
    let before_caps = call_line_re().captures(before.trim())?;
    let after_caps = call_line_re().captures(after.trim())?;
    let callee = before_caps.get(1)?.as_str();
    if callee != after_caps.get(1)?.as_str() || CONTROL_WORDS.contains(&callee) {
        return None;
    }
    let prefix_before = &before.trim()[..before_caps.get(1)?.start()];
    let prefix_after = &after.trim()[..after_caps.get(1)?.start()];
    if prefix_before != prefix_after {
        return None;
    }
    let args_before = before_caps.get(2)?.as_str();
    let args_after = after_caps.get(2)?.as_str();
    if normalize_whitespace(args_before) == normalize_whitespace(args_after) {
        return None;
    }
    Some((
        callee.to_string(),
        before.trim().to_string(),
        after.trim().to_string(),
    ))
}
