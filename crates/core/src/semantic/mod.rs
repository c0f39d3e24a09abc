//! Structural extraction and typed diffing of source files.

pub mod analyzer;
pub mod extract;

pub use analyzer::{dependency_names, SemanticAnalyzer, FILE_TOP};
pub use extract::{extract_elements, ElementType, ExtractedElement, Language};
