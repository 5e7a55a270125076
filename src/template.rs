//! `{placeholder}` resolution against a closed variable context.
//!
//! Command lines, output filename formats and failure messages may contain
//! `{expr}` placeholders. An expression is an identifier followed by zero
//! or more dotted accesses, e.g. `{organism}`, `{input_filename.barcode.patient}`
//! or `{output_filename.0}`. Expressions are evaluated against an explicit
//! [`TemplateContext`]; there is no ambient scope of any kind.
//!
//! Resolution is strict by default: an unknown identifier is an error, so a
//! partially formed command can never execute. The lenient mode leaves an
//! unresolvable placeholder intact and exists only for output templates
//! whose remaining markers a caller-supplied function expands procedurally.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::analysis::FileData;
use crate::barcode::Barcode;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^}]+)\}").expect("valid regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("cannot evaluate {{{expr}}}")]
    Unresolved { expr: String },

    #[error("invalid placeholder expression {{{expr}}}")]
    InvalidExpr { expr: String },

    #[error("cannot access {attr:?} in {{{expr}}}")]
    InvalidAccess { expr: String, attr: String },
}

/// How to treat a placeholder whose root identifier is not in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Unresolvable placeholders are an error.
    Strict,
    /// Unresolvable placeholders are left intact for a later expansion
    /// pass. An invalid access on a known identifier is still an error.
    Lenient,
}

/// A typed value bound to a template identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Str(String),
    List(Vec<TemplateValue>),
    File(FileData),
    Barcode(Barcode),
}

impl TemplateValue {
    fn access(&self, attr: &str) -> Option<TemplateValue> {
        match self {
            Self::Str(_) => None,
            Self::List(items) => attr.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            Self::File(file) => match attr {
                "filename" => Some(Self::Str(file.filename.clone())),
                "role" => Some(Self::Str(file.role.to_string())),
                "barcode" => file.barcode().cloned().map(Self::Barcode),
                _ => None,
            },
            Self::Barcode(barcode) => match attr {
                "project" => Some(Self::Str(barcode.project.clone())),
                "patient" => Some(Self::Str(barcode.patient.clone())),
                "tissue" => Some(Self::Str(format!("{:02}", barcode.tissue.code()))),
                "biopsy" => Some(Self::Str(barcode.biopsy.to_string())),
                "kit" => Some(Self::Str(barcode.kit.clone())),
                "sequencing" => Some(Self::Str(barcode.sequencing.to_string())),
                "organism" => barcode.organism.clone().map(Self::Str),
                "read_index" => barcode.read_index.map(|i| Self::Str(i.to_string())),
                "extension" => Some(Self::Str(barcode.extension.clone())),
                _ => None,
            },
        }
    }
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::File(file) => write!(f, "{}", file.filename),
            Self::Barcode(barcode) => write!(f, "{barcode}"),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<String>> for TemplateValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value.into_iter().map(Self::Str).collect())
    }
}

impl From<FileData> for TemplateValue {
    fn from(value: FileData) -> Self {
        Self::File(value)
    }
}

impl From<Vec<FileData>> for TemplateValue {
    fn from(value: Vec<FileData>) -> Self {
        Self::List(value.into_iter().map(Self::File).collect())
    }
}

/// The closed mapping from identifier to value a template resolves against.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, TemplateValue>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<TemplateValue>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&TemplateValue> {
        self.vars.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }
}

/// Substitute every placeholder in `template`, left to right, in a single
/// scan. Values substituted into the result are not rescanned.
pub fn resolve(
    template: &str,
    context: &TemplateContext,
    mode: ResolveMode,
) -> Result<String, TemplateError> {
    let mut result = String::with_capacity(template.len());
    let mut last_end = 0;

    for captures in PLACEHOLDER.captures_iter(template) {
        let matched = captures.get(0).expect("capture 0 always present");
        let expr = captures.get(1).expect("one capture group").as_str();

        result.push_str(&template[last_end..matched.start()]);
        match evaluate(expr, context) {
            Ok(value) => result.push_str(&value.to_string()),
            Err(TemplateError::Unresolved { .. } | TemplateError::InvalidExpr { .. })
                if mode == ResolveMode::Lenient =>
            {
                result.push_str(matched.as_str());
            }
            Err(err) => return Err(err),
        }
        last_end = matched.end();
    }

    result.push_str(&template[last_end..]);
    Ok(result)
}

fn evaluate(expr: &str, context: &TemplateContext) -> Result<TemplateValue, TemplateError> {
    let segments: Vec<&str> = expr.split('.').map(str::trim).collect();
    let root = segments[0];
    if !is_identifier(root) {
        return Err(TemplateError::InvalidExpr {
            expr: expr.to_string(),
        });
    }

    let mut value = context
        .get(root)
        .cloned()
        .ok_or_else(|| TemplateError::Unresolved {
            expr: expr.to_string(),
        })?;

    for attr in &segments[1..] {
        if attr.is_empty() {
            return Err(TemplateError::InvalidExpr {
                expr: expr.to_string(),
            });
        }
        value = value.access(attr).ok_or_else(|| TemplateError::InvalidAccess {
            expr: expr.to_string(),
            attr: attr.to_string(),
        })?;
    }

    Ok(value)
}

fn is_identifier(segment: &str) -> bool {
    let mut bytes = segment.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TemplateContext {
        let mut ctx = TemplateContext::new();
        ctx.set("organism", "hg19");
        ctx.set("organism_str", "");
        ctx.set("genome_ref", "/refs/hg19.fa");
        ctx.set(
            "input_filenames",
            vec![
                FileData::classify("ct-p7-011-ak1.hg19.R1.fastq"),
                FileData::classify("ct-p7-011-ak1.hg19.R2.fastq"),
            ],
        );
        ctx.set("input_filename", FileData::classify("ct-p7-011-ak1.hg19.R1.fastq"));
        ctx
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let resolved = resolve("bwa mem -t 8 ref.fa", &context(), ResolveMode::Strict).unwrap();
        assert_eq!(resolved, "bwa mem -t 8 ref.fa");
    }

    #[test]
    fn substitutes_every_placeholder_left_to_right() {
        let resolved = resolve(
            "align -r {genome_ref} {input_filenames} > out{organism_str}.sam",
            &context(),
            ResolveMode::Strict,
        )
        .unwrap();
        assert_eq!(
            resolved,
            "align -r /refs/hg19.fa ct-p7-011-ak1.hg19.R1.fastq ct-p7-011-ak1.hg19.R2.fastq > out.sam"
        );
    }

    #[test]
    fn empty_string_values_substitute_silently() {
        let resolved = resolve("out{organism_str}.bam", &context(), ResolveMode::Strict).unwrap();
        assert_eq!(resolved, "out.bam");
    }

    #[test]
    fn unresolved_identifier_is_an_error_with_no_partial_substitution() {
        let err = resolve("a {organism} b {missing} c", &context(), ResolveMode::Strict).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                expr: "missing".to_string()
            }
        );
    }

    #[test]
    fn lenient_mode_leaves_unknown_placeholders_intact() {
        let resolved = resolve(
            "{organism}.clipped.R{n}.fastq",
            &context(),
            ResolveMode::Lenient,
        )
        .unwrap();
        assert_eq!(resolved, "hg19.clipped.R{n}.fastq");
    }

    #[test]
    fn lenient_mode_still_rejects_bad_access_on_known_identifier() {
        let err = resolve("{organism.nope}", &context(), ResolveMode::Lenient).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidAccess { .. }));
    }

    #[test]
    fn dotted_access_reaches_barcode_fields() {
        let resolved = resolve(
            "{input_filename.barcode.project}/{input_filename.barcode.patient}",
            &context(),
            ResolveMode::Strict,
        )
        .unwrap();
        assert_eq!(resolved, "ct/p7");
    }

    #[test]
    fn numeric_access_indexes_lists() {
        let resolved = resolve(
            "first={input_filenames.0} second={input_filenames.1}",
            &context(),
            ResolveMode::Strict,
        )
        .unwrap();
        assert_eq!(
            resolved,
            "first=ct-p7-011-ak1.hg19.R1.fastq second=ct-p7-011-ak1.hg19.R2.fastq"
        );
        assert!(resolve("{input_filenames.9}", &context(), ResolveMode::Strict).is_err());
    }

    #[test]
    fn absent_optional_barcode_field_is_an_error() {
        let mut ctx = TemplateContext::new();
        ctx.set("f", FileData::classify("ct-p7-011-ak1.fastq"));
        let err = resolve("{f.barcode.organism}", &ctx, ResolveMode::Strict).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidAccess { .. }));
    }
}
