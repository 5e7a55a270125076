//! Classified files and analysis units.
//!
//! An [`AnalysisUnit`] groups the files that one step invocation consumes
//! together, typically a tumor sample and its matched normal.

use std::fmt;

use crate::barcode::Barcode;

/// The role a file plays within an analysis unit, derived from the tissue
/// code of its barcode. Classification failure degrades to `Unspecified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Unspecified,
    Sample,
    Control,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Sample => write!(f, "sample"),
            Self::Control => write!(f, "control"),
        }
    }
}

/// A filename together with the classification derived from it, created
/// exactly once per filename entering a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub filename: String,
    pub role: FileRole,
    barcode: Option<Barcode>,
}

impl FileData {
    /// Classify a filename. An unparseable name is not an error: the file
    /// keeps flowing through the pipeline without barcode metadata.
    pub fn classify(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        match Barcode::parse(&filename) {
            Ok(barcode) => {
                let role = if barcode.tissue.is_normal() {
                    FileRole::Control
                } else if barcode.tissue.is_tumor() {
                    FileRole::Sample
                } else {
                    FileRole::Unspecified
                };
                Self {
                    filename,
                    role,
                    barcode: Some(barcode),
                }
            }
            Err(_) => Self {
                filename,
                role: FileRole::Unspecified,
                barcode: None,
            },
        }
    }

    pub fn barcode(&self) -> Option<&Barcode> {
        self.barcode.as_ref()
    }

    pub fn organism(&self) -> Option<&str> {
        self.barcode.as_ref().and_then(|b| b.organism.as_deref())
    }

    pub fn read_index(&self) -> Option<u8> {
        self.barcode.as_ref().and_then(|b| b.read_index)
    }
}

/// An ordered collection of classified files processed by one step
/// invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisUnit {
    files: Vec<FileData>,
}

impl AnalysisUnit {
    pub fn new(files: Vec<FileData>) -> Self {
        Self { files }
    }

    pub fn single(file: FileData) -> Self {
        Self { files: vec![file] }
    }

    pub fn files(&self) -> &[FileData] {
        &self.files
    }

    pub fn into_files(self) -> Vec<FileData> {
        self.files
    }

    pub fn filenames(&self) -> Vec<String> {
        self.files.iter().map(|f| f.filename.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The sample file of the unit. When a unit contains more than one
    /// sample file the first one wins; units built by the input resolver
    /// hold at most one.
    pub fn sample(&self) -> Option<&FileData> {
        self.files.iter().find(|f| f.role == FileRole::Sample)
    }

    /// The control file of the unit, first match on duplicates as for
    /// [`sample`](Self::sample).
    pub fn control(&self) -> Option<&FileData> {
        self.files.iter().find(|f| f.role == FileRole::Control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_derives_role_from_tissue() {
        assert_eq!(FileData::classify("ct-p7-011-ak1.fastq").role, FileRole::Sample);
        assert_eq!(FileData::classify("ct-p7-101-ak1.fastq").role, FileRole::Control);
        assert_eq!(FileData::classify("ct-p7-201-ak1.fastq").role, FileRole::Unspecified);
        assert_eq!(FileData::classify("report.txt").role, FileRole::Unspecified);
    }

    #[test]
    fn accessors_prefer_first_match() {
        let unit = AnalysisUnit::new(vec![
            FileData::classify("ct-p7-011-ak1.fastq"),
            FileData::classify("ct-p7-021-ak1.fastq"),
            FileData::classify("ct-p7-101-ak1.fastq"),
            FileData::classify("ct-p7-111-ak1.fastq"),
        ]);
        assert_eq!(unit.sample().unwrap().filename, "ct-p7-011-ak1.fastq");
        assert_eq!(unit.control().unwrap().filename, "ct-p7-101-ak1.fastq");
    }

    #[test]
    fn accessors_on_unclassified_unit() {
        let unit = AnalysisUnit::single(FileData::classify("notes.txt"));
        assert!(unit.sample().is_none());
        assert!(unit.control().is_none());
    }
}
