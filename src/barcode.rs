//! Filename barcode parsing.
//!
//! Every file produced by the sequencing facility follows the naming
//! convention
//!
//! ```text
//! <project>-<patient>-<tissue><biopsy>-<kit><sequencing>[.<organism>][.R<n>].<ext>
//! ```
//!
//! e.g. `lung-p001-021-xk1.hg19.R1.fastq`: project `lung`, patient `p001`,
//! tissue code `02` (recurrent tumor) biopsy `1`, capture kit `xk` sequenced
//! with method `1`, aligned against `hg19`, first read of the pair.
//!
//! Parsing is used opportunistically: a file that does not follow the
//! convention is still processed, it just cannot participate in
//! organism grouping or tumor/normal pairing.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Tissue codes, following the TCGA sample-type numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tissue {
    PrimaryTumor,
    RecurrentTumor,
    PrimaryBloodTumor,
    MetastaticTumor,
    BloodNormal,
    SolidNormal,
    BuccalNormal,
    ControlAnalyte,
    CellLine,
}

impl Tissue {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::PrimaryTumor),
            2 => Some(Self::RecurrentTumor),
            3 => Some(Self::PrimaryBloodTumor),
            6 => Some(Self::MetastaticTumor),
            10 => Some(Self::BloodNormal),
            11 => Some(Self::SolidNormal),
            12 => Some(Self::BuccalNormal),
            20 => Some(Self::ControlAnalyte),
            50 => Some(Self::CellLine),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::PrimaryTumor => 1,
            Self::RecurrentTumor => 2,
            Self::PrimaryBloodTumor => 3,
            Self::MetastaticTumor => 6,
            Self::BloodNormal => 10,
            Self::SolidNormal => 11,
            Self::BuccalNormal => 12,
            Self::ControlAnalyte => 20,
            Self::CellLine => 50,
        }
    }

    pub fn is_tumor(&self) -> bool {
        matches!(
            self,
            Self::PrimaryTumor
                | Self::RecurrentTumor
                | Self::PrimaryBloodTumor
                | Self::MetastaticTumor
                | Self::CellLine
        )
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Self::BloodNormal | Self::SolidNormal | Self::BuccalNormal)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarcodeError {
    #[error("malformed barcode in {name:?}: {reason}")]
    Malformed { name: String, reason: &'static str },

    #[error("unknown tissue code {0:02}")]
    UnknownTissue(u8),
}

/// Structured metadata parsed from a barcoded filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    pub project: String,
    pub patient: String,
    pub tissue: Tissue,
    pub biopsy: u8,
    pub kit: String,
    pub sequencing: u8,
    pub organism: Option<String>,
    pub read_index: Option<u8>,
    pub extension: String,
}

impl Barcode {
    /// Parse the barcode out of a filename. Directory components and the
    /// extension chain are ignored for identity purposes; only the base
    /// name is inspected.
    pub fn parse(filename: &str) -> Result<Self, BarcodeError> {
        let malformed = |reason| BarcodeError::Malformed {
            name: filename.to_string(),
            reason,
        };

        let base = Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| malformed("not a valid file name"))?;

        let components: Vec<&str> = base.split('.').collect();
        if components.len() < 2 {
            return Err(malformed("missing extension"));
        }
        let stem = components[0];
        let extension = components[components.len() - 1].to_string();
        if extension.is_empty() {
            return Err(malformed("empty extension"));
        }

        let fields: Vec<&str> = stem.split('-').collect();
        if fields.len() != 4 {
            return Err(malformed("stem must have four dash-separated fields"));
        }

        let project = parse_token(fields[0]).ok_or_else(|| malformed("invalid project field"))?;
        let patient = parse_token(fields[1]).ok_or_else(|| malformed("invalid patient field"))?;

        let tissue_field = fields[2];
        if tissue_field.len() != 3 || !tissue_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("tissue field must be three digits"));
        }
        let tissue_code: u8 = tissue_field[..2].parse().expect("checked digits");
        let tissue = Tissue::from_code(tissue_code).ok_or(BarcodeError::UnknownTissue(tissue_code))?;
        let biopsy: u8 = tissue_field[2..].parse().expect("checked digits");

        let kit_field = fields[3];
        if kit_field.len() < 2 {
            return Err(malformed("kit field too short"));
        }
        let (kit, sequencing_char) = kit_field.split_at(kit_field.len() - 1);
        if !kit.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(malformed("kit code must be alphabetic"));
        }
        let sequencing: u8 = sequencing_char
            .parse()
            .map_err(|_| malformed("sequencing method must be a digit"))?;

        let mut organism = None;
        let mut read_index = None;
        for component in &components[1..components.len() - 1] {
            if let Some(digits) = component.strip_prefix('R') {
                if read_index.is_some() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(malformed("invalid read index component"));
                }
                read_index = Some(digits.parse().map_err(|_| malformed("read index out of range"))?);
            } else if is_assembly(component) {
                if organism.is_some() || read_index.is_some() {
                    return Err(malformed("organism must precede the read index"));
                }
                organism = Some(component.to_string());
            } else {
                return Err(malformed("unrecognized filename component"));
            }
        }

        Ok(Self {
            project,
            patient,
            tissue,
            biopsy,
            kit: kit.to_string(),
            sequencing,
            organism,
            read_index,
            extension,
        })
    }

    /// Whether two barcodes refer to the same biological source, ignoring
    /// the tissue dimension. Used to pair a tumor sample with its matched
    /// normal: the sequencing method and biopsy number are deliberately not
    /// part of the identity (the sequencing method is a tie-break key).
    pub fn same_identity_ignoring_tissue(&self, other: &Barcode) -> bool {
        self.project == other.project
            && self.patient == other.patient
            && self.kit == other.kit
            && self.organism == other.organism
    }
}

impl fmt::Display for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:02}{}-{}{}",
            self.project,
            self.patient,
            self.tissue.code(),
            self.biopsy,
            self.kit,
            self.sequencing
        )?;
        if let Some(organism) = &self.organism {
            write!(f, ".{organism}")?;
        }
        if let Some(read_index) = self.read_index {
            write!(f, ".R{read_index}")?;
        }
        Ok(())
    }
}

fn parse_token(field: &str) -> Option<String> {
    if !field.is_empty() && field.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Some(field.to_string())
    } else {
        None
    }
}

/// A genome assembly tag: a lowercase alphabetic prefix followed by at
/// least one digit, e.g. `hg19`, `hg38`, `mm10`.
fn is_assembly(component: &str) -> bool {
    let mut bytes = component.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    first.is_ascii_lowercase()
        && component.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        && component.bytes().any(|b| b.is_ascii_digit())
}
