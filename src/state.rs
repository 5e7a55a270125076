//! Pipeline state threaded between steps.
//!
//! The state is the engine's only persistent value across steps: the set of
//! files the previous committing step produced, grouped by organism. It is
//! replaced wholesale at commit time, never merged.

use std::collections::BTreeMap;

use crate::analysis::{AnalysisUnit, FileData};

/// The organism key used for files without an organism classification.
pub const UNSPECIFIED_ORGANISM: &str = "";

/// The current set of files the next step will consume, grouped by
/// organism (`""` = unspecified).
///
/// `can_delete_inputs` records whether these files were produced by a
/// committing step of this run: only then may a later step unlink them.
/// Externally seeded state is never deletable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    analyses: BTreeMap<String, Vec<AnalysisUnit>>,
    can_delete_inputs: bool,
}

impl PipelineState {
    /// Build a state from bare filenames, classifying each one and grouping
    /// by organism.
    pub fn from_filenames<I, S>(filenames: I, can_delete_inputs: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut analyses: BTreeMap<String, Vec<AnalysisUnit>> = BTreeMap::new();
        for filename in filenames {
            let file = FileData::classify(filename.into());
            let organism = file.organism().unwrap_or(UNSPECIFIED_ORGANISM).to_string();
            analyses.entry(organism).or_default().push(AnalysisUnit::single(file));
        }
        Self {
            analyses,
            can_delete_inputs,
        }
    }

    pub(crate) fn from_parts(
        analyses: BTreeMap<String, Vec<AnalysisUnit>>,
        can_delete_inputs: bool,
    ) -> Self {
        Self {
            analyses,
            can_delete_inputs,
        }
    }

    pub fn analyses(&self) -> &BTreeMap<String, Vec<AnalysisUnit>> {
        &self.analyses
    }

    pub fn can_delete_inputs(&self) -> bool {
        self.can_delete_inputs
    }

    pub fn is_empty(&self) -> bool {
        self.analyses.values().all(|units| units.is_empty())
    }

    /// Every filename in the state, in organism order.
    pub fn all_filenames(&self) -> Vec<String> {
        self.analyses
            .values()
            .flat_map(|units| units.iter().flat_map(AnalysisUnit::filenames))
            .collect()
    }

    /// The filenames grouped by their organism key.
    pub fn filenames_by_organism(&self) -> BTreeMap<String, Vec<String>> {
        self.analyses
            .iter()
            .map(|(organism, units)| {
                (
                    organism.clone(),
                    units.iter().flat_map(AnalysisUnit::filenames).collect(),
                )
            })
            .collect()
    }
}

/// Outputs produced while one step executes: the full mapping that becomes
/// the next pipeline state on commit, plus the subset of indexed binary
/// alignment artifacts that downstream consumers track separately.
#[derive(Debug, Clone, Default)]
pub struct OutputAccumulator {
    primary: BTreeMap<String, Vec<String>>,
    alignments: BTreeMap<String, Vec<String>>,
}

impl OutputAccumulator {
    pub fn record(&mut self, organism: &str, filename: String) {
        if is_alignment_artifact(&filename) {
            self.alignments
                .entry(organism.to_string())
                .or_default()
                .push(filename.clone());
        }
        self.primary.entry(organism.to_string()).or_default().push(filename);
    }

    pub fn primary(&self) -> &BTreeMap<String, Vec<String>> {
        &self.primary
    }

    pub fn alignments(&self) -> &BTreeMap<String, Vec<String>> {
        &self.alignments
    }

    pub fn is_empty(&self) -> bool {
        self.primary.values().all(|files| files.is_empty())
    }

    /// Turn the primary mapping into the next pipeline state. State
    /// produced by a committing step is always deletable.
    pub fn into_state(self) -> PipelineState {
        let analyses = self
            .primary
            .into_iter()
            .map(|(organism, files)| {
                (
                    organism,
                    files
                        .into_iter()
                        .map(|f| AnalysisUnit::single(FileData::classify(f)))
                        .collect(),
                )
            })
            .collect();
        PipelineState::from_parts(analyses, true)
    }
}

pub(crate) fn is_alignment_artifact(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bam"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_groups_by_classified_organism() {
        let state = PipelineState::from_filenames(
            [
                "ct-p7-011-ak1.hg19.fastq",
                "ct-p7-011-ak1.mm10.fastq",
                "unclassified.fastq",
            ],
            false,
        );
        let by_organism = state.filenames_by_organism();
        assert_eq!(by_organism[""], vec!["unclassified.fastq"]);
        assert_eq!(by_organism["hg19"], vec!["ct-p7-011-ak1.hg19.fastq"]);
        assert_eq!(by_organism["mm10"], vec!["ct-p7-011-ak1.mm10.fastq"]);
        assert!(!state.can_delete_inputs());
    }

    #[test]
    fn accumulator_tracks_alignment_artifacts_separately() {
        let mut acc = OutputAccumulator::default();
        acc.record("hg19", "/out/a.bam".to_string());
        acc.record("hg19", "/out/a.vcf".to_string());
        assert_eq!(acc.primary()["hg19"], vec!["/out/a.bam", "/out/a.vcf"]);
        assert_eq!(acc.alignments()["hg19"], vec!["/out/a.bam"]);
    }

    #[test]
    fn committed_state_is_deletable() {
        let mut acc = OutputAccumulator::default();
        acc.record("", "/out/x.fastq".to_string());
        let state = acc.into_state();
        assert!(state.can_delete_inputs());
        assert_eq!(state.all_filenames(), vec!["/out/x.fastq"]);
    }
}
