//! Input resolution for one step.
//!
//! Turns the previous step's output (or an explicit filename override)
//! into the per-organism analysis units the step will execute, applying
//! organism grouping, unit splitting, tumor/normal pairing and the
//! optional caller-supplied input transform.

use std::collections::BTreeMap;

use tracing::debug;

use crate::analysis::{AnalysisUnit, FileData, FileRole};
use crate::error::{PipelineError, Result};
use crate::state::{PipelineState, UNSPECIFIED_ORGANISM};
use crate::step::StepConfig;

pub(crate) type UnitsByOrganism = BTreeMap<String, Vec<AnalysisUnit>>;

/// The resolved input of one step: the primary units, plus the fresh
/// units produced by the step's `input_function` when one is configured.
#[derive(Debug)]
pub(crate) struct ResolvedInput {
    pub primary: UnitsByOrganism,
    pub transformed: Option<UnitsByOrganism>,
}

pub(crate) fn resolve_inputs(
    step: &StepConfig,
    state: Option<&PipelineState>,
    global_use_normals: bool,
) -> Result<ResolvedInput> {
    let classified = classify_by_organism(step, state)?;
    let mut primary = group_units(classified, step.split_input_files);

    if step.use_normals && global_use_normals {
        for (organism, units) in primary.iter_mut() {
            let before = units.len();
            *units = pair_normals(std::mem::take(units));
            if units.len() != before {
                debug!(organism, units = units.len(), "paired normals into sample units");
            }
        }
    }

    ensure_not_empty(&primary)?;
    collapse_units(&mut primary, step.input_split_reads);

    let transformed = match &step.input_function {
        Some(_) => {
            let mut transformed = transform_units(&primary, step)?;
            ensure_not_empty(&transformed)?;
            collapse_units(&mut transformed, step.input_split_reads);
            Some(transformed)
        }
        None => None,
    };

    Ok(ResolvedInput {
        primary,
        transformed,
    })
}

/// Every input file, classified once, keyed by its organism group. The
/// organism key is `""` everywhere unless the step splits by organism.
fn classify_by_organism(
    step: &StepConfig,
    state: Option<&PipelineState>,
) -> Result<BTreeMap<String, Vec<FileData>>> {
    let mut grouped: BTreeMap<String, Vec<FileData>> = BTreeMap::new();

    if let Some(filenames) = &step.input_filenames {
        for filename in filenames {
            let file = FileData::classify(filename.clone());
            let organism = if step.split_by_organism {
                file.organism().unwrap_or(UNSPECIFIED_ORGANISM).to_string()
            } else {
                UNSPECIFIED_ORGANISM.to_string()
            };
            grouped.entry(organism).or_default().push(file);
        }
    } else {
        let state = state.ok_or(PipelineError::MissingInput)?;
        for (organism, units) in state.analyses() {
            let key = if step.split_by_organism {
                organism.clone()
            } else {
                UNSPECIFIED_ORGANISM.to_string()
            };
            let entry = grouped.entry(key).or_default();
            for unit in units {
                entry.extend(unit.files().iter().cloned());
            }
        }
    }

    Ok(grouped)
}

fn group_units(
    classified: BTreeMap<String, Vec<FileData>>,
    split_input_files: bool,
) -> UnitsByOrganism {
    classified
        .into_iter()
        .filter(|(_, files)| !files.is_empty())
        .map(|(organism, files)| {
            let units = if split_input_files {
                files.into_iter().map(AnalysisUnit::single).collect()
            } else {
                vec![AnalysisUnit::new(files)]
            };
            (organism, units)
        })
        .collect()
}

/// Move matched normals into their sample's unit.
///
/// The claims are computed over an immutable snapshot of the unit list and
/// applied in one rebuild pass: a unit participates as a sample if its
/// first file has role `Sample`; candidate controls share the barcode
/// identity ignoring tissue and have a normal tissue code. A single
/// candidate is always taken; with several, candidates whose sequencing
/// method equals the sample's are preferred, and every survivor is
/// attached. A control claimed by several samples goes to the first
/// claimant in unit order. Units emptied by the redistribution are
/// dropped.
fn pair_normals(units: Vec<AnalysisUnit>) -> Vec<AnalysisUnit> {
    // (unit index, file index) of a claimed control -> claiming unit index
    let mut claims: BTreeMap<(usize, usize), usize> = BTreeMap::new();

    for (sample_index, unit) in units.iter().enumerate() {
        let Some(first) = unit.files().first() else {
            continue;
        };
        if first.role != FileRole::Sample {
            continue;
        }
        let Some(sample_barcode) = first.barcode() else {
            continue;
        };

        let mut candidates: Vec<(usize, usize)> = Vec::new();
        for (unit_index, other) in units.iter().enumerate() {
            for (file_index, file) in other.files().iter().enumerate() {
                if claims.contains_key(&(unit_index, file_index)) {
                    continue;
                }
                let Some(barcode) = file.barcode() else {
                    continue;
                };
                if barcode.tissue.is_normal()
                    && sample_barcode.same_identity_ignoring_tissue(barcode)
                {
                    candidates.push((unit_index, file_index));
                }
            }
        }

        if candidates.len() > 1 {
            let sequencing_specific: Vec<(usize, usize)> = candidates
                .iter()
                .copied()
                .filter(|&(unit_index, file_index)| {
                    units[unit_index].files()[file_index]
                        .barcode()
                        .is_some_and(|b| b.sequencing == sample_barcode.sequencing)
                })
                .collect();
            if !sequencing_specific.is_empty() {
                candidates = sequencing_specific;
            }
        }

        for position in candidates {
            claims.insert(position, sample_index);
        }
    }

    let mut attachments: Vec<Vec<FileData>> = vec![Vec::new(); units.len()];
    for (&(unit_index, file_index), &sample_index) in &claims {
        attachments[sample_index].push(units[unit_index].files()[file_index].clone());
    }

    let mut rebuilt = Vec::with_capacity(units.len());
    for (unit_index, unit) in units.iter().enumerate() {
        let mut files: Vec<FileData> = unit
            .files()
            .iter()
            .enumerate()
            .filter(|(file_index, _)| !claims.contains_key(&(unit_index, *file_index)))
            .map(|(_, file)| file.clone())
            .collect();
        files.append(&mut attachments[unit_index]);
        if !files.is_empty() {
            rebuilt.push(AnalysisUnit::new(files));
        }
    }
    rebuilt
}

/// Apply the step's `input_function` to every unit, grouping a unit's
/// files by read index first when the step splits reads. Each produced
/// filename becomes a fresh single-file unit.
fn transform_units(primary: &UnitsByOrganism, step: &StepConfig) -> Result<UnitsByOrganism> {
    let transform = step
        .input_function
        .as_ref()
        .expect("caller checked for an input function");

    let mut transformed = UnitsByOrganism::new();
    for (organism, units) in primary {
        let entry = transformed.entry(organism.clone()).or_default();
        for unit in units {
            if step.input_split_reads {
                let mut groups: BTreeMap<u8, Vec<String>> = BTreeMap::new();
                for file in unit.files() {
                    groups
                        .entry(file.read_index().unwrap_or(0))
                        .or_default()
                        .push(file.filename.clone());
                }
                for filenames in groups.values() {
                    if let Some(new_name) = transform(filenames) {
                        if !new_name.is_empty() {
                            entry.push(AnalysisUnit::single(FileData::classify(new_name)));
                        }
                    }
                }
            } else {
                let new_name = transform(&unit.filenames())
                    .filter(|name| !name.is_empty())
                    .ok_or(PipelineError::EmptyInput)?;
                entry.push(AnalysisUnit::single(FileData::classify(new_name)));
            }
        }
    }
    Ok(transformed)
}

/// Collapse every organism's units into a single unit when the step does
/// not split by read index.
fn collapse_units(units: &mut UnitsByOrganism, input_split_reads: bool) {
    if input_split_reads {
        return;
    }
    for organism_units in units.values_mut() {
        let files: Vec<FileData> = organism_units
            .drain(..)
            .flat_map(AnalysisUnit::into_files)
            .collect();
        *organism_units = vec![AnalysisUnit::new(files)];
    }
}

fn ensure_not_empty(units: &UnitsByOrganism) -> Result<()> {
    if units.values().all(|organism_units| organism_units.is_empty()) {
        return Err(PipelineError::EmptyInput);
    }
    Ok(())
}
