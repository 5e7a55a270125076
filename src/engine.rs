//! The orchestrator owning the pipeline state across steps.
//!
//! An [`Engine`] runs one [`StepConfig`] at a time, strictly sequentially:
//! the input resolver produces per-organism analysis units, the step
//! runner executes every unit, and the produced outputs replace the
//! pipeline state when the step commits. Steps that do not commit leave
//! the state untouched, so fan-out side steps (quality reports and the
//! like) cannot perturb the main pipeline thread.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::resolver;
use crate::runner::StepRunner;
use crate::state::{OutputAccumulator, PipelineState};
use crate::step::StepConfig;
use crate::subprocess::{ProcessRunner, TokioProcessRunner};

pub struct Engine {
    config: PipelineConfig,
    work_dir: PathBuf,
    process: Arc<dyn ProcessRunner>,
    dry_run: bool,
    state: Option<PipelineState>,
    alignments: BTreeMap<String, Vec<String>>,
}

pub struct EngineBuilder {
    config: PipelineConfig,
    work_dir: PathBuf,
    process: Option<Arc<dyn ProcessRunner>>,
    dry_run: bool,
}

impl EngineBuilder {
    pub fn new(config: PipelineConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            process: None,
            dry_run: false,
        }
    }

    /// Substitute the process runner, e.g. a mock in tests.
    pub fn process_runner(mut self, process: Arc<dyn ProcessRunner>) -> Self {
        self.process = Some(process);
        self
    }

    /// In dry-run mode no process is launched and no callback is invoked;
    /// steps are logged and bookkeeping proceeds as if they succeeded.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            config: self.config,
            work_dir: self.work_dir,
            process: self
                .process
                .unwrap_or_else(|| Arc::new(TokioProcessRunner)),
            dry_run: self.dry_run,
            state: None,
            alignments: BTreeMap::new(),
        }
    }
}

impl Engine {
    pub fn new(config: PipelineConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self::builder(config, work_dir).build()
    }

    pub fn builder(config: PipelineConfig, work_dir: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder::new(config, work_dir)
    }

    /// Seed the pipeline state with externally provided files. Seeded
    /// state is never deletable; only a committing step grants later
    /// steps permission to unlink their inputs.
    pub fn seed_state<I, S>(&mut self, filenames: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state = Some(PipelineState::from_filenames(filenames, false));
    }

    pub fn state(&self) -> Option<&PipelineState> {
        self.state.as_ref()
    }

    /// The alignment artifacts committed by the most recent step that
    /// produced any and opted to track them.
    pub fn alignments(&self) -> &BTreeMap<String, Vec<String>> {
        &self.alignments
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one step to completion: every organism, every unit, every
    /// command, in order. Any failure aborts the run and leaves the
    /// pipeline state as it was before the step.
    pub async fn run(&mut self, step: StepConfig) -> Result<()> {
        info!(commands = step.command.len(), "running pipeline step");

        let resolved = resolver::resolve_inputs(&step, self.state.as_ref(), self.config.use_normals)?;
        let can_delete_inputs = self
            .state
            .as_ref()
            .is_some_and(PipelineState::can_delete_inputs);

        let runner = StepRunner {
            config: &self.config,
            process: &self.process,
            work_dir: &self.work_dir,
            dry_run: self.dry_run,
        };
        let mut outputs = OutputAccumulator::default();

        for (organism, units) in &resolved.primary {
            let transformed = resolved
                .transformed
                .as_ref()
                .and_then(|map| map.get(organism.as_str()));
            match transformed {
                Some(transformed_units) if transformed_units.len() == units.len() => {
                    for (unit, transformed_unit) in units.iter().zip(transformed_units) {
                        runner
                            .run_unit(
                                &step,
                                organism,
                                unit,
                                Some(transformed_unit),
                                can_delete_inputs,
                                &mut outputs,
                            )
                            .await?;
                    }
                }
                Some(transformed_units) => {
                    // Counts diverge when the transform regroups files;
                    // the transformed units then stand alone and deletion
                    // targets the transformed files.
                    debug!(
                        organism,
                        input = units.len(),
                        transformed = transformed_units.len(),
                        "transformed unit count differs from input"
                    );
                    for transformed_unit in transformed_units {
                        runner
                            .run_unit(
                                &step,
                                organism,
                                transformed_unit,
                                Some(transformed_unit),
                                can_delete_inputs,
                                &mut outputs,
                            )
                            .await?;
                    }
                }
                None => {
                    for unit in units {
                        runner
                            .run_unit(&step, organism, unit, None, can_delete_inputs, &mut outputs)
                            .await?;
                    }
                }
            }
        }

        if step.write_bam_files && !outputs.alignments().is_empty() {
            self.alignments = outputs.alignments().clone();
        }
        if step.override_last_files {
            let produced: usize = outputs.primary().values().map(Vec::len).sum();
            info!(files = produced, "committing step outputs as pipeline state");
            self.state = Some(outputs.into_state());
        }
        Ok(())
    }
}
