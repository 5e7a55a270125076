//! Per-unit step execution.
//!
//! For one analysis unit: build the variable context, resolve the output
//! filename(s) and the command list, execute each command in order, record
//! the produced outputs and finally unlink the consumed inputs when the
//! step and the pipeline state allow it.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::analysis::AnalysisUnit;
use crate::barcode::Barcode;
use crate::config::{is_human_assembly, KitData, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::state::OutputAccumulator;
use crate::step::{Command, OutputTemplate, StepConfig};
use crate::subprocess::{ExitStatus, ProcessCommand, ProcessRunner};
use crate::template::{self, ResolveMode, TemplateContext, TemplateValue};

pub(crate) struct StepRunner<'a> {
    pub config: &'a PipelineConfig,
    pub process: &'a Arc<dyn ProcessRunner>,
    pub work_dir: &'a Path,
    pub dry_run: bool,
}

impl StepRunner<'_> {
    /// Execute one analysis unit. `unit` holds the pre-transform input
    /// files; `transformed` the unit produced by the step's input
    /// function, when one is configured. Deletion always targets the
    /// files of `unit`.
    pub(crate) async fn run_unit(
        &self,
        step: &StepConfig,
        organism_key: &str,
        unit: &AnalysisUnit,
        transformed: Option<&AnalysisUnit>,
        can_delete_inputs: bool,
        outputs: &mut OutputAccumulator,
    ) -> Result<()> {
        let effective = transformed.unwrap_or(unit);

        let designated = effective.sample().or_else(|| effective.control());
        if designated.is_none() && !step.allow_raw_filenames {
            return Err(PipelineError::config(format!(
                "no classifiable sample or control among {:?}, and raw filenames are not allowed",
                effective.filenames()
            )));
        }

        let barcode = designated.and_then(|file| file.barcode());
        let organism = barcode.and_then(|b| b.organism.as_deref());
        let kit = barcode.and_then(|b| self.config.kit(&b.kit));

        let skipped = step.only_human && organism.is_some_and(|o| !is_human_assembly(o));
        if skipped {
            debug!(files = ?effective.filenames(), organism, "skipping non-human unit");
        } else {
            self.execute_unit(step, organism_key, effective, organism, kit, outputs)
                .await?;
        }

        if step.unlink_inputs && can_delete_inputs && !self.dry_run {
            self.unlink_unit(unit)?;
        }
        Ok(())
    }

    async fn execute_unit(
        &self,
        step: &StepConfig,
        organism_key: &str,
        unit: &AnalysisUnit,
        organism: Option<&str>,
        kit: Option<&KitData>,
        outputs: &mut OutputAccumulator,
    ) -> Result<()> {
        let mut context = self.build_context(unit, organism, kit);

        let output_filenames = self.resolve_output_filenames(step, unit, &context)?;
        if let Some(names) = &output_filenames {
            let value = if names.len() == 1 {
                TemplateValue::Str(names[0].clone())
            } else {
                TemplateValue::from(names.clone())
            };
            context.set("output_filename", value);
        }

        let commands = resolve_commands(step, &context)?;
        let last = commands.len().saturating_sub(1);
        for (index, command) in commands.iter().enumerate() {
            self.run_command(step, command, &context).await?;
            if let Some(names) = &output_filenames {
                if !step.save_only_last || index == last {
                    self.record_outputs(step, organism_key, names, outputs);
                }
            }
        }
        Ok(())
    }

    /// The closed variable scope templates resolve against. A lookup that
    /// cannot be satisfied for the organism simply leaves that variable
    /// out of scope.
    fn build_context(
        &self,
        unit: &AnalysisUnit,
        organism: Option<&str>,
        kit: Option<&KitData>,
    ) -> TemplateContext {
        let mut context = TemplateContext::new();

        let annotation = match organism {
            Some(organism) => {
                context.set("organism_str", format!(".{organism}"));
                organism.to_string()
            }
            None => {
                context.set("organism_str", "");
                self.config.human_annotation.clone()
            }
        };
        context.set("organism", annotation.clone());

        if let Some(kit) = kit {
            if is_human_assembly(&annotation) {
                if let Some(indels) = kit.indels.get(&annotation) {
                    context.set("indels", indels.display().to_string());
                }
            }
        }

        if let Some(genome) = self.config.genome(&annotation) {
            context.set("genome_ref", genome.reference.display().to_string());
            context.set("genome_index", genome.index.display().to_string());
            if let Some(dbsnp) = &genome.dbsnp {
                context.set("dbsnp", dbsnp.display().to_string());
            }
            if let Some(cosmic) = &genome.cosmic {
                context.set("cosmic", cosmic.display().to_string());
            }
        }

        context.set("input_filenames", unit.files().to_vec());
        if unit.len() == 1 {
            context.set("input_filename", unit.files()[0].clone());
        }

        let mut read_indices = unit.files().iter().map(|file| file.read_index());
        if let Some(Some(first)) = read_indices.next() {
            if read_indices.all(|index| index == Some(first)) {
                context.set("read_index", first.to_string());
            }
        }

        context
    }

    /// Compute the unit's output filename(s), if any: templates resolved
    /// and prefixed with the output path, then expanded through the output
    /// function; or the output function applied per input filename when no
    /// template is given. Templates resolve leniently when an output
    /// function is configured, so procedural markers survive for it.
    fn resolve_output_filenames(
        &self,
        step: &StepConfig,
        unit: &AnalysisUnit,
        context: &TemplateContext,
    ) -> Result<Option<Vec<String>>> {
        if !step.output_format.is_empty() {
            let mode = if step.output_function.is_some() {
                ResolveMode::Lenient
            } else {
                ResolveMode::Strict
            };

            let mut resolved = Vec::with_capacity(step.output_format.len());
            for format in &step.output_format {
                let raw = match format {
                    OutputTemplate::Literal(template) => template.clone(),
                    OutputTemplate::Generate(generate) => generate(context),
                };
                let raw = match &step.output_path {
                    Some(path) => path.join(&raw).to_string_lossy().into_owned(),
                    None => raw,
                };
                resolved.push(template::resolve(&raw, context, mode)?);
            }

            let resolved = match &step.output_function {
                Some(expand) => resolved.iter().flat_map(|name| expand(name)).collect(),
                None => resolved,
            };
            Ok(Some(resolved))
        } else if let Some(expand) = &step.output_function {
            Ok(Some(
                unit.files()
                    .iter()
                    .flat_map(|file| expand(&file.filename))
                    .collect(),
            ))
        } else {
            Ok(None)
        }
    }

    async fn run_command(
        &self,
        step: &StepConfig,
        command: &Command,
        context: &TemplateContext,
    ) -> Result<()> {
        match command {
            Command::Shell(line) => {
                if self.dry_run {
                    info!(command = %line, "dry run, command not launched");
                    return Ok(());
                }
                info!(command = %line, "launching step command");
                let output = self
                    .process
                    .run(ProcessCommand::new(line.clone()).current_dir(self.work_dir))
                    .await?;
                for log_line in output.stdout.lines() {
                    debug!(stream = "stdout", "{log_line}");
                }
                for log_line in output.stderr.lines() {
                    debug!(stream = "stderr", "{log_line}");
                }

                if !output.status.success() {
                    return Err(self.command_failure(step, line, output.status, context)?);
                }
                Ok(())
            }
            Command::Call(callback) => {
                if self.dry_run {
                    info!("dry run, callback not invoked");
                    return Ok(());
                }
                callback(context).map_err(|err| PipelineError::command_failed(err.to_string()))
            }
        }
    }

    /// Build the error for a failed command, resolving the caller's
    /// `error_string`/`exception_string` (or the defaults) against the
    /// context extended with `program` and `status`.
    fn command_failure(
        &self,
        step: &StepConfig,
        line: &str,
        status: ExitStatus,
        context: &TemplateContext,
    ) -> Result<PipelineError> {
        let program = program_word(line);
        let mut context = context.clone();
        context.set("program", program.clone());
        context.set("status", status.to_string());

        let error_text = match &step.error_string {
            Some(template) => template::resolve(template, &context, ResolveMode::Strict)?,
            None => format!("{program} exited with status {status}"),
        };
        let exception_text = match &step.exception_string {
            Some(template) => template::resolve(template, &context, ResolveMode::Strict)?,
            None => format!("{program} error"),
        };

        error!("{error_text}");
        Ok(PipelineError::command_failed(exception_text))
    }

    fn record_outputs(
        &self,
        step: &StepConfig,
        organism_key: &str,
        names: &[String],
        outputs: &mut OutputAccumulator,
    ) {
        for name in names {
            let absolute = if Path::new(name).is_absolute() {
                name.clone()
            } else {
                self.work_dir.join(name).to_string_lossy().into_owned()
            };

            let organism = if step.split_by_organism {
                Barcode::parse(&absolute)
                    .ok()
                    .and_then(|barcode| barcode.organism)
                    .unwrap_or_else(|| organism_key.to_string())
            } else {
                organism_key.to_string()
            };

            debug!(file = %absolute, organism = %organism, "recording step output");
            outputs.record(&organism, absolute);
        }
    }

    fn unlink_unit(&self, unit: &AnalysisUnit) -> Result<()> {
        for file in unit.files() {
            let path = Path::new(&file.filename);
            self.remove_file(path)?;

            let is_alignment = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("bam"));
            if is_alignment {
                let index_file = path.with_extension("bai");
                if index_file.exists() {
                    self.remove_file(&index_file)?;
                }
            }
        }
        Ok(())
    }

    /// Best-effort deletion: a file that is already gone is only worth a
    /// warning, anything else aborts the run.
    fn remove_file(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "deleted consumed input");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "input file already missing, skipping deletion");
                Ok(())
            }
            Err(err) => Err(PipelineError::io(path, err)),
        }
    }
}

fn resolve_commands(step: &StepConfig, context: &TemplateContext) -> Result<Vec<Command>> {
    step.command
        .iter()
        .map(|command| match command {
            Command::Shell(line) => Ok(Command::Shell(template::resolve(
                line,
                context,
                ResolveMode::Strict,
            )?)),
            Command::Call(callback) => Ok(Command::Call(Arc::clone(callback))),
        })
        .collect()
}

/// The program word of a shell line, used in default failure messages.
fn program_word(line: &str) -> String {
    let word = shell_words::split(line)
        .ok()
        .and_then(|words| words.into_iter().next())
        .unwrap_or_else(|| line.to_string());
    let base = Path::new(&word)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    base.unwrap_or(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FileData;
    use crate::subprocess::MockProcessRunner;

    fn runner_with_mock<'a>(
        config: &'a PipelineConfig,
        process: &'a Arc<dyn ProcessRunner>,
        work_dir: &'a Path,
    ) -> StepRunner<'a> {
        StepRunner {
            config,
            process,
            work_dir,
            dry_run: false,
        }
    }

    fn unit(filenames: &[&str]) -> AnalysisUnit {
        AnalysisUnit::new(filenames.iter().map(|name| FileData::classify(*name)).collect())
    }

    #[test]
    fn program_word_strips_path_and_arguments() {
        assert_eq!(program_word("bwa mem -t 8 ref.fa"), "bwa");
        assert_eq!(program_word("/opt/tools/samtools sort a.bam"), "samtools");
        assert_eq!(program_word(""), "");
    }

    #[tokio::test]
    async fn failure_resolves_custom_exception_string() {
        let mut mock = MockProcessRunner::new();
        mock.expect_program("aligner").returns_exit_code(2).finish();
        let process: Arc<dyn ProcessRunner> = Arc::new(mock);

        let config = PipelineConfig::default();
        let runner = runner_with_mock(&config, &process, Path::new("/work"));
        let step = StepConfig::new("aligner {input_filename}")
            .exception_string("{program} failed with {status} on {organism}");
        let mut outputs = OutputAccumulator::default();

        let err = runner
            .run_unit(
                &step,
                "",
                &unit(&["ct-p7-011-ak1.hg19.fastq"]),
                None,
                false,
                &mut outputs,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "aligner failed with 2 on hg19");
    }

    #[tokio::test]
    async fn outputs_recorded_only_for_last_command() {
        let mut mock = MockProcessRunner::new();
        mock.expect_program("first").finish();
        mock.expect_program("second").finish();
        let process: Arc<dyn ProcessRunner> = Arc::new(mock);

        let config = PipelineConfig::default();
        let runner = runner_with_mock(&config, &process, Path::new("/work"));
        let step = StepConfig::new("first")
            .command("second")
            .output_format("ct-p7-011-ak1.bam");
        let mut outputs = OutputAccumulator::default();

        runner
            .run_unit(
                &step,
                "",
                &unit(&["ct-p7-011-ak1.fastq"]),
                None,
                false,
                &mut outputs,
            )
            .await
            .unwrap();
        assert_eq!(outputs.primary()[""], vec!["/work/ct-p7-011-ak1.bam"]);
        assert_eq!(outputs.alignments()[""], vec!["/work/ct-p7-011-ak1.bam"]);
    }

    #[tokio::test]
    async fn unclassifiable_unit_without_raw_filenames_is_a_config_error() {
        let mock = MockProcessRunner::new();
        let process: Arc<dyn ProcessRunner> = Arc::new(mock);
        let config = PipelineConfig::default();
        let runner = runner_with_mock(&config, &process, Path::new("/work"));
        let mut outputs = OutputAccumulator::default();

        let err = runner
            .run_unit(
                &StepConfig::new("true"),
                "",
                &unit(&["notes.txt"]),
                None,
                false,
                &mut outputs,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
