//! The caller-facing description of one pipeline step.
//!
//! A [`StepConfig`] is built with chained setters and handed to
//! [`Engine::run`](crate::engine::Engine::run):
//!
//! ```no_run
//! # use strandpipe::{Engine, PipelineConfig, StepConfig};
//! # async fn example(engine: &mut Engine) -> strandpipe::Result<()> {
//! engine
//!     .run(
//!         StepConfig::new("bwa mem {genome_index} {input_filenames} > {output_filename}")
//!             .output_format("{input_filename.barcode}.sam")
//!             .split_by_organism(true)
//!             .unlink_inputs(true),
//!     )
//!     .await
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::template::TemplateContext;

/// An in-process command: invoked with the fully built variable context,
/// reporting failure through its result.
pub type StepCallback = Arc<dyn Fn(&TemplateContext) -> anyhow::Result<()> + Send + Sync>;

/// Transforms one group of input filenames into a single new filename.
/// Returning `None` (or an empty name) is an error: a step must never run
/// against a silently empty input.
pub type InputTransformFn = Arc<dyn Fn(&[String]) -> Option<String> + Send + Sync>;

/// Procedurally expands one resolved output name into the actual name(s).
pub type OutputExpandFn = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Produces an output filename format from the variable context.
pub type OutputFormatFn = Arc<dyn Fn(&TemplateContext) -> String + Send + Sync>;

/// One command of a step: a shell line with placeholders, or an in-process
/// callback.
#[derive(Clone)]
pub enum Command {
    Shell(String),
    Call(StepCallback),
}

impl Command {
    pub fn call(callback: impl Fn(&TemplateContext) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        Self::Call(Arc::new(callback))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => f.debug_tuple("Shell").field(line).finish(),
            Self::Call(_) => f.write_str("Call(..)"),
        }
    }
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        Self::Shell(line.to_string())
    }
}

impl From<String> for Command {
    fn from(line: String) -> Self {
        Self::Shell(line)
    }
}

/// One output filename format: a template string, or a function producing
/// the template from the variable context.
#[derive(Clone)]
pub enum OutputTemplate {
    Literal(String),
    Generate(OutputFormatFn),
}

impl OutputTemplate {
    pub fn generate(f: impl Fn(&TemplateContext) -> String + Send + Sync + 'static) -> Self {
        Self::Generate(Arc::new(f))
    }
}

impl fmt::Debug for OutputTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(t) => f.debug_tuple("Literal").field(t).finish(),
            Self::Generate(_) => f.write_str("Generate(..)"),
        }
    }
}

impl From<&str> for OutputTemplate {
    fn from(template: &str) -> Self {
        Self::Literal(template.to_string())
    }
}

impl From<String> for OutputTemplate {
    fn from(template: String) -> Self {
        Self::Literal(template)
    }
}

/// The configuration of one pipeline step. Immutable for the duration of a
/// step execution.
#[derive(Clone)]
pub struct StepConfig {
    pub command: Vec<Command>,
    pub output_format: Vec<OutputTemplate>,
    pub input_filenames: Option<Vec<String>>,
    pub input_function: Option<InputTransformFn>,
    pub input_split_reads: bool,
    pub output_path: Option<PathBuf>,
    pub output_function: Option<OutputExpandFn>,
    pub error_string: Option<String>,
    pub exception_string: Option<String>,
    pub override_last_files: bool,
    pub write_bam_files: bool,
    pub unlink_inputs: bool,
    pub save_only_last: bool,
    pub use_normals: bool,
    pub split_by_organism: bool,
    pub only_human: bool,
    pub split_input_files: bool,
    pub allow_raw_filenames: bool,
}

impl StepConfig {
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            command: vec![command.into()],
            output_format: Vec::new(),
            input_filenames: None,
            input_function: None,
            input_split_reads: true,
            output_path: None,
            output_function: None,
            error_string: None,
            exception_string: None,
            override_last_files: true,
            write_bam_files: true,
            unlink_inputs: false,
            save_only_last: true,
            use_normals: false,
            split_by_organism: false,
            only_human: false,
            split_input_files: true,
            allow_raw_filenames: false,
        }
    }

    /// Append a further command, executed after the previous ones within
    /// each analysis unit.
    pub fn command(mut self, command: impl Into<Command>) -> Self {
        self.command.push(command.into());
        self
    }

    /// Append an output filename format. Multiple formats produce multiple
    /// output files per unit.
    pub fn output_format(mut self, template: impl Into<OutputTemplate>) -> Self {
        self.output_format.push(template.into());
        self
    }

    /// Override the previous step's output as the input source.
    pub fn input_filenames<I, S>(mut self, filenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_filenames = Some(filenames.into_iter().map(Into::into).collect());
        self
    }

    /// Transform grouped input filenames into a single new filename before
    /// execution.
    pub fn input_function(
        mut self,
        f: impl Fn(&[String]) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.input_function = Some(Arc::new(f));
        self
    }

    /// Whether the transform input is split by read index first.
    pub fn input_split_reads(mut self, split: bool) -> Self {
        self.input_split_reads = split;
        self
    }

    /// Directory prefix applied to `output_format` results.
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Procedurally expand each resolved output name into the actual
    /// name(s).
    pub fn output_function(mut self, f: impl Fn(&str) -> Vec<String> + Send + Sync + 'static) -> Self {
        self.output_function = Some(Arc::new(f));
        self
    }

    /// Custom logged message on command failure; may contain placeholders,
    /// including `{program}` and `{status}`.
    pub fn error_string(mut self, template: impl Into<String>) -> Self {
        self.error_string = Some(template.into());
        self
    }

    /// Custom text carried by the failure error; same placeholders as
    /// [`error_string`](Self::error_string).
    pub fn exception_string(mut self, template: impl Into<String>) -> Self {
        self.exception_string = Some(template.into());
        self
    }

    /// Commit this step's outputs as the next pipeline state (default
    /// true). Disable for fan-out side steps that must not perturb the
    /// main thread, e.g. quality reports.
    pub fn override_last_files(mut self, commit: bool) -> Self {
        self.override_last_files = commit;
        self
    }

    /// Track produced alignment artifacts (default true).
    pub fn write_bam_files(mut self, track: bool) -> Self {
        self.write_bam_files = track;
        self
    }

    /// Delete consumed input files after the unit ran, subject to the
    /// state-level permission (default false).
    pub fn unlink_inputs(mut self, unlink: bool) -> Self {
        self.unlink_inputs = unlink;
        self
    }

    /// Record only the final command's outputs in a multi-command chain
    /// (default true).
    pub fn save_only_last(mut self, only_last: bool) -> Self {
        self.save_only_last = only_last;
        self
    }

    /// Pair tumor samples with their matched normals before execution
    /// (default false; also requires the global configuration toggle).
    pub fn use_normals(mut self, pair: bool) -> Self {
        self.use_normals = pair;
        self
    }

    /// Group inputs and outputs by organism (default false).
    pub fn split_by_organism(mut self, split: bool) -> Self {
        self.split_by_organism = split;
        self
    }

    /// Skip units whose organism is not a human assembly (default false).
    pub fn only_human(mut self, only: bool) -> Self {
        self.only_human = only;
        self
    }

    /// One unit per file rather than one unit per organism (default true).
    pub fn split_input_files(mut self, split: bool) -> Self {
        self.split_input_files = split;
        self
    }

    /// Permit units with no classifiable sample or control file (default
    /// false).
    pub fn allow_raw_filenames(mut self, allow: bool) -> Self {
        self.allow_raw_filenames = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_contract() {
        let step = StepConfig::new("true");
        assert!(step.input_split_reads);
        assert!(step.override_last_files);
        assert!(step.write_bam_files);
        assert!(!step.unlink_inputs);
        assert!(step.save_only_last);
        assert!(!step.use_normals);
        assert!(!step.split_by_organism);
        assert!(!step.only_human);
        assert!(step.split_input_files);
        assert!(!step.allow_raw_filenames);
    }

    #[test]
    fn commands_and_formats_accumulate_in_order() {
        let step = StepConfig::new("first {organism}")
            .command("second")
            .output_format("a.sam")
            .output_format("b.sam");
        assert_eq!(step.command.len(), 2);
        assert!(matches!(&step.command[1], Command::Shell(line) if line == "second"));
        assert_eq!(step.output_format.len(), 2);
    }
}
