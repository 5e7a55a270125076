//! Pipeline configuration.
//!
//! References and annotation databases are configured per genome assembly,
//! capture kits per kit code. The configuration is deserialized from a TOML
//! file or built in code:
//!
//! ```toml
//! human_annotation = "hg19"
//! use_normals = true
//!
//! [genomes.hg19]
//! reference = "/refs/hg19/ucsc.hg19.fasta"
//! index = "/refs/hg19/ucsc.hg19"
//! dbsnp = "/refs/hg19/dbsnp_138.vcf"
//! cosmic = "/refs/hg19/cosmic_v81.vcf"
//!
//! [kits.xk]
//! name = "Xgen Exome"
//! [kits.xk.indels]
//! hg19 = "/refs/hg19/mills_and_1000g.indels.vcf"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Reference and annotation files for one genome assembly.
#[derive(Debug, Clone, Deserialize)]
pub struct GenomeData {
    pub reference: PathBuf,
    pub index: PathBuf,
    #[serde(default)]
    pub dbsnp: Option<PathBuf>,
    #[serde(default)]
    pub cosmic: Option<PathBuf>,
}

/// Data associated with a capture kit code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KitData {
    #[serde(default)]
    pub name: Option<String>,
    /// Known-indels resources keyed by assembly, used for realignment
    /// steps on human assemblies.
    #[serde(default)]
    pub indels: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// The assembly assumed for files whose barcode carries no organism.
    #[serde(default = "default_human_annotation")]
    pub human_annotation: String,
    /// Global switch for tumor/normal pairing; a step additionally opts in
    /// per invocation.
    #[serde(default)]
    pub use_normals: bool,
    #[serde(default)]
    pub genomes: BTreeMap<String, GenomeData>,
    #[serde(default)]
    pub kits: BTreeMap<String, KitData>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            human_annotation: default_human_annotation(),
            use_normals: false,
            genomes: BTreeMap::new(),
            kits: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Load the configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn genome(&self, organism: &str) -> Option<&GenomeData> {
        self.genomes.get(organism)
    }

    pub fn kit(&self, code: &str) -> Option<&KitData> {
        self.kits.get(code)
    }
}

fn default_human_annotation() -> String {
    "hg19".to_string()
}

/// Whether an assembly tag names a human genome build.
pub fn is_human_assembly(organism: &str) -> bool {
    organism.starts_with("hg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: PipelineConfig = toml::from_str(
            r#"
            human_annotation = "hg38"
            use_normals = true

            [genomes.hg38]
            reference = "/refs/hg38.fa"
            index = "/refs/hg38"
            dbsnp = "/refs/dbsnp.vcf"

            [genomes.mm10]
            reference = "/refs/mm10.fa"
            index = "/refs/mm10"

            [kits.xk]
            name = "Xgen Exome"
            [kits.xk.indels]
            hg38 = "/refs/indels.hg38.vcf"
            "#,
        )
        .unwrap();

        assert_eq!(config.human_annotation, "hg38");
        assert!(config.use_normals);
        let hg38 = config.genome("hg38").unwrap();
        assert_eq!(hg38.dbsnp.as_deref(), Some(Path::new("/refs/dbsnp.vcf")));
        assert!(hg38.cosmic.is_none());
        assert!(config.genome("mm10").unwrap().dbsnp.is_none());
        assert_eq!(
            config.kit("xk").unwrap().indels["hg38"],
            PathBuf::from("/refs/indels.hg38.vcf")
        );
        assert!(config.kit("zz").is_none());
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.human_annotation, "hg19");
        assert!(!config.use_normals);
        assert!(config.genomes.is_empty());
    }

    #[test]
    fn human_assembly_prefix() {
        assert!(is_human_assembly("hg19"));
        assert!(is_human_assembly("hg38"));
        assert!(!is_human_assembly("mm10"));
        assert!(!is_human_assembly(""));
    }
}
