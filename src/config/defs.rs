use std::path::{Path, PathBuf};
use std::time::Duration;
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;
use crate::cli::Arguments;

// External software
pub const AWS_TAG: &str = "aws";
pub const NEXTFLOW_TAG: &str = "nextflow";
pub const BAM_INDEX_EXT: &str = "bai";


lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, f32> = {
        let mut m = HashMap::new();
        m.insert(AWS_TAG, 2.0);
        m.insert(NEXTFLOW_TAG, 22.04);

        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AwsSubcommand {
    Cp,
    Sync,
}

// Local scratch layout
pub const DATA_DIR: &str = "data";
pub const REFERENCE_DIR: &str = "reference";
pub const SAMPLE_DIR: &str = "sample";
pub const OUTPUT_DIR: &str = "output";
pub const NEXTFLOW_DIR: &str = "nextflow";
pub const WORK_DIR: &str = "work";
pub const REPORTS_DIR: &str = "reports";

// Static Filenames
pub const NEXTFLOW_CONFIG: &str = "nextflow.config";
pub const NEXTFLOW_LOG: &str = "nextflow_log.txt";
pub const HARNESS_LOG: &str = "gpl_log.txt";

// Static Parameters
pub const DEFAULT_PIPELINE_PATH: &str = "/opt/gpl/pipeline/main.nf";
pub const GRIDSS_JAR: &str = "/opt/gridss/gridss-2.12.1-gridss-jar-with-dependencies.jar";
pub const DEFAULT_ICA_BASE_URL: &str = "https://aps2.platform.illumina.com";
pub const NOFILE: &str = "NOFILE";

pub const VCF_FIXED_COLUMNS: usize = 9;
pub const VCF_COLUMN_LINE: &str = "#CHROM";
pub const VCF_HEADER_MARKER: char = '#';
pub const SMLV_FORMAT_FIELD: &str = "AD";
pub const SV_FORMAT_FIELD: &str = "PR";
pub const HEADER_CHUNK_SIZE: usize = 64 * 1024;
pub const MAX_HEADER_BYTES: usize = 16 * 1024 * 1024;

/// Credentials are re-resolved once their remaining lifetime drops below this.
pub const CREDENTIAL_SAFETY_MARGIN: Duration = Duration::from_secs(10 * 60);

/// Reference data files, relative to the local reference tree.
pub const REFERENCE_FILES: &[(&str, &str)] = &[
    ("ref_data_genome", "genome/umccrise_hg38/hg38.fa"),
    ("ref_data_amber_loci", "Amber/38/GermlineHetPon.38.vcf.gz"),
    ("ref_data_cobalt_gc_profile", "Cobalt/38/GC_profile.1000bp.38.cnp"),
    ("ref_data_gridss_blacklist", "GRIDSS/38/ENCFF356LFX.bed"),
    ("ref_data_gridss_breakend_pon", "GRIDSS/38/gridss_pon_single_breakend.38.bed"),
    ("ref_data_gridss_breakpoint_pon", "GRIDSS/38/gridss_pon_breakpoint.38.bedpe"),
    ("ref_data_linx_fragile_sites", "Linx/38/fragile_sites_hmf.38.csv"),
    ("ref_data_linx_line_elements", "Linx/38/line_elements.38.csv"),
    ("ref_data_linx_rep_origins", "Linx/38/heli_rep_origins_empty.bed"),
    ("ref_data_linx_gene_transcript_dir", "Ensembl-Data-Cache/38"),
    ("ref_data_known_hotspots", "Sage/38/KnownHotspots.somatic.38.vcf.gz"),
    ("ref_data_known_fusions", "Known-Fusions/38/known_fusions.38.bedpe"),
    ("ref_data_known_fusion_data", "Known-Fusions/38/known_fusion_data.38.csv"),
    ("ref_data_driver_gene_panel", "Gene-Panel/38/DriverGenePanel.38.tsv"),
];


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Remote path error: {0}")]
    RemotePath(String),

    #[error("Credential resolution failed: {0}")]
    Credential(String),

    #[error("Could not read VCF header from '{path}': {error}")]
    VcfHeader { path: String, error: String },

    #[error("Sample name validation failed:\n{0}")]
    SampleValidation(String),

    #[error("Missing FORMAT field declaration:\n{0}")]
    FormatField(String),

    #[error("Command failed ({code:?}): {command}\nstdout: {stdout}\nstderr: {stderr}")]
    Transfer {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Tool execution failed: {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Pipeline exited with non-zero status: {code:?}")]
    PipelineExit { code: Option<i32> },

    #[error("Failed to publish {} item(s):\n\t{}", failed.len(), failed.join("\n\t"))]
    PublishFailed { failed: Vec<String> },

    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


/// Fixed three-level scratch tree: reference data, sample data, output.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalLayout {
    pub root: PathBuf,
}

impl LocalLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalLayout { root: root.into() }
    }

    pub fn reference_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR).join(REFERENCE_DIR)
    }

    pub fn sample_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR).join(SAMPLE_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    /// Engine-owned subtree holding config, logs, reports and the work cache.
    pub fn nextflow_dir(&self) -> PathBuf {
        self.output_dir().join(NEXTFLOW_DIR)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.nextflow_dir().join(WORK_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.nextflow_dir().join(REPORTS_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.nextflow_dir().join(NEXTFLOW_CONFIG)
    }

    pub fn nextflow_log_path(&self) -> PathBuf {
        self.nextflow_dir().join(NEXTFLOW_LOG)
    }

    pub fn harness_log_path(&self) -> PathBuf {
        self.output_dir().join(HARNESS_LOG)
    }

    pub fn reference_file(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.reference_dir().join(relative)
    }
}


pub struct RunConfig {
    pub layout: LocalLayout,
    pub cpus: usize,
    pub args: Arguments,
}
