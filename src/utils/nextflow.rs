// src/utils/nextflow.rs: engine configuration document

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::defs::{LocalLayout, GRIDSS_JAR, NOFILE, REFERENCE_FILES};
use crate::utils::file::write_text_file;
use crate::utils::transfer::SampleArtifacts;

/// Everything the engine configuration needs. Optional VCFs render as `NOFILE`.
#[derive(Debug, Clone, PartialEq)]
pub struct NextflowSettings {
    pub sample_name: String,
    pub tumour_name: String,
    pub normal_name: String,
    pub tumour_bam: PathBuf,
    pub normal_bam: PathBuf,
    pub tumour_bam_index: PathBuf,
    pub normal_bam_index: PathBuf,
    pub tumour_smlv_vcf: Option<PathBuf>,
    pub tumour_sv_vcf: Option<PathBuf>,
    pub layout: LocalLayout,
    pub annotate_gridss_calls: bool,
    pub gridss_jvmheap: u32,
    pub cpus: usize,
}

impl NextflowSettings {
    pub fn new(
        sample_name: &str,
        tumour_name: &str,
        normal_name: &str,
        artifacts: &SampleArtifacts,
        layout: &LocalLayout,
        annotate_gridss_calls: bool,
        gridss_jvmheap: u32,
        cpus: usize,
    ) -> Self {
        NextflowSettings {
            sample_name: sample_name.to_string(),
            tumour_name: tumour_name.to_string(),
            normal_name: normal_name.to_string(),
            tumour_bam: artifacts.tumor_bam.local_path.clone(),
            normal_bam: artifacts.normal_bam.local_path.clone(),
            tumour_bam_index: artifacts.tumor_bam_index.local_path.clone(),
            normal_bam_index: artifacts.normal_bam_index.local_path.clone(),
            tumour_smlv_vcf: artifacts.smlv_vcf.as_ref().map(|a| a.local_path.clone()),
            tumour_sv_vcf: artifacts.sv_vcf.as_ref().map(|a| a.local_path.clone()),
            layout: layout.clone(),
            annotate_gridss_calls,
            gridss_jvmheap,
            cpus,
        }
    }
}

/// Groovy single-quoted string literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn quoted(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

fn optional_file(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => quoted(p),
        None => quote(NOFILE),
    }
}

fn params_lines(settings: &NextflowSettings) -> Vec<String> {
    let mut lines = vec![
        "// Input".to_string(),
        format!("sample_name = {}", quote(&settings.sample_name)),
        format!("tumour_name = {}", quote(&settings.tumour_name)),
        format!("normal_name = {}", quote(&settings.normal_name)),
        format!("tumour_bam = {}", quoted(&settings.tumour_bam)),
        format!("normal_bam = {}", quoted(&settings.normal_bam)),
        format!("tumour_bam_index = {}", quoted(&settings.tumour_bam_index)),
        format!("normal_bam_index = {}", quoted(&settings.normal_bam_index)),
        format!("tumour_smlv_vcf = {}", optional_file(&settings.tumour_smlv_vcf)),
        format!("tumour_sv_vcf = {}", optional_file(&settings.tumour_sv_vcf)),
        "// Output".to_string(),
        format!("output_dir = {}", quoted(&settings.layout.output_dir())),
        "publish_mode = 'symlink'".to_string(),
        "// Options".to_string(),
        format!("annotate_gridss_calls = {}", settings.annotate_gridss_calls),
        "// Reference data".to_string(),
    ];
    for (name, relative) in REFERENCE_FILES {
        lines.push(format!("{} = {}", name, quoted(&settings.layout.reference_file(relative))));
    }
    lines.push("// GRIDSS JAR".to_string());
    lines.push(format!("gridss_jar = {}", quote(GRIDSS_JAR)));
    lines.push(format!("gridss_jvmheap = '{}g'", settings.gridss_jvmheap));
    lines
}

/// Renders the full `nextflow.config` text. Pure; identical settings give identical output.
pub fn render(settings: &NextflowSettings) -> String {
    let mut doc = String::new();
    doc.push_str("params {\n");
    for line in params_lines(settings) {
        let _ = writeln!(doc, "  {}", line);
    }
    doc.push_str("}\n\n");

    let _ = writeln!(doc, "process.cpus = {}", settings.cpus);
    doc.push_str("process.cache = 'lenient'\n\n");
    doc.push_str("// Fail task if any command returns non-zero exit code\n");
    doc.push_str("shell = ['/bin/bash', '-euo', 'pipefail']\n");

    let reports = settings.layout.reports_dir();
    for (scope, file) in [
        ("dag", "dag.svg"),
        ("report", "report.html"),
        ("timeline", "timeline.html"),
        ("trace", "trace.txt"),
    ] {
        let _ = write!(
            doc,
            "\n{} {{\n  enabled = true\n  file = {}\n}}\n",
            scope,
            quoted(&reports.join(file))
        );
    }
    doc
}

/// Renders and writes the configuration, creating parent directories first.
pub fn write_config(settings: &NextflowSettings, config_path: &Path) -> io::Result<()> {
    let doc = render(settings);
    debug!("nextflow config:\n{}", doc);
    write_text_file(config_path, &doc)?;
    info!("Wrote nextflow config to {}", config_path.display());
    Ok(())
}
