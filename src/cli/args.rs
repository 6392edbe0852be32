use clap::Parser;
use crate::config::defs::{DEFAULT_ICA_BASE_URL, DEFAULT_PIPELINE_PATH};

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "gpl-runner", version, about = "Runs the GRIDSS/PURPLE/LINX pipeline against remote inputs and publishes its outputs")]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(long, help = "Sample name")]
    pub sample_name: String,

    #[arg(long, help = "Tumour name as it appears in VCFs")]
    pub tumour_name: String,

    #[arg(long, help = "Normal name as it appears in VCFs")]
    pub normal_name: String,

    #[arg(long, help = "Tumour BAM remote path (s3:// or gds://); <path>.bai must exist")]
    pub tumour_bam: String,

    #[arg(long, help = "Normal BAM remote path (s3:// or gds://); <path>.bai must exist")]
    pub normal_bam: String,

    #[arg(long, help = "Tumour small variant VCF remote path")]
    pub tumour_smlv_vcf: Option<String>,

    #[arg(long, help = "Tumour structural variant VCF remote path (generally Manta calls)")]
    pub tumour_sv_vcf: Option<String>,

    #[arg(long, help = "Reference data directory remote path")]
    pub reference_data: String,

    #[arg(long, help = "Output directory remote path")]
    pub output_dir: String,

    #[arg(long, help = "CPUs given to each pipeline process; defaults to detected physical cores")]
    pub cpu_count: Option<usize>,

    #[arg(long, default_value_t = 26, help = "Memory (GB) to allocate for applicable GRIDSS steps")]
    pub gridss_jvmheap: u32,

    #[arg(long, default_value_t = false, help = "Enable GRIDSS annotation of SVs using RepeatMasker")]
    pub annotate_gridss_calls: bool,

    #[arg(long = "nextflow_arg", allow_hyphen_values = true, help = "Additional argument passed to nextflow run; repeat once per token")]
    pub nextflow_args: Vec<String>,

    #[arg(long, default_value = DEFAULT_PIPELINE_PATH)]
    pub pipeline_path: String,

    #[arg(long, default_value = ".", help = "Local scratch root holding data/ and output/")]
    pub scratch_dir: String,

    #[arg(long, default_value_t = false, help = "Also upload the nextflow work cache after a clean run")]
    pub upload_cache: bool,

    #[arg(long, default_value_t = false, help = "Treat a failed upload of outputs as a fatal error")]
    pub strict_upload: bool,

    #[arg(long, default_value_t = false, help = "Skip the VCF sample name and FORMAT field checks")]
    pub skip_vcf_check: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, help = "Intercept SIGUSR1/SIGUSR2; disable when the orchestrator uses them")]
    pub intercept_sigusr: bool,

    #[arg(long, env = "ICA_BASE_URL", default_value = DEFAULT_ICA_BASE_URL)]
    pub ica_base_url: String,

    #[arg(long, env = "ICA_ACCESS_TOKEN", hide_env_values = true)]
    pub ica_access_token: Option<String>,
}
