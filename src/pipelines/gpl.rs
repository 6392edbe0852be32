// src/pipelines/gpl.rs: validate -> acquire -> configure -> run -> publish

use std::sync::Arc;

use log::{error, info, warn};

use crate::cli::Arguments;
use crate::config::defs::{
    PipelineError, RunConfig, AWS_TAG, CREDENTIAL_SAFETY_MARGIN, NEXTFLOW_TAG, SMLV_FORMAT_FIELD, SV_FORMAT_FIELD,
};
use crate::utils::command::{check_versions, nextflow as nextflow_args};
use crate::utils::credentials::CredentialProvider;
use crate::utils::gds::GdsClient;
use crate::utils::nextflow::{write_config, NextflowSettings};
use crate::utils::process::run_supervised;
use crate::utils::publish::{PublishOptions, Publisher};
use crate::utils::remote::{Backend, RemoteLocation};
use crate::utils::transfer::{
    acquire_reference, acquire_samples, AwsCli, LocationResolver, SampleInputs, TransferBackend,
};
use crate::utils::vcf::{check_format_field, read_remote_header, SampleReport};

/// Long-lived collaborators shared by the normal control flow and the signal path.
pub struct RunContext {
    pub backend: Arc<dyn TransferBackend>,
    /// Streaming header reads address remote objects directly, outside the transfer backend.
    pub resolver: Arc<LocationResolver>,
    pub publisher: Arc<Publisher>,
}

fn parse_location(flag: &str, value: &str) -> Result<RemoteLocation, PipelineError> {
    RemoteLocation::parse(value).map_err(|e| PipelineError::RemotePath(format!("--{}: {}", flag, e)))
}

/// Builds the transfer backend and the publisher. Only the output destination is parsed here so a
/// publisher exists for every later failure.
pub fn prepare(config: &RunConfig) -> Result<RunContext, PipelineError> {
    let args = &config.args;
    let destination = parse_location("output_dir", &args.output_dir)?;

    let provider = match &args.ica_access_token {
        Some(token) => {
            let client = GdsClient::new(&args.ica_base_url, token, CREDENTIAL_SAFETY_MARGIN)
                .map_err(|e| PipelineError::Credential(e.to_string()))?;
            Some(CredentialProvider::new(Arc::new(client), CREDENTIAL_SAFETY_MARGIN))
        }
        None => None,
    };
    if provider.is_none() && destination.backend() == Backend::ManagedVolume {
        return Err(PipelineError::Credential(format!(
            "--output_dir {} needs ICA_ACCESS_TOKEN",
            destination
        )));
    }

    let resolver = Arc::new(LocationResolver::new(provider));
    let backend: Arc<dyn TransferBackend> = Arc::new(AwsCli::new(resolver.clone()));
    let publisher = Arc::new(Publisher::new(backend.clone(), config.layout.clone(), destination));
    Ok(RunContext { backend, resolver, publisher })
}

/// Runs every stage, then publishes: clean-path options on success, error-path options otherwise.
pub async fn run(config: Arc<RunConfig>, context: &RunContext) -> Result<(), PipelineError> {
    let outcome = stages(&config, context).await;
    conclude(outcome, &context.publisher, &config.args).await
}

/// Exit policy: a stage failure stays fatal after the error-path publish; a clean-path publish
/// failure is fatal only under `--strict_upload`.
async fn conclude(outcome: Result<(), PipelineError>, publisher: &Publisher, args: &Arguments) -> Result<(), PipelineError> {
    match outcome {
        Ok(()) => {
            let options = PublishOptions::clean_path(args.upload_cache);
            match publisher.publish(options).await.into_result() {
                Ok(()) => Ok(()),
                Err(e) if args.strict_upload => Err(e),
                Err(e) => {
                    warn!("{}", e);
                    Ok(())
                }
            }
        }
        Err(e) => {
            error!("{}", e);
            if let Err(publish_err) = publisher.publish(PublishOptions::error_path()).await.into_result() {
                error!("{}", publish_err);
            }
            Err(e)
        }
    }
}

fn sample_inputs(config: &RunConfig) -> Result<(SampleInputs, RemoteLocation), PipelineError> {
    let args = &config.args;
    let inputs = SampleInputs {
        tumor_bam: parse_location("tumour_bam", &args.tumour_bam)?,
        normal_bam: parse_location("normal_bam", &args.normal_bam)?,
        smlv_vcf: args.tumour_smlv_vcf.as_deref().map(|v| parse_location("tumour_smlv_vcf", v)).transpose()?,
        sv_vcf: args.tumour_sv_vcf.as_deref().map(|v| parse_location("tumour_sv_vcf", v)).transpose()?,
    };
    let reference = parse_location("reference_data", &args.reference_data)?;
    Ok((inputs, reference))
}

async fn stages(config: &RunConfig, context: &RunContext) -> Result<(), PipelineError> {
    let args = &config.args;
    let layout = &config.layout;

    let (inputs, reference) = sample_inputs(config)?;
    let managed = inputs
        .planned()
        .iter()
        .map(|(_, loc)| loc)
        .chain(std::iter::once(&reference))
        .any(|loc| loc.backend() == Backend::ManagedVolume);
    if managed && args.ica_access_token.is_none() {
        return Err(PipelineError::Credential("gds:// inputs need ICA_ACCESS_TOKEN".to_string()));
    }

    check_versions(&[AWS_TAG, NEXTFLOW_TAG]).await?;

    if args.skip_vcf_check {
        warn!("Skipping VCF sample name and FORMAT field checks");
    } else {
        let expected = [("tumour", args.tumour_name.as_str()), ("normal", args.normal_name.as_str())];
        let checks = [(&inputs.smlv_vcf, SMLV_FORMAT_FIELD), (&inputs.sv_vcf, SV_FORMAT_FIELD)];
        for (vcf, format_field) in checks {
            let Some(vcf) = vcf else { continue };
            validate_vcf(&context.resolver, vcf, &expected, format_field).await?;
        }
    }

    let artifacts = acquire_samples(context.backend.as_ref(), &inputs, &layout.sample_dir()).await?;
    acquire_reference(context.backend.as_ref(), &reference, &layout.reference_dir()).await?;

    let settings = NextflowSettings::new(
        &args.sample_name,
        &args.tumour_name,
        &args.normal_name,
        &artifacts,
        layout,
        args.annotate_gridss_calls,
        args.gridss_jvmheap,
        config.cpus,
    );
    let config_path = layout.config_path();
    write_config(&settings, &config_path)?;

    let nf_args = nextflow_args::arg_generator(
        &layout.nextflow_log_path(),
        &config_path,
        &layout.work_dir(),
        &args.pipeline_path,
        &args.nextflow_args,
    );
    let exit = run_supervised(NEXTFLOW_TAG, &nf_args).await?;
    if !exit.success() {
        return Err(PipelineError::PipelineExit { code: exit.code });
    }
    info!("Pipeline completed");
    Ok(())
}

/// Streams one VCF header and checks its sample columns and required FORMAT declaration.
pub async fn validate_vcf(
    resolver: &LocationResolver,
    vcf: &RemoteLocation,
    expected: &[(&str, &str)],
    format_field: &str,
) -> Result<(), PipelineError> {
    info!("Checking VCF header of {}", vcf);
    let header = read_remote_header(resolver, vcf).await?;
    let vcf_name = vcf.to_string();
    SampleReport::new(&vcf_name, expected, header.sample_names()).into_result()?;
    check_format_field(&vcf_name, &header, format_field)
}
