/// Functions and structs for working with creating command-line arguments

use std::process::Stdio;

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use tokio::process::Command;

use crate::config::defs::{PipelineError, AWS_TAG, NEXTFLOW_TAG, TOOL_VERSIONS};


pub mod aws {
    use anyhow::anyhow;
    use tokio::process::Command;
    use crate::config::defs::{AwsSubcommand, AWS_TAG};
    use crate::utils::streams::{read_child_output_to_vec, ChildStream};

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct SyncOptions {
        pub exclude: Vec<String>,
        /// `Some(true)` follows symlinks, `Some(false)` preserves them, `None` keeps the CLI default.
        pub follow_symlinks: Option<bool>,
    }

    pub async fn aws_presence_check() -> anyhow::Result<String> {
        let args: Vec<&str> = vec!["--version"];

        let mut child = Command::new(AWS_TAG)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn: {}. Is the aws cli installed?", e))?;

        let mut lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
        // v1 prints its version to stderr.
        if lines.iter().all(|l| l.trim().is_empty()) {
            lines = read_child_output_to_vec(&mut child, ChildStream::Stderr).await?;
        }
        child.wait().await?;
        let first_line = lines
            .iter()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| anyhow!("No output from aws --version"))?;
        parse_aws_version(first_line)
    }

    /// `aws-cli/2.15.0 Python/3.11.6 Linux/6.1 exe/x86_64` -> `2.15.0`
    pub fn parse_aws_version(line: &str) -> anyhow::Result<String> {
        let version = line
            .split_whitespace()
            .next()
            .and_then(|tok| tok.strip_prefix("aws-cli/"))
            .ok_or_else(|| anyhow!("Invalid aws --version output: {}", line))?;
        if version.is_empty() {
            return Err(anyhow!("Empty version number in aws --version output: {}", line));
        }
        Ok(version.to_string())
    }

    pub fn arg_generator(subcommand: AwsSubcommand, source: &str, dest: &str, options: &SyncOptions) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("s3".to_string());
        match subcommand {
            AwsSubcommand::Cp => {
                args_vec.push("cp".to_string());
                args_vec.push("--no-progress".to_string());
            }
            AwsSubcommand::Sync => {
                args_vec.push("sync".to_string());
                args_vec.push("--no-progress".to_string());
                for pattern in &options.exclude {
                    args_vec.push(format!("--exclude={}", pattern));
                }
                match options.follow_symlinks {
                    Some(true) => args_vec.push("--follow-symlinks".to_string()),
                    Some(false) => args_vec.push("--no-follow-symlinks".to_string()),
                    None => {}
                }
            }
        }
        args_vec.push(source.to_string());
        args_vec.push(dest.to_string());
        args_vec
    }

    /// `aws s3 cp <uri> -` writes the object to stdout.
    pub fn cp_to_stdout_args(uri: &str) -> Vec<String> {
        vec!["s3".to_string(), "cp".to_string(), uri.to_string(), "-".to_string()]
    }
}

pub mod nextflow {
    use std::path::Path;
    use anyhow::anyhow;
    use tokio::process::Command;
    use crate::config::defs::NEXTFLOW_TAG;
    use crate::utils::streams::{read_child_output_to_vec, ChildStream};

    pub async fn nextflow_presence_check() -> anyhow::Result<String> {
        let args: Vec<&str> = vec!["-version"];

        let mut child = Command::new(NEXTFLOW_TAG)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn: {}. Is nextflow installed?", e))?;

        let lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
        child.wait().await?;
        //      version 22.10.6 build 5843
        let version = lines
            .iter()
            .find_map(|line| {
                let mut tokens = line.split_whitespace();
                match tokens.next() {
                    Some("version") => tokens.next().map(|v| v.to_string()),
                    _ => None,
                }
            })
            .ok_or_else(|| anyhow!("No version line in nextflow -version output"))?;
        Ok(version)
    }

    /// `nextflow -log <log> run -config <config> -work-dir <work> [extra...] <pipeline>`
    pub fn arg_generator(
        log_path: &Path,
        config_path: &Path,
        work_dir: &Path,
        pipeline_path: &str,
        extra_args: &[String],
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-log".to_string());
        args_vec.push(log_path.to_string_lossy().to_string());
        args_vec.push("run".to_string());
        args_vec.push("-config".to_string());
        args_vec.push(config_path.to_string_lossy().to_string());
        args_vec.push("-work-dir".to_string());
        args_vec.push(work_dir.to_string_lossy().to_string());
        args_vec.extend(extra_args.iter().cloned());
        args_vec.push(pipeline_path.to_string());
        args_vec
    }
}


pub async fn check_version(tool: &str) -> Result<String> {
    let version = match tool {
        AWS_TAG => aws::aws_presence_check().await,
        NEXTFLOW_TAG => nextflow::nextflow_presence_check().await,
        _ => return Err(anyhow!("Unknown tool: {}", tool)),
    };
    Ok(version?)
}

/// Runs the presence check for every required tool and warns on versions below the known-good ones.
pub async fn check_versions(tools: &[&str]) -> Result<(), PipelineError> {
    for tool in tools {
        let version = check_version(tool).await.map_err(|e| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: e.to_string(),
        })?;
        info!("Found {} version {}", tool, version);
        if let Some(min) = TOOL_VERSIONS.get(tool) {
            if major_minor(&version).map(|v| v < *min).unwrap_or(false) {
                warn!("{} version {} is older than tested version {}", tool, version, min);
            }
        }
    }
    Ok(())
}

fn major_minor(version: &str) -> Option<f32> {
    let mut parts = version.split('.');
    let major = parts.next()?;
    let minor = parts.next().unwrap_or("0");
    format!("{}.{}", major, minor).parse().ok()
}


#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command to completion with captured output. Non-zero exit is a `Transfer` error carrying
/// the full stdout and stderr, which are also logged.
pub async fn run_captured(tool: &str, args: &[String], env: &[(&'static str, String)]) -> Result<CommandOutput, PipelineError> {
    let command_str = format!("{} {}", tool, args.join(" "));
    debug!("executing: {}", command_str);

    let output = Command::new(tool)
        .args(args)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!("Failed to spawn: {}", e),
        })?;

    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    if !output.status.success() {
        error!("Failed to run command: {}", command_str);
        error!("stdout: {}", result.stdout);
        error!("stderr: {}", result.stderr);
        return Err(PipelineError::Transfer {
            command: command_str,
            code: result.code,
            stdout: result.stdout,
            stderr: result.stderr,
        });
    }
    Ok(result)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::config::defs::AwsSubcommand;

    #[test]
    fn test_aws_sync_args() {
        let options = aws::SyncOptions {
            exclude: vec!["*work/*".to_string()],
            follow_symlinks: Some(false),
        };
        let args = aws::arg_generator(AwsSubcommand::Sync, "output/nextflow", "s3://b/out/nextflow", &options);
        assert_eq!(
            args,
            vec!["s3", "sync", "--no-progress", "--exclude=*work/*", "--no-follow-symlinks", "output/nextflow", "s3://b/out/nextflow"]
        );
    }

    #[test]
    fn test_parse_aws_version_v1_and_v2() {
        let v1 = "aws-cli/1.18.69 Python/3.8.10 Linux/5.4.0-1045-aws botocore/1.17.0";
        assert_eq!(aws::parse_aws_version(v1).unwrap(), "1.18.69");
        let v2 = "aws-cli/2.15.0 Python/3.11.6 Linux/6.1.0 exe/x86_64.amzn.2";
        assert_eq!(aws::parse_aws_version(v2).unwrap(), "2.15.0");
        assert!(aws::parse_aws_version("aws-cli/ Python/3.8").is_err());
        assert!(aws::parse_aws_version("nextflow version 23.10").is_err());
    }

    #[test]
    fn test_aws_cp_ignores_sync_options() {
        let options = aws::SyncOptions { exclude: vec!["x".to_string()], follow_symlinks: Some(true) };
        let args = aws::arg_generator(AwsSubcommand::Cp, "s3://b/t.bam", "data/sample/t.bam", &options);
        assert_eq!(args, vec!["s3", "cp", "--no-progress", "s3://b/t.bam", "data/sample/t.bam"]);
    }

    #[test]
    fn test_nextflow_args_are_an_argument_vector() {
        let extra = vec!["-resume".to_string(), "--name with space".to_string()];
        let args = nextflow::arg_generator(
            &PathBuf::from("output/nextflow/nextflow_log.txt"),
            &PathBuf::from("output/nextflow/nextflow.config"),
            &PathBuf::from("output/nextflow/work"),
            "/opt/gpl/pipeline/main.nf",
            &extra,
        );
        assert_eq!(args[0], "-log");
        assert_eq!(args[2], "run");
        assert_eq!(args[7], "-resume");
        assert_eq!(args[8], "--name with space");
        assert_eq!(args.last().map(|s| s.as_str()), Some("/opt/gpl/pipeline/main.nf"));
    }

    #[test]
    fn test_major_minor() {
        assert_eq!(major_minor("2.15.0"), Some(2.15));
        assert_eq!(major_minor("22"), Some(22.0));
        assert_eq!(major_minor("x.y"), None);
    }

    #[tokio::test]
    async fn test_run_captured_reports_failure_output() {
        let err = run_captured("sh", &["-c".to_string(), "echo oops >&2; exit 3".to_string()], &[])
            .await
            .unwrap_err();
        match err {
            PipelineError::Transfer { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_captured_passes_env() {
        let out = run_captured(
            "sh",
            &["-c".to_string(), "printf %s \"$AWS_SESSION_TOKEN\"".to_string()],
            &[("AWS_SESSION_TOKEN", "tok".to_string())],
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, "tok");
    }
}
