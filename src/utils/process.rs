// src/utils/process.rs: subordinate process supervision

use std::process::Stdio;

use log::{debug, info};
use tokio::process::Command;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::config::defs::PipelineError;
use crate::utils::streams::merge_child_output;

const LINE_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct SupervisedExit {
    pub code: Option<i32>,
    /// Combined stdout and stderr, one entry per line in arrival order.
    pub output: Vec<String>,
}

impl SupervisedExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn output_text(&self) -> String {
        self.output.join("\n")
    }
}

/// Runs `tool` with an argument vector, forwarding every merged output line to the log as it arrives.
///
/// A non-zero exit is returned, not raised; only a failure to spawn or read is an error.
pub async fn run_supervised(tool: &str, args: &[String]) -> Result<SupervisedExit, PipelineError> {
    debug!("executing: {} {}", tool, args.join(" "));
    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!("Failed to spawn: {}", e),
        })?;

    let (rx, forwarders) = merge_child_output(&mut child, LINE_BUFFER).map_err(|e| PipelineError::ToolExecution {
        tool: tool.to_string(),
        error: e.to_string(),
    })?;

    let mut lines = ReceiverStream::new(rx);
    let mut output = Vec::new();
    while let Some(line) = lines.next().await {
        info!("[{}] {}", tool, line);
        output.push(line);
    }
    for forwarder in forwarders {
        forwarder
            .await
            .map_err(|e| PipelineError::ToolExecution { tool: tool.to_string(), error: e.to_string() })??;
    }

    let status = child.wait().await?;
    info!("{} exited with status {:?}", tool, status.code());
    Ok(SupervisedExit { code: status.code(), output })
}
