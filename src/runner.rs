use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::info;

/// One invocation of the external extraction tool. The argument shape is a
/// hard contract with the tool:
///
/// ```text
/// <tool> <document> --start <page> --end <page> [--reference <path>] [--exclude-merge]
/// ```
///
/// `--start` and `--end` are always the same page. The tool writes its result
/// to the canonical dataset file on its own; there is no output-path argument.
pub struct ToolInvocation<'a> {
    pub tool: &'a Path,
    pub document: &'a Path,
    pub page: u32,
    pub reference: Option<&'a Path>,
    pub exclude_merge: bool,
    pub timeout: Duration,
}

/// What the tool did, stdout and stderr relayed verbatim for diagnostics.
/// The runner never interprets the streams.
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run the tool to completion, capturing both streams in full. The caller
/// decides what a non-zero exit means; expiry of the timeout kills the
/// subprocess and is reported via `timed_out`.
pub async fn run(invocation: &ToolInvocation<'_>) -> Result<ToolOutput> {
    let page = invocation.page.to_string();
    let mut cmd = Command::new(invocation.tool);
    cmd.arg(invocation.document)
        .arg("--start")
        .arg(&page)
        .arg("--end")
        .arg(&page);
    if let Some(reference) = invocation.reference {
        cmd.arg("--reference").arg(reference);
    }
    if invocation.exclude_merge {
        cmd.arg("--exclude-merge");
    }
    cmd.kill_on_drop(true);

    info!(
        "running extraction tool: {} {} --start {page} --end {page}{}{}",
        invocation.tool.display(),
        invocation.document.display(),
        invocation
            .reference
            .map(|r| format!(" --reference {}", r.display()))
            .unwrap_or_default(),
        if invocation.exclude_merge {
            " --exclude-merge"
        } else {
            ""
        },
    );

    match timeout(invocation.timeout, cmd.output()).await {
        Ok(output) => {
            let output = output.with_context(|| {
                format!("failed to spawn extraction tool {}", invocation.tool.display())
            })?;
            Ok(ToolOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            })
        }
        // Dropping the future kills the child via kill_on_drop.
        Err(_) => Ok(ToolOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }),
    }
}
