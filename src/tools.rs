//! External tool resolution and invocation.
//!
//! Each tool resolves to an executable in this order: the configuration
//! file, the tool's environment variable, then the bare name looked up on
//! `PATH`.

use crate::config::ToolOverrides;
use crate::stage::StageError;
use std::{
    io::ErrorKind,
    path::Path,
    process::{Command, Output},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Annocli,
    AgatLongestIsoform,
    AgatExtractSequences,
    Busco,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::Annocli,
        Tool::AgatLongestIsoform,
        Tool::AgatExtractSequences,
        Tool::Busco,
    ];

    pub fn default_bin(&self) -> &'static str {
        match self {
            Self::Annocli => "annocli",
            Self::AgatLongestIsoform => "agat_sp_keep_longest_isoform.pl",
            Self::AgatExtractSequences => "agat_sp_extract_sequences.pl",
            Self::Busco => "busco",
        }
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Annocli => "BUSCO_BATCH_ANNOCLI_BIN",
            Self::AgatLongestIsoform => "BUSCO_BATCH_AGAT_ISOFORM_BIN",
            Self::AgatExtractSequences => "BUSCO_BATCH_AGAT_EXTRACT_BIN",
            Self::Busco => "BUSCO_BATCH_BUSCO_BIN",
        }
    }

    fn configured<'a>(&self, overrides: &'a ToolOverrides) -> Option<&'a str> {
        match self {
            Self::Annocli => overrides.annocli.as_deref(),
            Self::AgatLongestIsoform => overrides.agat_longest_isoform.as_deref(),
            Self::AgatExtractSequences => overrides.agat_extract_sequences.as_deref(),
            Self::Busco => overrides.busco.as_deref(),
        }
    }
}

fn normalized_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn configured_or_env(tool: Tool, overrides: &ToolOverrides) -> Option<String> {
    tool.configured(overrides)
        .and_then(normalized_non_empty)
        .or_else(|| {
            std::env::var(tool.env_var())
                .ok()
                .and_then(|v| normalized_non_empty(&v))
        })
}

pub fn resolve_tool_executable(tool: Tool, overrides: &ToolOverrides) -> String {
    configured_or_env(tool, overrides).unwrap_or_else(|| tool.default_bin().to_string())
}

pub fn active_resolution_label(tool: Tool, overrides: &ToolOverrides) -> String {
    configured_or_env(tool, overrides)
        .unwrap_or_else(|| format!("PATH lookup: {}", tool.default_bin()))
}

/// Executables resolved once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSet {
    annocli: String,
    agat_longest_isoform: String,
    agat_extract_sequences: String,
    busco: String,
}

impl ToolSet {
    pub fn resolve(overrides: &ToolOverrides) -> Self {
        for tool in Tool::ALL {
            tracing::debug!(
                "{} -> {}",
                tool.default_bin(),
                active_resolution_label(tool, overrides)
            );
        }
        Self {
            annocli: resolve_tool_executable(Tool::Annocli, overrides),
            agat_longest_isoform: resolve_tool_executable(Tool::AgatLongestIsoform, overrides),
            agat_extract_sequences: resolve_tool_executable(Tool::AgatExtractSequences, overrides),
            busco: resolve_tool_executable(Tool::Busco, overrides),
        }
    }

    pub fn executable(&self, tool: Tool) -> &str {
        match tool {
            Tool::Annocli => &self.annocli,
            Tool::AgatLongestIsoform => &self.agat_longest_isoform,
            Tool::AgatExtractSequences => &self.agat_extract_sequences,
            Tool::Busco => &self.busco,
        }
    }
}

/// Captured output of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `executable` to completion and fails `step` unless it exits 0.
///
/// The failure message carries the exit status and the captured stderr and
/// stdout, in that order, so the start of the message is the diagnostic.
pub fn run_tool(
    step: &str,
    executable: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<ToolOutput, StageError> {
    tracing::debug!("Running {step}: {executable} {}", args.join(" "));
    let mut cmd = Command::new(executable);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output: Output = cmd.output().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            StageError::external_tool(step, format!("Command not found: {executable}"))
        } else {
            StageError::external_tool(
                step,
                format!(
                    "Could not run '{}' with args [{}]: {e}",
                    executable,
                    args.join(" ")
                ),
            )
        }
    })?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        let status = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(StageError::external_tool(
            step,
            format!(
                "{executable} exited with status {status}\nStderr: {}\nStdout: {}",
                stderr.trim(),
                stdout.trim()
            ),
        ));
    }
    tracing::info!("{step} completed successfully");
    Ok(ToolOutput { stdout, stderr })
}
