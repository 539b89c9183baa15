//! Security extension: secret detection, SAST and dependency audits

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use walkdir::WalkDir;

use crate::core::{
    CommandResult, CommandSpec, Event, EventBus, ExecutionContext, Extension, ExtensionMetadata,
};
use crate::error::{Result, RuntimeError};
use crate::runtime::EVENT_BUS_KEY;

pub const EXTENSION_NAME: &str = "security";
/// Published when a secret scan finds anything.
pub const SECRETS_DETECTED: &str = "security.secrets_detected";

/// Matched case-insensitively against whole file contents, first hit wins.
const SECRET_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "api_key",
    "token",
    "aws_access_key",
    "github_token",
];

const SKIPPED_EXTENSIONS: &[&str] = &["exe", "bin"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretFinding {
    pub path: PathBuf,
    pub pattern: String,
}

impl fmt::Display for SecretFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: contains '{}'", self.path.display(), self.pattern)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Clean,
    Vulnerable,
    ToolMissing,
}

/// Walks `root` and reports at most one finding per readable file.
///
/// Directories, `.exe`/`.bin` files and unreadable entries are skipped.
/// The context is polled between files.
pub fn scan_secrets(ctx: &ExecutionContext, root: &Path) -> Result<Vec<SecretFinding>> {
    let mut findings = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        ctx.check()?;

        if entry.file_type().is_dir() || is_skipped(entry.path()) {
            continue;
        }

        let Ok(content) = std::fs::read(entry.path()) else {
            continue;
        };
        let text = String::from_utf8_lossy(&content).to_lowercase();

        if let Some(pattern) = SECRET_PATTERNS.iter().find(|p| text.contains(*p)) {
            findings.push(SecretFinding {
                path: entry.path().to_path_buf(),
                pattern: pattern.to_string(),
            });
        }
    }

    Ok(findings)
}

fn is_skipped(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SKIPPED_EXTENSIONS.contains(&ext))
}

enum ToolOutput {
    Missing,
    Finished { success: bool, text: String },
}

/// Runs an external tool, abandoning (and killing) it if the context fires.
async fn run_tool(
    ctx: &ExecutionContext,
    program: &str,
    args: &[&str],
    dir: &Path,
) -> Result<ToolOutput> {
    let child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output();

    let output = tokio::select! {
        output = child => output,
        cause = ctx.done() => return Err(RuntimeError::Context(cause)),
    };

    match output {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(ToolOutput::Finished {
                success: output.status.success(),
                text,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(program, "tool not installed");
            Ok(ToolOutput::Missing)
        }
        Err(e) => Err(RuntimeError::Io(format!("{}: {}", program, e))),
    }
}

/// Counts gosec issues from its JSON report. Falls back to a substring
/// ext when the output is not the expected shape.
fn count_gosec_issues(output: &str) -> usize {
    match serde_json::from_str::<Value>(output) {
        Ok(report) => report
            .get("Issues")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        Err(_) => usize::from(output.to_lowercase().contains("issue")),
    }
}

fn go_audit_status(output: ToolOutput) -> AuditStatus {
    match output {
        ToolOutput::Missing => AuditStatus::ToolMissing,
        ToolOutput::Finished { success, text } => {
            if success || text.contains("No vulnerabilities found") {
                AuditStatus::Clean
            } else {
                AuditStatus::Vulnerable
            }
        }
    }
}

fn npm_audit_status(output: ToolOutput) -> AuditStatus {
    match output {
        ToolOutput::Missing => AuditStatus::ToolMissing,
        ToolOutput::Finished { success, text } => {
            if success && text.contains("0 vulnerabilities") {
                AuditStatus::Clean
            } else {
                AuditStatus::Vulnerable
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SecurityExtension {
    enabled: AtomicBool,
}

impl SecurityExtension {
    pub fn new() -> Self {
        Self::default()
    }

    async fn detect_secrets(&self, ctx: &ExecutionContext, root: PathBuf) -> Result<Vec<SecretFinding>> {
        let scan_ctx = ctx.clone();
        let findings = tokio::task::spawn_blocking(move || scan_secrets(&scan_ctx, &root))
            .await
            .map_err(|e| RuntimeError::Internal(anyhow::anyhow!("secret scan panicked: {}", e)))??;

        if !findings.is_empty() {
            self.report_secrets(ctx, &findings).await?;
        }
        Ok(findings)
    }

    async fn report_secrets(&self, ctx: &ExecutionContext, findings: &[SecretFinding]) -> Result<()> {
        let Some(bus) = ctx.get::<EventBus>(EVENT_BUS_KEY) else {
            return Ok(());
        };

        let event = Event::new(SECRETS_DETECTED, EXTENSION_NAME).with_data(json!({
            "count": findings.len(),
            "findings": findings,
        }));
        bus.publish(ctx, event).await
    }

    async fn secrets(&self, ctx: &ExecutionContext, args: &[String]) -> Result<CommandResult> {
        let Some(root) = target_path(args) else {
            return Ok(missing_path(args));
        };

        let findings = self.detect_secrets(ctx, root).await?;
        tracing::info!(secrets = findings.len(), "secret detection finished");

        let listed: Vec<String> = findings.iter().map(ToString::to_string).collect();
        Ok(CommandResult::success(json!({
            "secrets": findings.len(),
            "findings": listed,
        }))
        .with_render_hint("list"))
    }

    async fn scan(&self, ctx: &ExecutionContext, args: &[String]) -> Result<CommandResult> {
        let Some(root) = target_path(args) else {
            return Ok(missing_path(args));
        };

        let path_arg = root.to_string_lossy().into_owned();
        let issues = match run_tool(ctx, "gosec", &["-fmt=json", path_arg.as_str()], Path::new(".")).await? {
            ToolOutput::Missing => 0,
            ToolOutput::Finished { text, .. } => count_gosec_issues(&text),
        };
        let secrets = self.detect_secrets(ctx, root).await?;

        tracing::info!(issues, secrets = secrets.len(), "security scan finished");
        Ok(CommandResult::success(json!({
            "issues": issues,
            "secrets": secrets.len(),
        }))
        .with_render_hint("summary"))
    }

    async fn vulns(&self, ctx: &ExecutionContext, args: &[String]) -> Result<CommandResult> {
        let Some(root) = target_path(args) else {
            return Ok(missing_path(args));
        };

        let mut checks = Vec::new();

        if root.join("go.mod").is_file() {
            let output = run_tool(ctx, "govulncheck", &["./..."], &root).await?;
            checks.push(json!({
                "ecosystem": "go",
                "tool": "govulncheck",
                "status": go_audit_status(output),
            }));
        }

        if root.join("package.json").is_file() {
            let output = run_tool(ctx, "npm", &["audit"], &root).await?;
            checks.push(json!({
                "ecosystem": "npm",
                "tool": "npm audit",
                "status": npm_audit_status(output),
            }));
        }

        Ok(CommandResult::success(json!({ "checks": checks })).with_render_hint("list"))
    }
}

/// First argument or the working directory. `None` when it does not exist.
fn target_path(args: &[String]) -> Option<PathBuf> {
    let path = args.first().map_or_else(|| PathBuf::from("."), PathBuf::from);
    path.exists().then_some(path)
}

fn missing_path(args: &[String]) -> CommandResult {
    let path = args.first().map_or(".", String::as_str);
    CommandResult::failure(RuntimeError::Extension(format!("path not found: {}", path)))
}

#[async_trait]
impl Extension for SecurityExtension {
    fn metadata(&self) -> ExtensionMetadata {
        ExtensionMetadata::new(EXTENSION_NAME, "1.0.0")
            .with_description("SAST scanning, secret detection, and vulnerability checking")
            .with_author("Agenticide Team")
    }

    async fn enable(&self, _ctx: &ExecutionContext) -> Result<()> {
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disable(&self, _ctx: &ExecutionContext) -> Result<()> {
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("scan", "Run security scan on project")
                .with_usage("agenticide security scan [path]"),
            CommandSpec::new("secrets", "Detect secrets in codebase")
                .with_usage("agenticide security secrets [path]"),
            CommandSpec::new("vulns", "Check dependencies for vulnerabilities")
                .with_usage("agenticide security vulns [path]"),
        ]
    }

    async fn handle_command(
        &self,
        ctx: &ExecutionContext,
        command: &str,
        args: &[String],
    ) -> Result<CommandResult> {
        match command {
            "scan" => self.scan(ctx, args).await,
            "secrets" => self.secrets(ctx, args).await,
            "vulns" => self.vulns(ctx, args).await,
            other => Ok(CommandResult::failure(RuntimeError::UnknownCommand(
                other.to_string(),
            ))),
        }
    }
}
