//! External tool invocation: netpbm and djvulibre as subprocesses.
//!
//! Every conversion step is one [`ToolInvocation`]: a program, its argv, an
//! optional file fed on stdin, an optional file receiving stdout, and the
//! product path the step must leave behind. Steps are chained purely through
//! those files, so a step is a function of its input paths and the run
//! settings and can be replayed by hand from a retained workspace.
//!
//! [`ToolRunner`] is the seam between the pipeline and the operating system.
//! [`SystemToolRunner`] spawns real processes; tests plug in a scripted fake.

use crate::error::StepFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// The external programs the pipeline knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tool {
    /// TIFF → PNM/PBM on stdout (netpbm).
    TiffToPnm,
    /// PBM on stdin → DjVu RLE on stdout (djvulibre).
    PbmToRle,
    /// Bitonal image → JB2-encoded single page (djvulibre).
    Cjb2,
    /// PNM → IW44-encoded photo page (djvulibre).
    C44,
    /// Separated RLE + PNM stream → compound page (djvulibre).
    CsepDjvu,
    /// Bundles single pages into one multi-page document (djvulibre).
    Djvm,
}

impl Tool {
    pub fn default_program(self) -> &'static str {
        match self {
            Tool::TiffToPnm => "tifftopnm",
            Tool::PbmToRle => "pbmtodjvurle",
            Tool::Cjb2 => "cjb2",
            Tool::C44 => "c44",
            Tool::CsepDjvu => "csepdjvu",
            Tool::Djvm => "djvm",
        }
    }

    /// Distribution package that usually ships the program.
    pub fn package(self) -> &'static str {
        match self {
            Tool::TiffToPnm => "netpbm",
            _ => "djvulibre",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_program())
    }
}

/// Program name or path for each [`Tool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub tifftopnm: String,
    pub pbmtodjvurle: String,
    pub cjb2: String,
    pub c44: String,
    pub csepdjvu: String,
    pub djvm: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            tifftopnm: Tool::TiffToPnm.default_program().to_string(),
            pbmtodjvurle: Tool::PbmToRle.default_program().to_string(),
            cjb2: Tool::Cjb2.default_program().to_string(),
            c44: Tool::C44.default_program().to_string(),
            csepdjvu: Tool::CsepDjvu.default_program().to_string(),
            djvm: Tool::Djvm.default_program().to_string(),
        }
    }
}

impl Toolchain {
    /// Resolve every program inside `dir`, e.g. a private djvulibre build.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let at = |t: Tool| dir.as_ref().join(t.default_program()).to_string_lossy().into_owned();
        Self {
            tifftopnm: at(Tool::TiffToPnm),
            pbmtodjvurle: at(Tool::PbmToRle),
            cjb2: at(Tool::Cjb2),
            c44: at(Tool::C44),
            csepdjvu: at(Tool::CsepDjvu),
            djvm: at(Tool::Djvm),
        }
    }

    pub fn program(&self, tool: Tool) -> &str {
        match tool {
            Tool::TiffToPnm => &self.tifftopnm,
            Tool::PbmToRle => &self.pbmtodjvurle,
            Tool::Cjb2 => &self.cjb2,
            Tool::C44 => &self.c44,
            Tool::CsepDjvu => &self.csepdjvu,
            Tool::Djvm => &self.djvm,
        }
    }
}

/// One subprocess call and the file it must produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: Tool,
    pub program: String,
    pub args: Vec<OsString>,
    /// File streamed to the child's stdin.
    pub stdin: Option<PathBuf>,
    /// File receiving the child's stdout.
    pub stdout: Option<PathBuf>,
    /// Product that must exist and be non-empty after a successful run.
    pub output: PathBuf,
}

impl ToolInvocation {
    pub fn new(toolchain: &Toolchain, tool: Tool, output: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            program: toolchain.program(tool).to_string(),
            args: Vec::new(),
            stdin: None,
            stdout: None,
            output: output.into(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Capture stdout into the invocation's product file.
    pub fn stdout_to_output(mut self) -> Self {
        self.stdout = Some(self.output.clone());
        self
    }

    /// Shell-like rendering for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for a in &self.args {
            line.push(' ');
            line.push_str(&a.to_string_lossy());
        }
        if let Some(ref p) = self.stdin {
            line.push_str(&format!(" < {}", p.display()));
        }
        if let Some(ref p) = self.stdout {
            line.push_str(&format!(" > {}", p.display()));
        }
        line
    }
}

/// Executes tool invocations.
///
/// Implementations must be `Send + Sync`: one runner is shared by all
/// workers. A runner only reports whether the process succeeded; product
/// validation happens in [`run_step`].
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        timeout: Option<Duration>,
    ) -> Result<(), StepFailure>;
}

/// Runs tools as real child processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(
        &self,
        inv: &ToolInvocation,
        timeout: Option<Duration>,
    ) -> Result<(), StepFailure> {
        debug!("Running: {}", inv.command_line());

        let mut cmd = tokio::process::Command::new(&inv.program);
        cmd.args(&inv.args)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.stdin(match inv.stdin {
            Some(ref p) => Stdio::from(std::fs::File::open(p).map_err(|e| io_failure(p, e))?),
            None => Stdio::null(),
        });
        cmd.stdout(match inv.stdout {
            Some(ref p) => Stdio::from(std::fs::File::create(p).map_err(|e| io_failure(p, e))?),
            None => Stdio::null(),
        });

        let child = cmd.spawn().map_err(|e| StepFailure::Spawn {
            program: inv.program.clone(),
            detail: if e.kind() == std::io::ErrorKind::NotFound {
                format!("{e} (is {} installed and on PATH?)", inv.tool.package())
            } else {
                e.to_string()
            },
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let wait = child.wait_with_output();
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| StepFailure::TimedOut {
                    program: inv.program.clone(),
                    secs: limit.as_secs(),
                })?,
            None => wait.await,
        }
        .map_err(|e| io_failure(&inv.output, e))?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        debug!("{} [{}]: {}", inv.program, output.status, stderr.trim());

        if !output.status.success() {
            return Err(StepFailure::ExitStatus {
                program: inv.program.clone(),
                code: output.status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

/// Run one step and verify its product.
///
/// Returns the product size in bytes. On any failure the (possibly partial)
/// product is removed so nothing downstream can mistake it for a result.
pub async fn run_step(
    runner: &dyn ToolRunner,
    invocation: &ToolInvocation,
    timeout: Option<Duration>,
) -> Result<u64, StepFailure> {
    let result = match runner.run(invocation, timeout).await {
        Ok(()) => match tokio::fs::metadata(&invocation.output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
            _ => Err(StepFailure::EmptyOutput {
                program: invocation.program.clone(),
                path: invocation.output.clone(),
            }),
        },
        Err(e) => Err(e),
    };

    if result.is_err() {
        let _ = tokio::fs::remove_file(&invocation.output).await;
    }
    result
}

pub(crate) fn io_failure(path: &Path, e: std::io::Error) -> StepFailure {
    StepFailure::Io {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}
