//! Layer conversion: one page's images → one finished single-page DjVu.
//!
//! ## Chains
//!
//! ```text
//! Single, bitonal     src ─cjb2─▶ page
//! Single, photo       src ─tifftopnm─▶ page.pnm ─c44─▶ page
//! Dual                fg  ─tifftopnm─▶ foreground.pbm ─pbmtodjvurle─▶ foreground.rle ┐
//!                     bg  ─tifftopnm─▶ background.pnm ───────────────────────────────┤
//!                         separated.sep = rle ++ pnm ─csepdjvu─▶ page
//! ```
//!
//! Encoders write `page.partial.djvu`; only a validated, non-empty product
//! is renamed to `page.djvu`. A failed page therefore never has a file at
//! the artifact path.

use crate::config::{AssemblyConfig, ToneDetection};
use crate::error::{ConversionError, Stage, StepFailure};
use crate::output::{PageEncoding, PerPageArtifact};
use crate::pipeline::classify::{PageDescriptor, PageKind};
use crate::pipeline::tools::{io_failure, run_step, Tool, ToolInvocation, ToolRunner};
use image::{ExtendedColorType, ImageDecoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// File name of a finished page inside its page directory.
pub const ARTIFACT_NAME: &str = "page.djvu";
const PARTIAL_NAME: &str = "page.partial.djvu";

/// One page bound to the run settings and its private directory.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub page: PageDescriptor,
    /// Page directory inside the run workspace; the only place this job writes.
    pub dir: PathBuf,
    pub config: Arc<AssemblyConfig>,
}

impl ConversionJob {
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(ARTIFACT_NAME)
    }
}

struct Chain<'a> {
    job: &'a ConversionJob,
    runner: &'a dyn ToolRunner,
    timeout: Option<Duration>,
}

impl Chain<'_> {
    fn fail(&self, stage: Stage) -> impl Fn(StepFailure) -> ConversionError {
        let page = self.job.page.index;
        move |failure| ConversionError {
            page,
            stage,
            failure,
        }
    }

    fn invocation(&self, tool: Tool, output: &str) -> ToolInvocation {
        ToolInvocation::new(&self.job.config.toolchain, tool, self.job.dir.join(output))
    }

    async fn step(&self, stage: Stage, inv: ToolInvocation) -> Result<u64, ConversionError> {
        run_step(self.runner, &inv, self.timeout)
            .await
            .map_err(self.fail(stage))
    }
}

/// Convert one page. Writes only inside `job.dir`.
pub async fn convert_page(
    job: &ConversionJob,
    runner: &dyn ToolRunner,
) -> Result<PerPageArtifact, ConversionError> {
    let start = Instant::now();
    let chain = Chain {
        job,
        runner,
        timeout: job.config.tool_timeout(),
    };

    let (encoding, bytes) = match job.page.kind {
        PageKind::Single { ref path } => {
            let bitonal = detect_bitonal(path, job.config.tone_detection)
                .await
                .map_err(chain.fail(Stage::DetectTone))?;
            if bitonal {
                (PageEncoding::Bitonal, encode_bitonal(&chain, path).await?)
            } else {
                (PageEncoding::Photo, encode_photo(&chain, path).await?)
            }
        }
        PageKind::Dual {
            ref background,
            ref foreground,
        } => (
            PageEncoding::Compound,
            encode_compound(&chain, background, foreground).await?,
        ),
    };

    let artifact = job.artifact_path();
    tokio::fs::rename(job.dir.join(PARTIAL_NAME), &artifact)
        .await
        .map_err(|e| io_failure(&artifact, e))
        .map_err(chain.fail(Stage::Finalize))?;

    let duration_ms = start.elapsed().as_millis() as u64;
    debug!(
        "Page {} ({:?}) → {} bytes in {}ms",
        job.page.index, encoding, bytes, duration_ms
    );

    Ok(PerPageArtifact {
        index: job.page.index,
        path: artifact,
        bytes,
        encoding,
        duration_ms,
    })
}

async fn encode_bitonal(chain: &Chain<'_>, src: &Path) -> Result<u64, ConversionError> {
    let cfg = &chain.job.config;
    let inv = chain
        .invocation(Tool::Cjb2, PARTIAL_NAME)
        .arg("-dpi")
        .arg(cfg.dpi.to_string())
        .arg("-losslevel")
        .arg(cfg.bitonal_loss_level.to_string());
    let inv = with_io(inv, src);
    chain.step(Stage::EncodeBitonal, inv).await
}

async fn encode_photo(chain: &Chain<'_>, src: &Path) -> Result<u64, ConversionError> {
    let cfg = &chain.job.config;
    let pnm = chain
        .invocation(Tool::TiffToPnm, "page.pnm")
        .arg(src)
        .stdout_to_output();
    chain.step(Stage::DecodeSingle, pnm.clone()).await?;

    let inv = chain
        .invocation(Tool::C44, PARTIAL_NAME)
        .arg("-dpi")
        .arg(cfg.dpi.to_string())
        .arg("-slice")
        .arg(cfg.photo_quality.to_string());
    let inv = with_io(inv, &pnm.output);
    chain.step(Stage::EncodePhoto, inv).await
}

async fn encode_compound(
    chain: &Chain<'_>,
    background: &Path,
    foreground: &Path,
) -> Result<u64, ConversionError> {
    let cfg = &chain.job.config;

    let pbm = chain
        .invocation(Tool::TiffToPnm, "foreground.pbm")
        .arg(foreground)
        .stdout_to_output();
    chain.step(Stage::DecodeForeground, pbm.clone()).await?;

    let rle = chain
        .invocation(Tool::PbmToRle, "foreground.rle")
        .stdin_from(&pbm.output)
        .stdout_to_output();
    chain.step(Stage::EncodeMask, rle.clone()).await?;

    let pnm = chain
        .invocation(Tool::TiffToPnm, "background.pnm")
        .arg(background)
        .stdout_to_output();
    chain.step(Stage::DecodeBackground, pnm.clone()).await?;

    let separated = chain.job.dir.join("separated.sep");
    join_layers(&[&rle.output, &pnm.output], &separated)
        .await
        .map_err(chain.fail(Stage::JoinLayers))?;

    let inv = chain
        .invocation(Tool::CsepDjvu, PARTIAL_NAME)
        .arg("-d")
        .arg(cfg.dpi.to_string())
        .arg("-q")
        .arg(cfg.photo_quality.to_string());
    let inv = with_io(inv, &separated);
    chain.step(Stage::Composite, inv).await
}

/// Append `input output` as the final two positional arguments.
fn with_io(inv: ToolInvocation, input: &Path) -> ToolInvocation {
    let output = inv.output.clone();
    inv.arg(input).arg(output)
}

/// Concatenate `parts` into `dest`; csepdjvu reads the mask stream and the
/// background image back to back.
async fn join_layers(parts: &[&Path], dest: &Path) -> Result<(), StepFailure> {
    let mut out = tokio::fs::File::create(dest)
        .await
        .map_err(|e| io_failure(dest, e))?;
    for part in parts {
        let mut src = tokio::fs::File::open(part)
            .await
            .map_err(|e| io_failure(part, e))?;
        tokio::io::copy(&mut src, &mut out)
            .await
            .map_err(|e| io_failure(dest, e))?;
    }
    out.sync_all().await.map_err(|e| io_failure(dest, e))
}

// ── Tone detection ───────────────────────────────────────────────────────────

/// Decide whether a single-layer source goes through the bitonal encoder.
pub async fn detect_bitonal(path: &Path, rule: ToneDetection) -> Result<bool, StepFailure> {
    match rule {
        ToneDetection::AlwaysBitonal => Ok(true),
        ToneDetection::AlwaysContinuousTone => Ok(false),
        ToneDetection::ColorMode => {
            let owned = path.to_path_buf();
            let color = tokio::task::spawn_blocking(move || source_color_type(&owned))
                .await
                .map_err(|e| StepFailure::Unreadable {
                    path: path.to_path_buf(),
                    detail: format!("header task panicked: {e}"),
                })??;
            debug!("{}: stored as {:?}", path.display(), color);
            Ok(is_bitonal(color))
        }
    }
}

/// Colour type as stored in the file, read from the header only.
pub fn source_color_type(path: &Path) -> Result<ExtendedColorType, StepFailure> {
    let unreadable = |detail: String| StepFailure::Unreadable {
        path: path.to_path_buf(),
        detail,
    };
    let decoder = image::ImageReader::open(path)
        .map_err(|e| unreadable(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| unreadable(e.to_string()))?
        .into_decoder()
        .map_err(|e| unreadable(e.to_string()))?;
    Ok(decoder.original_color_type())
}

/// One bit per pixel of luminance (optionally with a 1-bit alpha).
pub fn is_bitonal(color: ExtendedColorType) -> bool {
    matches!(color, ExtendedColorType::L1 | ExtendedColorType::La1)
}
