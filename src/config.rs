//! Configuration types for page assembly.
//!
//! All run behaviour is controlled through [`AssemblyConfig`], built via its
//! [`AssemblyConfigBuilder`]. The same value is threaded by reference through
//! classification, conversion and merging; nothing in the pipeline reads
//! process-wide state, so two runs with different settings can share one
//! process.

use crate::error::TailorError;
use crate::pipeline::tools::{Toolchain, ToolRunner};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one assembly run.
///
/// Built via [`AssemblyConfig::builder()`] or using
/// [`AssemblyConfig::default()`].
///
/// # Example
/// ```rust
/// use djvu_tailor::AssemblyConfig;
///
/// let config = AssemblyConfig::builder()
///     .dpi(600)
///     .workers(4)
///     .photo_quality("72,83,93".parse().unwrap())
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AssemblyConfig {
    /// Resolution of the input images in dots per inch. Default: 300.
    ///
    /// Recorded in every page so viewers render at physical size; the images
    /// themselves are never resampled.
    pub dpi: u32,

    /// `cjb2 -losslevel` for bitonal single-layer pages. Range 0–200. Default: 1.
    ///
    /// 0 is lossless; higher values let the JB2 encoder merge similar glyph
    /// shapes more aggressively.
    pub bitonal_loss_level: u32,

    /// IW44 slice targets for photographic layers. Default: `74,89,99`.
    pub photo_quality: SliceQuality,

    /// Number of pages converted in parallel. Default: 1.
    pub workers: usize,

    /// Base directory for the run workspace. Each run creates its own
    /// `djvu_temp_*` root inside it; the base itself is created if absent
    /// and never removed. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Keep the workspace (per-page intermediates) after the run. Default: false.
    pub keep_temp: bool,

    /// Replace an existing output file. Default: false.
    pub overwrite: bool,

    /// Per-subprocess timeout in seconds. `None` (default) waits indefinitely.
    pub tool_timeout_secs: Option<u64>,

    /// Rule deciding whether a single-layer page is bitonal.
    pub tone_detection: ToneDetection,

    /// Names of the background/foreground subdirectories.
    pub layout: LayerLayout,

    /// Accepted page image extensions, lowercase, without the dot.
    pub extensions: Vec<String>,

    /// Program names (or paths) of the external tools.
    pub toolchain: Toolchain,

    /// Pre-constructed tool runner. Takes precedence over the system runner.
    pub runner: Option<Arc<dyn ToolRunner>>,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            bitonal_loss_level: 1,
            photo_quality: SliceQuality::default(),
            workers: 1,
            temp_dir: None,
            keep_temp: false,
            overwrite: false,
            tool_timeout_secs: None,
            tone_detection: ToneDetection::default(),
            layout: LayerLayout::default(),
            extensions: vec!["tif".to_string(), "tiff".to_string()],
            toolchain: Toolchain::default(),
            runner: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AssemblyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblyConfig")
            .field("dpi", &self.dpi)
            .field("bitonal_loss_level", &self.bitonal_loss_level)
            .field("photo_quality", &self.photo_quality)
            .field("workers", &self.workers)
            .field("temp_dir", &self.temp_dir)
            .field("keep_temp", &self.keep_temp)
            .field("overwrite", &self.overwrite)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("tone_detection", &self.tone_detection)
            .field("layout", &self.layout)
            .field("extensions", &self.extensions)
            .field("toolchain", &self.toolchain)
            .field("runner", &self.runner.as_ref().map(|_| "<dyn ToolRunner>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AssemblyProgressCallback>"),
            )
            .finish()
    }
}

impl AssemblyConfig {
    /// Create a new builder for `AssemblyConfig`.
    pub fn builder() -> AssemblyConfigBuilder {
        AssemblyConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    /// True when `ext` (any case, no dot) is an accepted page extension.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Builder for [`AssemblyConfig`].
#[derive(Debug)]
pub struct AssemblyConfigBuilder {
    config: AssemblyConfig,
}

impl AssemblyConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn bitonal_loss_level(mut self, level: u32) -> Self {
        self.config.bitonal_loss_level = level;
        self
    }

    pub fn photo_quality(mut self, quality: SliceQuality) -> Self {
        self.config.photo_quality = quality;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn keep_temp(mut self, v: bool) -> Self {
        self.config.keep_temp = v;
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = Some(secs);
        self
    }

    pub fn tone_detection(mut self, rule: ToneDetection) -> Self {
        self.config.tone_detection = rule;
        self
    }

    pub fn layout(mut self, layout: LayerLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.extensions = exts
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.config.toolchain = toolchain;
        self
    }

    pub fn runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.config.runner = Some(runner);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AssemblyConfig, TailorError> {
        let c = &self.config;
        if !(25..=6000).contains(&c.dpi) {
            return Err(TailorError::InvalidConfig(format!(
                "DPI must be 25–6000, got {}",
                c.dpi
            )));
        }
        if c.bitonal_loss_level > 200 {
            return Err(TailorError::InvalidConfig(format!(
                "Bitonal loss level must be 0–200, got {}",
                c.bitonal_loss_level
            )));
        }
        if c.workers == 0 {
            return Err(TailorError::InvalidConfig("Worker count must be ≥ 1".into()));
        }
        if c.tool_timeout_secs == Some(0) {
            return Err(TailorError::InvalidConfig("Tool timeout must be ≥ 1s".into()));
        }
        if c.extensions.is_empty() {
            return Err(TailorError::InvalidConfig(
                "At least one page image extension is required".into(),
            ));
        }
        if c.layout.background == c.layout.foreground {
            return Err(TailorError::InvalidConfig(format!(
                "Background and foreground directories must differ, both are '{}'",
                c.layout.background
            )));
        }
        Ok(self.config)
    }
}

// ── Value types ──────────────────────────────────────────────────────────

/// Progressive IW44 quality targets, e.g. `74,89,99`.
///
/// Passed verbatim to `c44 -slice` and `csepdjvu -q`. Each value is the
/// cumulative slice count at which one refinement chunk ends, so the list
/// must be strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceQuality(Vec<u32>);

impl SliceQuality {
    pub fn new(levels: Vec<u32>) -> Result<Self, TailorError> {
        if levels.is_empty() {
            return Err(TailorError::InvalidConfig(
                "Quality needs at least one slice value".into(),
            ));
        }
        if let Some(bad) = levels.iter().find(|&&l| l == 0 || l > 1000) {
            return Err(TailorError::InvalidConfig(format!(
                "Quality slice values must be 1–1000, got {bad}"
            )));
        }
        if levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TailorError::InvalidConfig(format!(
                "Quality slice values must be strictly increasing, got {levels:?}"
            )));
        }
        Ok(Self(levels))
    }

    pub fn levels(&self) -> &[u32] {
        &self.0
    }
}

impl Default for SliceQuality {
    fn default() -> Self {
        Self(vec![74, 89, 99])
    }
}

impl fmt::Display for SliceQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for SliceQuality {
    type Err = TailorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let levels = s
            .split(',')
            .map(|p| {
                p.trim().parse::<u32>().map_err(|_| {
                    TailorError::InvalidConfig(format!("Invalid quality value: '{}'", p.trim()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(levels)
    }
}

/// How a single-layer page is judged bitonal.
///
/// Dual-layer pages never consult this: their foreground is bitonal and
/// their background continuous-tone by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToneDetection {
    /// Bitonal iff the source's stored colour type is 1 bit per pixel
    /// (header check only). (default)
    #[default]
    ColorMode,
    /// Treat every single-layer page as bitonal.
    AlwaysBitonal,
    /// Treat every single-layer page as continuous-tone.
    AlwaysContinuousTone,
}

/// Subdirectory names holding separated layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerLayout {
    pub background: String,
    pub foreground: String,
}

impl Default for LayerLayout {
    fn default() -> Self {
        Self {
            background: "background".to_string(),
            foreground: "foreground".to_string(),
        }
    }
}
