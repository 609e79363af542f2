//! Configuration types for a split-and-deliver run.
//!
//! All run behaviour is controlled through [`SplitConfig`], built via its
//! [`SplitConfigBuilder`]. The core never reads the environment or any global
//! state: the CLI (or the embedding application) resolves settings once and
//! passes them here at construction time.

use crate::delivery::IdentityProvider;
use crate::error::DocSplitError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Folder name used when a group has no detected ship-to client.
pub const UNCLASSIFIED_FOLDER: &str = "Unclassified";

/// Remote-storage settings supplied by the settings collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveSettings {
    /// OAuth client identifier passed to the identity provider.
    pub drive_client_id: String,
    /// Parent folder under which client folders are created. `None` = storage root.
    pub drive_folder_id: Option<String>,
}

/// Configuration for one split-and-deliver run.
///
/// # Example
/// ```rust
/// use edgequake_docsplit::SplitConfig;
///
/// let config = SplitConfig::builder()
///     .render_scale(2.0)
///     .max_attempts(5)
///     .model("gemini-2.5-pro")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct SplitConfig {
    /// Page scale factor for rasterisation. Range: 0.5–4.0. Default: 1.5.
    ///
    /// 1.5× native size keeps invoice numbers legible for the vision model
    /// while a JPEG of a letter-size page stays around 150–300 KB.
    pub render_scale: f32,

    /// Maximum rendered image edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// JPEG quality for page images (1–100). Default: 80.
    pub jpeg_quality: u8,

    /// Pages rendered and extracted at once. Default: 1 (strict page order).
    ///
    /// Results are always consumed in page order; raising this only overlaps
    /// network waits and keeps up to `concurrency` page images in memory.
    pub concurrency: usize,

    /// Vision model identifier, e.g. "gemini-2.5-pro". If None, uses provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "gemini", "openai"). If None along with `provider`,
    /// the provider is auto-detected from the environment by the entry point.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (identifiers are read, not written).
    pub temperature: f32,

    /// Maximum output tokens per extraction. Default: 1024.
    pub max_tokens: usize,

    /// Ask the provider for a JSON object response. Default: true.
    ///
    /// Providers without structured output ignore it; the answer is still
    /// sanitised before parsing either way.
    pub json_mode: bool,

    /// Total extraction attempts per page, first call included. Default: 3.
    ///
    /// Only rate-limit responses are retried; every other failure degrades the
    /// page to unknown metadata immediately.
    pub max_attempts: u32,

    /// Base backoff after a rate-limited attempt, in milliseconds. Default: 2000.
    ///
    /// Doubles after each attempt: 2 s → 4 s → 8 s.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for the vision model in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom extraction prompt. If None, uses the built-in prompt.
    pub extraction_prompt: Option<String>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Explicit path to libpdfium. If None, the current directory and then the
    /// system library path are tried.
    pub pdfium_library_path: Option<PathBuf>,

    /// Destination settings.
    pub drive: DriveSettings,

    /// Issues the bearer token for Drive delivery. Required unless `output_dir` is set.
    pub identity: Option<Arc<dyn IdentityProvider>>,

    /// Deliver into this local directory instead of Drive.
    pub output_dir: Option<PathBuf>,

    /// Folder for groups without a ship-to. Default: "Unclassified".
    pub unclassified_folder: String,

    /// Optional deadline for the whole run in seconds.
    pub run_timeout_secs: Option<u64>,

    /// Receives stage, page and delivery events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            render_scale: 1.5,
            max_rendered_pixels: 2000,
            jpeg_quality: 80,
            concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1024,
            json_mode: true,
            max_attempts: 3,
            retry_backoff_ms: 2000,
            api_timeout_secs: 60,
            extraction_prompt: None,
            password: None,
            download_timeout_secs: 120,
            pdfium_library_path: None,
            drive: DriveSettings::default(),
            identity: None,
            output_dir: None,
            unclassified_folder: UNCLASSIFIED_FOLDER.to_string(),
            run_timeout_secs: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SplitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitConfig")
            .field("render_scale", &self.render_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("json_mode", &self.json_mode)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("drive", &self.drive)
            .field("identity", &self.identity.as_ref().map(|_| "<dyn IdentityProvider>"))
            .field("output_dir", &self.output_dir)
            .field("unclassified_folder", &self.unclassified_folder)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .finish()
    }
}

impl SplitConfig {
    /// Create a new builder for `SplitConfig`.
    pub fn builder() -> SplitConfigBuilder {
        SplitConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`SplitConfig`].
#[derive(Debug)]
pub struct SplitConfigBuilder {
    config: SplitConfig,
}

impl SplitConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn json_mode(mut self, enabled: bool) -> Self {
        self.config.json_mode = enabled;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn drive(mut self, settings: DriveSettings) -> Self {
        self.config.drive = settings;
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.config.identity = Some(identity);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn unclassified_folder(mut self, name: impl Into<String>) -> Self {
        self.config.unclassified_folder = name.into();
        self
    }

    pub fn run_timeout_secs(mut self, secs: u64) -> Self {
        self.config.run_timeout_secs = Some(secs);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SplitConfig, DocSplitError> {
        let c = &self.config;
        if !(0.5..=4.0).contains(&c.render_scale) {
            return Err(DocSplitError::InvalidConfig(format!(
                "Render scale must be 0.5–4.0, got {}",
                c.render_scale
            )));
        }
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(DocSplitError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.max_attempts == 0 {
            return Err(DocSplitError::InvalidConfig(
                "Max attempts must be ≥ 1".into(),
            ));
        }
        if c.unclassified_folder.trim().is_empty() {
            return Err(DocSplitError::InvalidConfig(
                "Unclassified folder name must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
