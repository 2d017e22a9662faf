//! Service configuration, read once at startup from the environment.
//!
//! Values come from process environment variables (after `.env` is loaded by
//! the binary). Construction goes through a lookup closure so tests can supply
//! a plain map. A present but malformed value is an error; only absent or
//! blank keys fall back to their defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::artifacts::extensions::parse_set;
use crate::artifacts::{ArtifactSettings, ExtensionPolicy};
use crate::ratelimit::Budget;
use crate::subtitle::CaptionStyle;
use crate::subtitle::color::Rgb;
use crate::{Error, Result};

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    /// Allowed CORS origins; empty means any origin.
    pub cors_origins: Vec<String>,
}

/// External engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub timeout: Duration,
    /// Encoder threads; 0 lets the engine decide.
    pub threads: u32,
    pub max_concurrent_jobs: usize,
}

/// Remote object storage (Cloudflare R2 or any S3-compatible endpoint).
#[derive(Debug, Clone, Default)]
pub struct R2Settings {
    pub account_id: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: Option<String>,
    pub region: String,
    pub key_prefix: Option<String>,
    pub public_base_url: Option<String>,
}

impl R2Settings {
    /// The S3 endpoint: explicit, or derived from the account id.
    pub fn endpoint(&self) -> Option<String> {
        self.endpoint_url.clone().or_else(|| {
            self.account_id
                .as_ref()
                .map(|id| format!("https://{id}.r2.cloudflarestorage.com"))
        })
    }

    /// Whether enough is configured to attempt an upload.
    pub fn is_configured(&self) -> bool {
        self.endpoint().is_some()
            && self.access_key_id.is_some()
            && self.secret_access_key.is_some()
            && self.bucket.is_some()
    }
}

/// Immutable service configuration shared by every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub api_keys: Vec<String>,
    pub general_budget: Budget,
    pub upload_budget: Budget,
    pub max_upload_bytes: u64,
    pub extensions: ExtensionPolicy,
    pub artifacts: ArtifactSettings,
    pub cleanup_interval: Duration,
    pub engine: EngineSettings,
    pub caption_style: CaptionStyle,
    pub log_dir: PathBuf,
    pub r2: R2Settings,
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(key) {
            Some(value) => value
                .parse()
                .map_err(|e| Error::config(format!("{key}: invalid value '{value}': {e}"))),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parsed(key, default)?;
        if value <= T::default() {
            return Err(Error::config(format!("{key}: must be greater than zero")));
        }
        Ok(value)
    }

    fn fraction(&self, key: &str, default: f64, max: f64) -> Result<f64> {
        let value = self.parsed(key, default)?;
        if !(0.0..=max).contains(&value) {
            return Err(Error::config(format!("{key}: must be within [0, {max}]")));
        }
        Ok(value)
    }

    fn list(&self, key: &str, default: &str) -> Vec<String> {
        self.string(key, default)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl AppConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration from a map, for tests.
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    /// Read the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Source { lookup };

        let server = ServerSettings {
            bind_address: env.string("API_BIND_ADDRESS", "0.0.0.0"),
            port: env.parsed("API_PORT", 8000)?,
            cors_origins: env
                .list("CORS_ORIGINS", "*")
                .into_iter()
                .filter(|o| o != "*")
                .collect(),
        };

        let api_keys = env.list("API_KEYS", "dev-key-change-me");
        if api_keys.is_empty() {
            return Err(Error::config("API_KEYS: at least one key is required"));
        }

        let window = env.positive("RATE_LIMIT_WINDOW", 60u64)?;
        let general_budget = Budget::new(
            env.positive("RATE_LIMIT_REQUESTS", 100u32)?,
            Duration::from_secs(window),
        );
        let upload_budget = Budget::new(
            env.positive("RATE_LIMIT_UPLOAD_REQUESTS", 10u32)?,
            Duration::from_secs(env.positive("RATE_LIMIT_UPLOAD_WINDOW", window)?),
        );

        let max_upload_mb: u64 = env.positive("MAX_UPLOAD_SIZE_MB", 500)?;
        let defaults = ExtensionPolicy::default();
        let extension_list = |key: &str, kind| {
            let set = env
                .raw(key)
                .map(|raw| parse_set(&raw))
                .unwrap_or_else(|| defaults.allowed(kind).clone());
            if set.is_empty() {
                return Err(Error::config(format!("{key}: no usable extensions")));
            }
            Ok(set)
        };
        let extensions = ExtensionPolicy::new(
            extension_list("ALLOWED_VIDEO_EXTENSIONS", crate::media::MediaKind::Video)?,
            extension_list("ALLOWED_IMAGE_EXTENSIONS", crate::media::MediaKind::Image)?,
            extension_list("ALLOWED_AUDIO_EXTENSIONS", crate::media::MediaKind::Audio)?,
        );

        let artifacts = ArtifactSettings {
            temp_root: PathBuf::from(env.string("TEMP_DIR", "/tmp/mediaforge/temp")),
            output_root: PathBuf::from(env.string("OUTPUT_DIR", "/tmp/mediaforge/output")),
            retention: Duration::from_secs(env.positive("FILE_RETENTION_SECONDS", 3600u64)?),
            grace: Duration::from_secs(env.parsed("DOWNLOAD_GRACE_SECONDS", 30u64)?),
        };
        if artifacts.temp_root == artifacts.output_root {
            return Err(Error::config("TEMP_DIR and OUTPUT_DIR must differ"));
        }

        let default_jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        let engine = EngineSettings {
            ffmpeg_path: env.string("FFMPEG_PATH", "ffmpeg"),
            ffprobe_path: env.string("FFPROBE_PATH", "ffprobe"),
            timeout: Duration::from_secs(env.positive("FFMPEG_TIMEOUT", 300u64)?),
            threads: env.parsed("FFMPEG_THREADS", 0u32)?,
            max_concurrent_jobs: env.positive("MAX_CONCURRENT_JOBS", default_jobs)?,
        };

        let style_defaults = CaptionStyle::default();
        let caption_style = CaptionStyle {
            font: env.string("CAPTION_FONT", &style_defaults.font),
            max_width_fraction: env.fraction("CAPTION_MAX_WIDTH", style_defaults.max_width_fraction, 1.0)?,
            line_height_factor: env.positive("CAPTION_LINE_HEIGHT", style_defaults.line_height_factor)?,
            margin_x_fraction: env.fraction("CAPTION_MARGIN_X", style_defaults.margin_x_fraction, 0.45)?,
            margin_bottom_fraction: env.fraction(
                "CAPTION_MARGIN_BOTTOM",
                style_defaults.margin_bottom_fraction,
                0.9,
            )?,
            background_color: env
                .raw("CAPTION_BG_COLOR")
                .map(|raw| {
                    raw.parse::<Rgb>()
                        .map_err(|e| Error::config(format!("CAPTION_BG_COLOR: {e}")))
                })
                .transpose()?
                .unwrap_or(style_defaults.background_color),
            background_opacity: env.fraction(
                "CAPTION_BG_OPACITY",
                style_defaults.background_opacity,
                1.0,
            )?,
            ..style_defaults
        };
        caption_style
            .validate()
            .map_err(|e| Error::config(format!("caption defaults: {e}")))?;

        let r2 = R2Settings {
            account_id: env.raw("R2_ACCOUNT_ID"),
            endpoint_url: env.raw("R2_ENDPOINT_URL"),
            access_key_id: env.raw("R2_ACCESS_KEY_ID"),
            secret_access_key: env.raw("R2_SECRET_ACCESS_KEY"),
            bucket: env.raw("R2_BUCKET"),
            region: env.string("R2_REGION", "auto"),
            key_prefix: env.raw("R2_KEY_PREFIX"),
            public_base_url: env.raw("R2_PUBLIC_BASE_URL"),
        };

        Ok(Self {
            server,
            api_keys,
            general_budget,
            upload_budget,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            extensions,
            artifacts,
            cleanup_interval: Duration::from_secs(env.positive("CLEANUP_INTERVAL_SECONDS", 60u64)?),
            engine,
            caption_style,
            log_dir: PathBuf::from(env.string("LOG_DIR", "logs")),
            r2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Extension, MediaKind};

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_map(&map)
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert!(config.server.cors_origins.is_empty());
        assert_eq!(config.api_keys, ["dev-key-change-me"]);
        assert_eq!(config.general_budget, Budget::new(100, Duration::from_secs(60)));
        assert_eq!(config.upload_budget, Budget::new(10, Duration::from_secs(60)));
        assert_eq!(config.max_upload_bytes, 500 * 1024 * 1024);
        assert_eq!(config.artifacts.retention, Duration::from_secs(3600));
        assert_eq!(config.artifacts.grace, Duration::from_secs(30));
        assert_eq!(config.engine.timeout, Duration::from_secs(300));
        assert_eq!(config.engine.threads, 0);
        assert!(config.engine.max_concurrent_jobs >= 1);
        assert_eq!(config.caption_style, CaptionStyle::default());
        assert!(!config.r2.is_configured());
        assert_eq!(config.r2.region, "auto");
    }

    #[test]
    fn values_are_read_and_normalized() {
        let config = config(&[
            ("API_PORT", "9000"),
            ("API_KEYS", " a , b ,,"),
            ("CORS_ORIGINS", "https://x.test, https://y.test"),
            ("RATE_LIMIT_WINDOW", "30"),
            ("RATE_LIMIT_UPLOAD_REQUESTS", "3"),
            ("ALLOWED_VIDEO_EXTENSIONS", ".MP4, mov"),
            ("CAPTION_BG_COLOR", "#112233"),
            ("CAPTION_BG_OPACITY", "0.5"),
            ("R2_ACCOUNT_ID", "acct"),
            ("R2_ACCESS_KEY_ID", "id"),
            ("R2_SECRET_ACCESS_KEY", "secret"),
            ("R2_BUCKET", "media"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.api_keys, ["a", "b"]);
        assert_eq!(config.server.cors_origins.len(), 2);
        assert_eq!(config.upload_budget, Budget::new(3, Duration::from_secs(30)));
        let mov = Extension::parse("mov").unwrap();
        assert!(config.extensions.is_allowed(MediaKind::Video, &mov));
        assert!(!config.extensions.is_allowed(MediaKind::Video, &Extension::parse("mkv").unwrap()));
        assert_eq!(config.caption_style.background_color, Rgb::new(0x11, 0x22, 0x33));
        assert_eq!(config.caption_style.background_opacity, 0.5);
        assert!(config.r2.is_configured());
        assert_eq!(
            config.r2.endpoint().unwrap(),
            "https://acct.r2.cloudflarestorage.com"
        );
    }

    #[test]
    fn malformed_values_are_errors() {
        for pair in [
            ("API_PORT", "eighty"),
            ("RATE_LIMIT_REQUESTS", "0"),
            ("FFMPEG_TIMEOUT", "-5"),
            ("CAPTION_BG_OPACITY", "1.5"),
            ("CAPTION_BG_COLOR", "plaid"),
            ("ALLOWED_IMAGE_EXTENSIONS", "../,"),
            ("API_KEYS", " , "),
        ] {
            let err = config(&[pair]).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{pair:?}");
        }
    }

    #[test]
    fn managed_roots_must_differ() {
        assert!(config(&[("TEMP_DIR", "/tmp/x"), ("OUTPUT_DIR", "/tmp/x")]).is_err());
    }
}
