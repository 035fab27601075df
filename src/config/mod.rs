use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

use crate::models::outcome::MatchPolicy;
use crate::services::capture::{CameraCapability, EncodeSettings};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus listener for the detection worker
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the detection queue
    pub redis_url: String,

    /// AES-256-GCM key for payloads at rest (base64-encoded, 32 bytes)
    pub encryption_key: String,

    /// Upper bound on the correlation wait, in milliseconds
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,

    /// Fewest detections that count as a match
    #[serde(default = "default_min_matches")]
    pub min_matches: u32,

    /// Most detections that still count as a match (unbounded when unset)
    #[serde(default)]
    pub max_matches: Option<u32>,

    /// Whether this deployment may read from the camera at all
    #[serde(default = "default_camera_enabled")]
    pub camera_enabled: bool,

    /// JPEG quality used when re-encoding captured frames
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Frames larger than this (either side, in pixels) are downsized
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,

    /// Cloudflare account ID (worker only)
    #[serde(default)]
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token (worker only)
    #[serde(default)]
    pub cf_api_token: Option<String>,

    /// Detection label counted by the worker
    #[serde(default = "default_detection_label")]
    pub detection_label: String,

    /// Minimum detection score counted by the worker
    #[serde(default = "default_detection_min_score")]
    pub detection_min_score: f64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_verify_timeout_ms() -> u64 {
    5000
}

fn default_min_matches() -> u32 {
    1
}

fn default_camera_enabled() -> bool {
    true
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_max_image_dimension() -> u32 {
    1024
}

fn default_detection_label() -> String {
    "person".to_string()
}

fn default_detection_min_score() -> f64 {
    0.7
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Collect and validate the knobs that shape a single verification.
    pub fn verification_settings(&self) -> Result<VerificationSettings, garde::Report> {
        let settings = VerificationSettings {
            timeout_ms: self.verify_timeout_ms,
            min_matches: self.min_matches,
            max_matches: self.max_matches,
            camera_enabled: self.camera_enabled,
            jpeg_quality: self.jpeg_quality,
            max_image_dimension: self.max_image_dimension,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Validated verification settings shared by the server and tests.
#[derive(Debug, Clone, Validate)]
pub struct VerificationSettings {
    #[garde(range(min = 1, max = 60_000))]
    pub timeout_ms: u64,

    #[garde(range(min = 1))]
    pub min_matches: u32,

    #[garde(custom(not_below(&self.min_matches)))]
    pub max_matches: Option<u32>,

    #[garde(skip)]
    pub camera_enabled: bool,

    #[garde(range(min = 1, max = 100))]
    pub jpeg_quality: u8,

    #[garde(range(min = 64, max = 8192))]
    pub max_image_dimension: u32,
}

fn not_below(min: &u32) -> impl FnOnce(&Option<u32>, &()) -> garde::Result + '_ {
    move |max, _| match max {
        Some(max) if max < min => Err(garde::Error::new(format!(
            "max_matches ({max}) is below min_matches ({min})"
        ))),
        _ => Ok(()),
    }
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_verify_timeout_ms(),
            min_matches: default_min_matches(),
            max_matches: None,
            camera_enabled: default_camera_enabled(),
            jpeg_quality: default_jpeg_quality(),
            max_image_dimension: default_max_image_dimension(),
        }
    }
}

impl VerificationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            min_matches: self.min_matches,
            max_matches: self.max_matches,
        }
    }

    pub fn capability(&self) -> CameraCapability {
        CameraCapability::from_enabled(self.camera_enabled)
    }

    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            jpeg_quality: self.jpeg_quality,
            max_dimension: self.max_image_dimension,
        }
    }
}
