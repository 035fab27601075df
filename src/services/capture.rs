use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::work_item::CapturedImage;

/// Permission to read from the camera, handed to every adapter explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CameraCapability {
    Granted,
    Denied,
}

impl CameraCapability {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            CameraCapability::Granted
        } else {
            CameraCapability::Denied
        }
    }
}

/// How captured frames are normalised before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub jpeg_quality: u8,
    pub max_dimension: u32,
}

/// Source of a compressed, encoded image.
#[async_trait]
pub trait CaptureAdapter: Send + Sync {
    async fn capture(&self) -> Result<CapturedImage, CaptureError>;
}

#[async_trait]
impl<T: CaptureAdapter + ?Sized> CaptureAdapter for std::sync::Arc<T> {
    async fn capture(&self) -> Result<CapturedImage, CaptureError> {
        (**self).capture().await
    }
}

/// Capture adapter for frames uploaded by a client device.
///
/// The uploaded frame is treated as raw sensor output: it must be a
/// recognised image, is downsized when larger than `max_dimension`, and is
/// always re-encoded as JPEG.
pub struct UploadCapture {
    frame: Vec<u8>,
    capability: CameraCapability,
    settings: EncodeSettings,
}

impl UploadCapture {
    pub fn new(frame: Vec<u8>, capability: CameraCapability, settings: EncodeSettings) -> Self {
        Self {
            frame,
            capability,
            settings,
        }
    }
}

#[async_trait]
impl CaptureAdapter for UploadCapture {
    async fn capture(&self) -> Result<CapturedImage, CaptureError> {
        if self.capability == CameraCapability::Denied {
            return Err(CaptureError::PermissionDenied);
        }
        if self.frame.is_empty() {
            return Err(CaptureError::Empty);
        }

        let frame = self.frame.clone();
        let settings = self.settings;
        let bytes = tokio::task::spawn_blocking(move || encode_frame(&frame, settings))
            .await
            .map_err(|e| CaptureError::Sensor(e.to_string()))??;

        tracing::debug!(
            input_bytes = self.frame.len(),
            output_bytes = bytes.len(),
            "Frame encoded"
        );

        Ok(CapturedImage::jpeg(bytes))
    }
}

/// Decode, bound and re-encode a frame as JPEG.
pub fn encode_frame(frame: &[u8], settings: EncodeSettings) -> Result<Vec<u8>, CaptureError> {
    image::guess_format(frame).map_err(|_| CaptureError::UnsupportedFormat)?;
    let decoded = image::load_from_memory(frame).map_err(CaptureError::Image)?;

    let max = settings.max_dimension;
    let bounded = if decoded.width() > max || decoded.height() > max {
        decoded.resize(max, max, FilterType::Triangle)
    } else {
        decoded
    };

    let rgb = DynamicImage::ImageRgb8(bounded.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, settings.jpeg_quality))
        .map_err(CaptureError::Image)?;

    if out.is_empty() {
        return Err(CaptureError::Empty);
    }
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera permission not granted")]
    PermissionDenied,

    #[error("Capture produced no data")]
    Empty,

    #[error("Frame is not a recognised image format")]
    UnsupportedFormat,

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Sensor failure: {0}")]
    Sensor(String),
}
