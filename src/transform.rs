//! Raster conversion into display-ready bitmaps
//!
//! Screenshots are resized to the exact display size, rotated and reduced to
//! black and white, then encoded as BMP which is what the e-ink clients read.

use crate::{TransformBackend, TransformError, TransformSettings};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Content type of every image produced by this module.
pub const BMP_CONTENT_TYPE: &str = "image/bmp";

/// Output geometry of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformTarget {
    pub width: u32,
    pub height: u32,
    /// Rotation in degrees, applied after resizing
    pub rotation: i32,
}

/// Converts raw screenshot bytes into the served image format.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RasterTransform: Send + Sync {
    async fn transform(
        &self,
        source: Vec<u8>,
        target: TransformTarget,
    ) -> Result<Vec<u8>, TransformError>;

    /// MIME type of the produced bytes.
    fn content_type(&self) -> &'static str;
}

pub fn create_transform(settings: &TransformSettings) -> Arc<dyn RasterTransform> {
    match settings.backend {
        TransformBackend::ImageMagick => Arc::new(ImageMagickTransform::new(&settings.program)),
        TransformBackend::Builtin => Arc::new(BuiltinTransform),
    }
}

/// Pipes the image through ImageMagick.
#[derive(Debug, Clone)]
pub struct ImageMagickTransform {
    program: String,
}

impl ImageMagickTransform {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(target: &TransformTarget) -> Vec<String> {
        vec![
            "png:-".to_string(),
            "-resize".to_string(),
            format!("{}x{}!", target.width, target.height),
            "-rotate".to_string(),
            target.rotation.to_string(),
            "-monochrome".to_string(),
            "bmp:-".to_string(),
        ]
    }

    fn spawn_error(&self, err: std::io::Error) -> TransformError {
        TransformError::Spawn {
            program: self.program.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl RasterTransform for ImageMagickTransform {
    async fn transform(
        &self,
        source: Vec<u8>,
        target: TransformTarget,
    ) -> Result<Vec<u8>, TransformError> {
        let mut child = Command::new(&self.program)
            .args(Self::args(&target))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.spawn_error(std::io::ErrorKind::BrokenPipe.into()))?;

        // Feed stdin concurrently with reading stdout, a large image would
        // otherwise fill both pipes and stall.
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&source).await;
            drop(stdin);
            result
        });

        let output = child.wait_with_output().await.map_err(|e| self.spawn_error(e))?;

        match writer.await {
            Ok(Err(e)) => debug!("Converter closed stdin early: {}", e),
            Err(e) => debug!("Stdin writer task failed: {}", e),
            Ok(Ok(())) => {}
        }

        if !output.status.success() {
            return Err(TransformError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if output.stdout.is_empty() {
            return Err(TransformError::Encode("converter produced no output".to_string()));
        }

        Ok(output.stdout)
    }

    fn content_type(&self) -> &'static str {
        BMP_CONTENT_TYPE
    }
}

/// In-process conversion with the `image` crate.
///
/// Only quarter turns are supported. Pixels are thresholded at mid-grey
/// instead of dithered.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTransform;

impl BuiltinTransform {
    pub fn convert(source: &[u8], target: TransformTarget) -> Result<Vec<u8>, TransformError> {
        let img = image::load_from_memory(source)?;
        let resized = img.resize_exact(target.width, target.height, FilterType::Triangle);

        let rotated = match target.rotation.rem_euclid(360) {
            0 => resized,
            90 => resized.rotate90(),
            180 => resized.rotate180(),
            270 => resized.rotate270(),
            _ => return Err(TransformError::UnsupportedRotation(target.rotation)),
        };

        let mono = monochrome(&rotated.to_luma8());

        let mut data = Vec::new();
        DynamicImage::ImageLuma8(mono)
            .write_to(&mut std::io::Cursor::new(&mut data), ImageFormat::Bmp)?;

        Ok(data)
    }
}

#[async_trait]
impl RasterTransform for BuiltinTransform {
    async fn transform(
        &self,
        source: Vec<u8>,
        target: TransformTarget,
    ) -> Result<Vec<u8>, TransformError> {
        tokio::task::spawn_blocking(move || Self::convert(&source, target))
            .await
            .map_err(|e| TransformError::Encode(e.to_string()))?
    }

    fn content_type(&self) -> &'static str {
        BMP_CONTENT_TYPE
    }
}

fn monochrome(gray: &GrayImage) -> GrayImage {
    let mut mono = gray.clone();
    for pixel in mono.pixels_mut() {
        let Luma([value]) = *pixel;
        *pixel = Luma([if value < 128 { 0 } else { 255 }]);
    }
    mono
}
