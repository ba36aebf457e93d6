//! Upload processing: crop-resize to a fixed size and re-encode as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const JPEG_QUALITY: u8 = 90;

/// Target sizes for the two kinds of upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

pub const USER_PHOTO: Dimensions = Dimensions { width: 500, height: 500 };
pub const TOUR_IMAGE: Dimensions = Dimensions { width: 2000, height: 1333 };

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Not an image! Please upload only images.")]
    NotAnImage,
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("could not write image: {0}")]
    Io(#[from] std::io::Error),
    #[error("image task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Reject uploads whose declared content type is not `image/*`.
pub fn check_content_type(content_type: Option<&str>) -> Result<(), ImageError> {
    match content_type {
        Some(ct) if ct.starts_with("image/") => Ok(()),
        _ => Err(ImageError::NotAnImage),
    }
}

/// Decode, cover-crop to `size`, and encode as JPEG. CPU bound; call from a blocking task.
pub fn resize_to_jpeg(bytes: &[u8], size: Dimensions) -> Result<Vec<u8>, ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = decoded
        .resize_to_fill(size.width, size.height, FilterType::Lanczos3)
        .to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&resized)?;
    Ok(out)
}

/// Resize on the blocking pool and write the result to `dir/file_name`.
pub async fn save_resized(
    bytes: Vec<u8>,
    size: Dimensions,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf, ImageError> {
    let encoded = tokio::task::spawn_blocking(move || resize_to_jpeg(&bytes, size)).await??;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, encoded).await?;
    tracing::debug!(path = %path.display(), "Saved resized image");
    Ok(path)
}

/// Remove files written for an upload whose record update did not go through.
pub async fn remove_files(dir: &Path, file_names: &[String]) {
    for name in file_names {
        let path = dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed orphaned image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned image"),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_filter() {
        assert!(check_content_type(Some("image/png")).is_ok());
        assert!(matches!(check_content_type(Some("text/plain")), Err(ImageError::NotAnImage)));
        assert!(check_content_type(None).is_err());
    }

    #[test]
    fn test_resize_produces_exact_jpeg() {
        let jpeg = resize_to_jpeg(&sample_png(64, 32), Dimensions { width: 20, height: 20 }).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 20));
        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            resize_to_jpeg(b"definitely not an image", USER_PHOTO),
            Err(ImageError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_save_resized_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_resized(
            sample_png(10, 10),
            Dimensions { width: 8, height: 8 },
            &dir.path().join("img/users"),
            "user-1-123.jpeg",
        )
        .await
        .unwrap();
        assert!(path.ends_with("img/users/user-1-123.jpeg"));
        assert!(path.exists());
    }
}
