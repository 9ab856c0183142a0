//! Attachment normalization.
//!
//! Images larger than the configured bound are downscaled to fit a
//! `max_dimension × max_dimension` box, keeping the aspect ratio, and
//! re-encoded in their original format. Anything that cannot be probed,
//! decoded, or re-encoded is stored as the raw bytes with a warning.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use tracing::{debug, warn};

use crate::models::Attachment;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Builds the [`Attachment`] to persist for a downloaded file.
///
/// Never fails: every image problem is downgraded to keeping `bytes` as-is.
pub fn normalize_attachment(
    file_name: &str,
    content_type: Option<&str>,
    bytes: Vec<u8>,
    max_dimension: u32,
) -> Attachment {
    let content_type = content_type
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string();

    if !content_type.to_ascii_lowercase().starts_with("image/") {
        return raw(file_name, content_type, bytes, None);
    }

    let (format, width, height) = match probe(&bytes) {
        Ok(probed) => probed,
        Err(e) => {
            warn!(file = %file_name, error = %e, "Image probe failed, storing raw bytes");
            return raw(file_name, content_type, bytes, None);
        }
    };

    if width <= max_dimension && height <= max_dimension {
        return raw(file_name, content_type, bytes, Some((width, height)));
    }

    match downscale(&bytes, format, max_dimension) {
        Ok((resized, dims)) => {
            debug!(
                file = %file_name,
                from = ?(width, height),
                to = ?dims,
                "Downscaled image attachment"
            );
            raw(file_name, content_type, resized, Some(dims))
        }
        Err(e) => {
            warn!(file = %file_name, error = %e, "Image resize failed, storing raw bytes");
            raw(file_name, content_type, bytes, Some((width, height)))
        }
    }
}

fn raw(
    file_name: &str,
    content_type: String,
    bytes: Vec<u8>,
    dimensions: Option<(u32, u32)>,
) -> Attachment {
    Attachment {
        file_name: file_name.to_string(),
        content_type,
        bytes,
        dimensions,
    }
}

/// Reads the format and dimensions from the header without a full decode.
fn probe(bytes: &[u8]) -> anyhow::Result<(ImageFormat, u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| anyhow::anyhow!("unrecognized image format"))?;
    let (width, height) = reader.into_dimensions()?;
    Ok((format, width, height))
}

fn downscale(
    bytes: &[u8],
    format: ImageFormat,
    max_dimension: u32,
) -> image::ImageResult<(Vec<u8>, (u32, u32))> {
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let resized = decoded.resize(max_dimension, max_dimension, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, format)?;
    Ok((out.into_inner(), (resized.width(), resized.height())))
}
