//! Turning inputs into frames. Failures here become `decode_error` records.

use std::{fs, io};

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use emotion_core::Frame;
use emotion_utils::{decode_image_bytes, load_image};

use crate::input::{InputTarget, is_stdin};

/// Drop a `data:<mime>;base64,` header if present.
///
/// Everything up to and including the first comma is discarded whenever the payload
/// starts with `data:`.
pub fn strip_data_url(payload: &str) -> &str {
    let trimmed = payload.trim();
    if trimmed.starts_with("data:")
        && let Some((_, body)) = trimmed.split_once(',')
    {
        return body.trim();
    }
    trimmed
}

/// Decode a base64 image payload into a frame.
pub fn decode_base64_frame(payload: &str) -> Result<Frame> {
    let body: String = strip_data_url(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    anyhow::ensure!(!body.is_empty(), "base64 payload is empty");
    let bytes = BASE64
        .decode(body.as_bytes())
        .context("payload is not valid base64")?;
    let image = decode_image_bytes(&bytes)?;
    Ok(Frame::from_dynamic_image(&image)?)
}

/// Read and decode the frame behind `target`.
pub fn load_frame(target: &InputTarget) -> Result<Frame> {
    match target {
        InputTarget::ImageFile(path) => {
            let image = load_image(path)?;
            Frame::from_dynamic_image(&image)
                .with_context(|| format!("unusable image {}", path.display()))
        }
        InputTarget::Base64Frame(path) => {
            let payload = if is_stdin(path) {
                io::read_to_string(io::stdin()).context("failed to read base64 frame from stdin")?
            } else {
                fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?
            };
            decode_base64_frame(&payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_base64() -> String {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, Rgb([10, 20, 30])));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        BASE64.encode(bytes)
    }

    #[test]
    fn strips_data_url_prefix() {
        assert_eq!(strip_data_url("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("  QUJD\n"), "QUJD");
        assert_eq!(strip_data_url("data:image/png;base64"), "data:image/png;base64");
    }

    #[test]
    fn decodes_plain_and_prefixed_payloads() {
        let encoded = png_base64();
        for payload in [encoded.clone(), format!("data:image/png;base64,{encoded}")] {
            let frame = decode_base64_frame(&payload).expect("decode");
            assert_eq!(frame.dimensions(), (6, 4));
            assert_eq!(frame.as_bgr()[[0, 0, 0]], 30);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_base64_frame("").is_err());
        assert!(decode_base64_frame("data:image/png;base64,").is_err());
        assert!(decode_base64_frame("!!!not base64!!!").is_err());
        assert!(decode_base64_frame(&BASE64.encode(b"plain text, not an image")).is_err());
    }
}
