//! Drawing the classified face onto a copy of the input.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use emotion_core::{EmotionDetection, FaceBox, Frame};
use image::{DynamicImage, Rgb};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut},
    rect::Rect,
};

/// One outline color per label index, cycling for larger tables.
const PALETTE: [[u8; 3]; 7] = [
    [220, 40, 40],
    [120, 160, 40],
    [140, 60, 200],
    [250, 200, 20],
    [40, 90, 220],
    [250, 120, 20],
    [180, 180, 180],
];

const TAG_HEIGHT: u32 = 6;

pub fn label_color(label_index: usize) -> Rgb<u8> {
    Rgb(PALETTE[label_index % PALETTE.len()])
}

/// Outline `detection.face_box` on the frame and save the result as `output_path`.
///
/// A solid tag above the box carries the label color.
pub fn annotate_frame(
    frame: &Frame,
    detection: &EmotionDetection,
    label_index: usize,
    output_path: &Path,
) -> Result<PathBuf> {
    let mut image = frame.to_rgb_image();
    let color = label_color(label_index);

    if let Some(rect) = rect_from_face_box(&detection.face_box) {
        draw_hollow_rect_mut(&mut image, rect, color);
        if let Some(inner) = shrink(&detection.face_box) {
            draw_hollow_rect_mut(&mut image, inner, color);
        }
        let face = detection.face_box;
        let tag_top = face.y.saturating_sub(TAG_HEIGHT);
        let tag_height = (face.y - tag_top).max(1);
        draw_filled_rect_mut(
            &mut image,
            Rect::at(face.x as i32, tag_top as i32).of_size(face.width, tag_height),
            color,
        );
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    DynamicImage::ImageRgb8(image)
        .save(output_path)
        .with_context(|| format!("failed to save annotated image {}", output_path.display()))?;

    Ok(output_path.to_path_buf())
}

fn rect_from_face_box(face: &FaceBox) -> Option<Rect> {
    (!face.is_empty()).then(|| Rect::at(face.x as i32, face.y as i32).of_size(face.width, face.height))
}

/// The box one pixel inward, for a two-pixel outline.
fn shrink(face: &FaceBox) -> Option<Rect> {
    (face.width > 2 && face.height > 2).then(|| {
        Rect::at(face.x as i32 + 1, face.y as i32 + 1).of_size(face.width - 2, face.height - 2)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotion_core::{EmotionScores, LabelTable};
    use image::RgbImage;
    use tempfile::tempdir;

    #[test]
    fn outlines_face_in_label_color() {
        let frame = Frame::from_rgb_image(&RgbImage::from_pixel(40, 40, Rgb([0, 0, 0]))).unwrap();
        let labels = LabelTable::new(["calm", "joy"]).unwrap();
        let detection = EmotionDetection {
            label: "joy".into(),
            confidence: 0.9,
            scores: EmotionScores::from_probabilities(&labels, &[0.1, 0.9]).unwrap(),
            face_box: FaceBox {
                x: 10,
                y: 12,
                width: 20,
                height: 16,
            },
            face_confidence: 0.8,
        };

        let dir = tempdir().unwrap();
        let path = annotate_frame(&frame, &detection, 1, &dir.path().join("out/face.png")).unwrap();
        let saved = image::open(&path).unwrap().to_rgb8();

        assert_eq!(saved.dimensions(), (40, 40));
        assert_eq!(*saved.get_pixel(10, 12), label_color(1));
        assert_eq!(*saved.get_pixel(20, 6), label_color(1));
        assert_eq!(*saved.get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn palette_cycles() {
        assert_eq!(label_color(0), label_color(PALETTE.len()));
    }
}
