pub mod draw;

use crate::backend::RawDetectionOutput;
use crate::names::ClassNameTable;
use crate::record::DetectionRecord;
use common::span;
use draw::{BOX_COLOR, draw_labeled_box};
use image::{Rgb, RgbImage};

/// Produce the annotated RGB frame for one request.
///
/// Variants with a native renderer draw from their own raw output; the
/// rest get each normalized record drawn in [`BOX_COLOR`].
pub fn annotate(
    image: &RgbImage,
    detections: &[DetectionRecord],
    raw: &RawDetectionOutput,
    names: &ClassNameTable,
) -> RgbImage {
    let _s = span!("annotate");

    let native = match raw {
        RawDetectionOutput::Primary(result) => Some(result.plot(image)),
        RawDetectionOutput::Hub(output) => Some(output.render(image, names)),
        RawDetectionOutput::Local(_) => None,
    };

    if let Some(render) = native {
        match render.into_rgb() {
            Some(annotated) => return annotated,
            None => tracing::warn!(variant = %raw.variant(), "Native render size mismatch, drawing manually"),
        }
    }

    draw_manual(image, detections)
}

/// Fixed-color boxes labelled `"{class_name} {confidence:.2}"`.
pub fn draw_manual(image: &RgbImage, detections: &[DetectionRecord]) -> RgbImage {
    let mut canvas = image.clone();
    for detection in detections {
        draw_labeled_box(
            &mut canvas,
            detection.bbox().into(),
            &detection.label(),
            BOX_COLOR,
            Rgb([0, 0, 0]),
        );
    }
    canvas
}
