use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::sync::LazyLock;

/// Box color of the manual renderer.
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: u32 = 2;
pub const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_PADDING: u32 = 2;

static LABEL_FONT: LazyLock<Option<FontRef<'static>>> = LazyLock::new(|| {
    match FontRef::try_from_slice(include_bytes!("../../assets/DejaVuSans.ttf")) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "Embedded label font is unreadable, labels drawn without text");
            None
        }
    }
});

/// Per-class colors used by the native renderers.
const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

pub fn palette_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Size of a rendered label including its background padding.
///
/// The height is the font's line height, so every label on a frame is the same height.
pub fn label_size(text: &str) -> (u32, u32) {
    let scale = PxScale::from(LABEL_FONT_SIZE);
    let (text_w, line_h) = match LABEL_FONT.as_ref() {
        Some(font) => (
            text_size(scale, font, text).0,
            font.as_scaled(scale).height().ceil() as u32,
        ),
        None => (0, LABEL_FONT_SIZE.ceil() as u32),
    };
    (text_w + 2 * LABEL_PADDING, line_h + 2 * LABEL_PADDING)
}

/// Hollow rectangle over `[x1, y1, x2, y2]`, clipped to the image.
pub fn draw_box(image: &mut RgbImage, xyxy: [f32; 4], color: Rgb<u8>, thickness: u32) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || xyxy.iter().any(|v| !v.is_finite()) {
        return;
    }

    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x1 = xyxy[0].clamp(0.0, max_x).round() as i32;
    let y1 = xyxy[1].clamp(0.0, max_y).round() as i32;
    let x2 = xyxy[2].clamp(0.0, max_x).round() as i32;
    let y2 = xyxy[3].clamp(0.0, max_y).round() as i32;

    for t in 0..thickness as i32 {
        let w = x2 - x1 + 1 - 2 * t;
        let h = y2 - y1 + 1 - 2 * t;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Filled label with its top-left corner at `(x, y)`.
pub fn draw_label(image: &mut RgbImage, x: i32, y: i32, text: &str, fg: Rgb<u8>, bg: Rgb<u8>) {
    let (label_w, label_h) = label_size(text);
    draw_filled_rect_mut(image, Rect::at(x, y).of_size(label_w, label_h), bg);

    if let Some(font) = LABEL_FONT.as_ref() {
        draw_text_mut(
            image,
            fg,
            x + LABEL_PADDING as i32,
            y + LABEL_PADDING as i32,
            PxScale::from(LABEL_FONT_SIZE),
            font,
            text,
        );
    }
}

/// Where a box label goes: just above the box's top-left corner, pushed down
/// to the top edge when there is no room and left so it stays inside the image.
pub fn label_origin(image: &RgbImage, xyxy: [f32; 4], text: &str) -> (i32, i32) {
    let (label_w, label_h) = label_size(text);
    let max_x = image.width() as i32 - label_w as i32;

    let x = (xyxy[0].round() as i32).min(max_x).max(0);
    let y = (xyxy[1].round() as i32 - label_h as i32).max(0);
    (x, y)
}

/// Box plus label above it, as used by every renderer.
pub fn draw_labeled_box(
    image: &mut RgbImage,
    xyxy: [f32; 4],
    text: &str,
    color: Rgb<u8>,
    text_color: Rgb<u8>,
) {
    draw_box(image, xyxy, color, BOX_THICKNESS);
    if xyxy.iter().all(|v| v.is_finite()) {
        let (x, y) = label_origin(image, xyxy, text);
        draw_label(image, x, y, text, text_color, color);
    }
}
