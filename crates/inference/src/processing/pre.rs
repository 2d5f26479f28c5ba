use crate::config::DEFAULT_INPUT_SIZE;
use common::span;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use image::RgbImage;
use ndarray::Array4;

pub const LETTERBOX_COLOR: u8 = 114;
pub const DEFAULT_STRIDE: u32 = 32;

/// Mapping between source-image pixels and letterboxed network-input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl TransformParams {
    /// Identity mapping, for outputs already expressed in source pixels.
    pub fn identity(width: u32, height: u32) -> Self {
        Self {
            orig_width: width,
            orig_height: height,
            input_width: width,
            input_height: height,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Undo the letterbox: remove padding, divide by scale, clip to the source image.
    ///
    /// Non-finite coordinates pass through unclipped so the normalizer can reject them.
    pub fn to_source(&self, [x1, y1, x2, y2]: [f32; 4]) -> [f32; 4] {
        let w = self.orig_width as f32;
        let h = self.orig_height as f32;
        [
            clip((x1 - self.offset_x) / self.scale, w),
            clip((y1 - self.offset_y) / self.scale, h),
            clip((x2 - self.offset_x) / self.scale, w),
            clip((y2 - self.offset_y) / self.scale, h),
        ]
    }

    /// Forward mapping, source pixels to input pixels.
    pub fn to_input(&self, [x1, y1, x2, y2]: [f32; 4]) -> [f32; 4] {
        [
            x1 * self.scale + self.offset_x,
            y1 * self.scale + self.offset_y,
            x2 * self.scale + self.offset_x,
            y2 * self.scale + self.offset_y,
        ]
    }

    pub fn orig_shape(&self) -> (u32, u32) {
        (self.orig_height, self.orig_width)
    }
}

fn clip(value: f32, max: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, max)
    } else {
        value
    }
}

/// Aspect-preserving resize onto a square, padded canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Letterbox {
    input_size: u32,
    stride: u32,
}

impl Letterbox {
    /// `input_size` is rounded up to the next multiple of `stride`.
    pub fn new(input_size: u32, stride: u32) -> Self {
        let stride = stride.max(1);
        let input_size = input_size.max(stride).div_ceil(stride) * stride;
        Self { input_size, stride }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Letterbox `image` and return the NCHW RGB tensor scaled to `[0, 1]`.
    pub fn apply(&self, image: &RgbImage) -> anyhow::Result<(Array4<f32>, TransformParams)> {
        let _s = span!("letterbox");

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            anyhow::bail!("Cannot letterbox an empty {width}x{height} image");
        }

        let size = self.input_size;
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);

        let offset_x = (size - new_width) / 2;
        let offset_y = (size - new_height) / 2;

        let src = Image::from_vec_u8(width, height, image.as_raw().clone(), PixelType::U8x3)?;
        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        let mut canvas = vec![LETTERBOX_COLOR; (size * size * 3) as usize];
        let resized_data = resized.buffer();
        let row_bytes = (new_width * 3) as usize;

        for y in 0..new_height {
            let src_row = (y * new_width * 3) as usize;
            let dst_row = ((y + offset_y) * size * 3 + offset_x * 3) as usize;
            canvas[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        let transform = TransformParams {
            orig_width: width,
            orig_height: height,
            input_width: size,
            input_height: size,
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        };

        Ok((to_nchw(&canvas, size as usize, size as usize)?, transform))
    }

    /// Padding-only frame fed to a freshly loaded model during warm-up.
    pub fn blank_input(&self) -> anyhow::Result<Array4<f32>> {
        let size = self.input_size as usize;
        let canvas = vec![LETTERBOX_COLOR; size * size * 3];
        to_nchw(&canvas, size, size)
    }
}

impl Default for Letterbox {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE, DEFAULT_STRIDE)
    }
}

fn to_nchw(interleaved: &[u8], width: usize, height: usize) -> anyhow::Result<Array4<f32>> {
    let spatial = width * height;
    let mut output = vec![0.0f32; 3 * spatial];

    for (i, px) in interleaved.chunks_exact(3).enumerate() {
        output[i] = px[0] as f32 / 255.0;
        output[i + spatial] = px[1] as f32 / 255.0;
        output[i + 2 * spatial] = px[2] as f32 / 255.0;
    }

    Ok(Array4::from_shape_vec((1, 3, height, width), output)?)
}
