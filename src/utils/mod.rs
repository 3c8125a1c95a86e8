use burn::prelude::*;
use image::{DynamicImage, GrayImage, RgbImage};

use crate::error::TrainError;

/// Converts an image to planar CHW floats normalised to [-1, 1]. One channel
/// means luma, anything else is treated as RGB.
pub fn image_to_chw(image: &DynamicImage, channels: usize) -> Vec<f32> {
    let normalize = |value: u8| (value as f32 / 127.5) - 1.0;

    if channels == 1 {
        return image.to_luma8().pixels().map(|p| normalize(p[0])).collect();
    }

    let rgb = image.to_rgb8();
    let plane = (rgb.width() * rgb.height()) as usize;
    let mut data = vec![0.0; 3 * plane];
    for (i, pixel) in rgb.pixels().enumerate() {
        data[i] = normalize(pixel[0]);
        data[plane + i] = normalize(pixel[1]);
        data[2 * plane + i] = normalize(pixel[2]);
    }
    data
}

/// Inverse of [`image_to_chw`].
pub fn chw_to_image(
    data: &[f32],
    channels: usize,
    height: usize,
    width: usize,
) -> Option<DynamicImage> {
    let plane = height * width;
    if data.len() != channels * plane || (channels != 1 && channels != 3) {
        log::warn!(
            "Mismatched data length. Expected {}, got {}.",
            channels * plane,
            data.len()
        );
        return None;
    }

    // Reversing the normalization: (val + 1.0) * 127.5
    let denormalize = |val: f32| ((val + 1.0) * 127.5).clamp(0.0, 255.0) as u8;

    if channels == 1 {
        let raw: Vec<u8> = data.iter().map(|&v| denormalize(v)).collect();
        let buffer = GrayImage::from_raw(width as u32, height as u32, raw)?;
        return Some(DynamicImage::ImageLuma8(buffer));
    }

    let mut raw = Vec::with_capacity(3 * plane);
    for i in 0..plane {
        raw.push(denormalize(data[i]));
        raw.push(denormalize(data[plane + i]));
        raw.push(denormalize(data[2 * plane + i]));
    }
    let buffer = RgbImage::from_raw(width as u32, height as u32, raw)?;
    Some(DynamicImage::ImageRgb8(buffer))
}

/// Renders the first sample of a `[N, C, H, W]` batch.
pub fn tensor_to_image<B: Backend>(tensor: Tensor<B, 4>) -> Result<DynamicImage, TrainError> {
    let [_, channels, height, width] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| TrainError::Tensor(format!("{err:?}")))?;
    let first = &values[..channels * height * width];
    chw_to_image(first, channels, height, width).ok_or_else(|| {
        TrainError::Tensor(format!(
            "cannot render a {channels}x{height}x{width} tensor as an image"
        ))
    })
}
