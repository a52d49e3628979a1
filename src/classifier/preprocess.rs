// Image decoding and tensor preparation for the classifier input
use crate::error::{LesionError, Result};
use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;

/// Decode raw image bytes, mapping any failure to `ImageDecode`
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(LesionError::ImageDecode {
            reason: "image is empty".to_string(),
        });
    }
    image::load_from_memory(bytes).map_err(|e| LesionError::ImageDecode {
        reason: e.to_string(),
    })
}

/// Convert an image into a `(1, size, size, 3)` tensor with intensities in [0, 1]
pub fn to_input_tensor(image: &DynamicImage, size: usize, device: &Device) -> Result<Tensor> {
    let side = u32::try_from(size)
        .map_err(|_| LesionError::Inference(format!("Input size {} is too large", size)))?;
    let resized = image.resize_exact(side, side, FilterType::Triangle).to_rgb8();

    let data: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect();

    Ok(Tensor::from_vec(data, (1, size, size, 3), device)?)
}
