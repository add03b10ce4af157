//! # 解码与方向校正流水线模块
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → 方向校正 → 缩略图”的过程集中管理，并在每个阶段边界检查取消标志。
//! 优先读取 header 尺寸做像素上限检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 取消检查 → 猜测格式并读取 header 尺寸 → 像素上限校验
//! 2. 读取 EXIF 方向并完整解码
//! 3. 取消检查 → 方向非 `NoTransforms` 时做像素级旋转/翻转
//! 4. 缩略图路径：取消检查 → 按长边约束重新生成缩略图（从不复用文件内嵌缩略图）
//! 5. 导出路径：JPEG 重编码（单帧、不保留元数据）

use std::io::Cursor;

use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageDecoder, ImageReader, Rgba};

use super::config::ResizeFilter;
use super::source::RawImageData;
use super::{ImageError, ImageSourceConfig};

/// 取消检查函数：返回 `true` 表示请求已被取消。
pub type CancelCheck<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// 阶段边界的取消检查点。
pub(crate) fn checkpoint(is_cancelled: CancelCheck<'_>, phase: &str) -> Result<(), ImageError> {
    if is_cancelled() {
        return Err(ImageError::Cancelled(format!("请求在{}被取消", phase)));
    }
    Ok(())
}

/// 全尺寸路径：解码并按 EXIF 方向校正。
pub(crate) fn decode_full_resolution(
    raw: &RawImageData,
    config: &ImageSourceConfig,
    is_cancelled: CancelCheck<'_>,
) -> Result<DynamicImage, ImageError> {
    checkpoint(is_cancelled, "解码前")?;
    let (image, orientation) = decode_with_orientation(raw, config)?;

    let image = if orientation == Orientation::NoTransforms {
        image
    } else {
        checkpoint(is_cancelled, "方向校正前")?;
        apply_orientation(image, orientation)
    };

    let (width, height) = image.dimensions();
    log::debug!(
        "🖼️ 全尺寸解码完成 - 来源: {} 尺寸: {}x{} 方向: {:?}",
        raw.source_hint,
        width,
        height,
        orientation
    );

    Ok(image)
}

/// 缩略图路径：解码、校正方向，并把长边约束到 `max_pixel_size`。
pub(crate) fn decode_thumbnail(
    raw: &RawImageData,
    max_pixel_size: u32,
    config: &ImageSourceConfig,
    is_cancelled: CancelCheck<'_>,
) -> Result<DynamicImage, ImageError> {
    checkpoint(is_cancelled, "解码前")?;
    let (image, orientation) = decode_with_orientation(raw, config)?;

    checkpoint(is_cancelled, "缩略图生成前")?;
    let image = apply_orientation(image, orientation);

    let (width, height) = image.dimensions();
    let (target_width, target_height) = thumbnail_dimensions((width, height), max_pixel_size);
    if (target_width, target_height) == (width, height) {
        return Ok(image);
    }

    log::debug!(
        "🧩 生成缩略图：{}x{} -> {}x{}（filter={:?}）",
        width,
        height,
        target_width,
        target_height,
        config.resize_filter
    );

    match resize_with_fast_image_resize(&image, target_width, target_height, config.resize_filter) {
        Ok(resized) => Ok(resized),
        Err(err) => {
            log::warn!("⚠️ fast_image_resize 降采样失败，回退 image::resize_exact：{}", err);
            Ok(image.resize_exact(
                target_width,
                target_height,
                config.resize_filter.to_image_filter(),
            ))
        }
    }
}

/// 以长边不超过 `max_pixel_size` 计算缩略图尺寸，不放大。
pub(crate) fn thumbnail_dimensions(source: (u32, u32), max_pixel_size: u32) -> (u32, u32) {
    let (width, height) = source;
    let bound = max_pixel_size.max(1);
    let longer = width.max(height);

    if longer <= bound {
        return source;
    }

    let scale = bound as f64 / longer as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, bound);

    if width >= height {
        (bound, scaled(height))
    } else {
        (scaled(width), bound)
    }
}

/// 重编码为 JPEG。JPEG 不支持透明通道，先转换为 RGB。
pub(crate) fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();

    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode_image(&rgb)
        .map_err(|e| ImageError::Encode(format!("JPEG 编码失败：{}", e)))?;

    Ok(buffer)
}

fn decode_with_orientation(
    raw: &RawImageData,
    config: &ImageSourceConfig,
) -> Result<(DynamicImage, Orientation), ImageError> {
    let reader = ImageReader::new(Cursor::new(raw.bytes.as_ref()))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| ImageError::InvalidFormat(format!("不支持的图片格式：{}", e)))?;

    let (header_width, header_height) = decoder.dimensions();
    validate_pixel_limits(config, header_width, header_height)?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let image = DynamicImage::from_decoder(decoder)
        .map_err(|e| ImageError::Decode(format!("图片解码失败：{}", e)))?;

    Ok((image, orientation))
}

fn apply_orientation(mut image: DynamicImage, orientation: Orientation) -> DynamicImage {
    image.apply_orientation(orientation);
    image
}

/// 校验像素数量是否超过配置上限。
fn validate_pixel_limits(
    config: &ImageSourceConfig,
    width: u32,
    height: u32,
) -> Result<(), ImageError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels == 0 {
        return Err(ImageError::Decode("图片尺寸为 0".to_string()));
    }

    if pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(())
}

fn resize_with_fast_image_resize(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
    filter: ResizeFilter,
) -> Result<DynamicImage, ImageError> {
    let src = image.to_rgba8();
    let (src_width, src_height) = src.dimensions();

    let src_image =
        fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
            .map_err(|e| ImageError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(filter.to_fast_filter()));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| ImageError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

    let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(
        target_width,
        target_height,
        dst_image.into_vec(),
    )
    .ok_or_else(|| ImageError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))?;

    Ok(DynamicImage::ImageRgba8(rgba))
}
