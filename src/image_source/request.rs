//! # 请求模型
//!
//! ## 设计思路
//!
//! 请求参数与结果均为不可变值：
//! - `ImageRequestOptions` 描述目标尺寸、交付模式与下载生命周期回调
//! - `ImageRequestResult<T>` 携带图片、是否为降级预览、请求 ID
//!
//! 输出图片类型由调用方通过 `FromDecodedImage` 选择，核心逻辑不绑定具体 UI 图片类型。

use std::fmt;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView, RgbImage, RgbaImage};

/// 请求标识。进程内唯一、单调递增，用于事后取消。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageRequestId(u64);

impl ImageRequestId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 像素尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 长边像素数，缩略图的最大像素约束取该值。
    pub fn max_dimension(self) -> u32 {
        self.width.max(self.height)
    }
}

/// 目标尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageSizeOption {
    #[default]
    FullResolution,
    FillSize(ImageSize),
    FitSize(ImageSize),
}

/// 交付模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// 仅交付最终结果。
    #[default]
    Best,
    /// 若有预览图，先交付一次降级结果，再交付最终结果。
    Progressive,
}

/// 下载生命周期回调（仅网络资源触发）。
pub type LifecycleHook = Arc<dyn Fn() + Send + Sync>;

/// 请求结果回调。渐进模式下同一回调可能被调用两次，因此为 `Fn`。
pub type ResultHandler<T> = Arc<dyn Fn(ImageRequestResult<T>) + Send + Sync>;

/// 图片请求参数。
#[derive(Clone, Default)]
pub struct ImageRequestOptions {
    pub size: ImageSizeOption,
    pub delivery_mode: DeliveryMode,
    pub on_download_start: Option<LifecycleHook>,
    pub on_download_finish: Option<LifecycleHook>,
}

impl ImageRequestOptions {
    pub fn new(size: ImageSizeOption, delivery_mode: DeliveryMode) -> Self {
        Self {
            size,
            delivery_mode,
            on_download_start: None,
            on_download_finish: None,
        }
    }

    pub fn full_resolution() -> Self {
        Self::new(ImageSizeOption::FullResolution, DeliveryMode::Best)
    }

    pub fn with_download_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_download_start = Some(Arc::new(hook));
        self
    }

    pub fn with_download_finish(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_download_finish = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ImageRequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequestOptions")
            .field("size", &self.size)
            .field("delivery_mode", &self.delivery_mode)
            .field("on_download_start", &self.on_download_start.is_some())
            .field("on_download_finish", &self.on_download_finish.is_some())
            .finish()
    }
}

/// 一次交付。`image` 为 `None` 表示解码失败。
#[derive(Debug, Clone)]
pub struct ImageRequestResult<T> {
    pub image: Option<T>,
    pub degraded: bool,
    pub request_id: ImageRequestId,
}

/// 可由解码后的图片构造的输出类型。
pub trait FromDecodedImage: Send + 'static {
    fn from_decoded_image(image: DynamicImage) -> Self;
}

impl FromDecodedImage for DynamicImage {
    fn from_decoded_image(image: DynamicImage) -> Self {
        image
    }
}

impl FromDecodedImage for RgbaImage {
    fn from_decoded_image(image: DynamicImage) -> Self {
        image.into_rgba8()
    }
}

impl FromDecodedImage for RgbImage {
    fn from_decoded_image(image: DynamicImage) -> Self {
        image.into_rgb8()
    }
}

impl FromDecodedImage for ImageSize {
    fn from_decoded_image(image: DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }
}
