//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImageSourceConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中性能档位（quality / balanced / speed）作为高层语义，映射到底层参数组合。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的平衡配置。
//! - `validate` 在服务启动前统一做区间校验。
//! - 配置以 JSON 持久化；文件缺失或损坏时回退默认值，不阻断启动。
//! - `ImagePerformanceProfile` 负责档位字符串解析与反向输出。

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::ImageError;

/// 缩略图降采样滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }

    pub(crate) fn to_fast_filter(self) -> fast_image_resize::FilterType {
        match self {
            Self::Nearest => fast_image_resize::FilterType::Box,
            Self::Triangle => fast_image_resize::FilterType::Bilinear,
            Self::CatmullRom => fast_image_resize::FilterType::CatmullRom,
            Self::Lanczos3 => fast_image_resize::FilterType::Lanczos3,
        }
    }
}

/// 图片源配置。
///
/// 字段覆盖下载、解码、缩略图、缓存与导出五个阶段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSourceConfig {
    /// 下载/读取原始字节时允许的最大文件体积（字节）。
    pub max_file_size: u64,
    /// 网络下载总超时（秒）。
    pub download_timeout: u64,
    /// 建立连接超时（秒）。
    pub connect_timeout: u64,
    /// 下载首包超时（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 最大重定向次数。
    pub max_redirects: usize,
    /// 是否允许访问内网或本地地址。
    pub allow_private_network: bool,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 同时运行的图片请求数上限。
    pub max_concurrent_requests: usize,
    /// 请求运行时的工作线程数。
    pub worker_threads: usize,
    /// 内存缓存条目上限。
    pub memory_cache_capacity: usize,
    /// 内存缓存像素数据总字节上限。
    pub memory_cache_max_bytes: u64,
    /// 磁盘缓存目录；`None` 表示关闭磁盘缓存。
    pub disk_cache_dir: Option<PathBuf>,
    /// 磁盘缓存最长保留时间（秒）。
    pub disk_cache_max_age_secs: u64,
    /// 全尺寸导出的 JPEG 质量（1~100）。
    pub jpeg_quality: u8,
    /// 缩略图降采样滤镜。
    pub resize_filter: ResizeFilter,
}

impl Default for ImageSourceConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            download_timeout: 30,
            connect_timeout: 8,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_redirects: 5,
            allow_private_network: false,
            max_decoded_pixels: 40_000_000,
            max_concurrent_requests: 4,
            worker_threads: 2,
            memory_cache_capacity: 64,
            memory_cache_max_bytes: 256 * 1024 * 1024,
            disk_cache_dir: None,
            disk_cache_max_age_secs: 7 * 24 * 60 * 60,
            jpeg_quality: 90,
            resize_filter: ResizeFilter::Triangle,
        }
    }
}

impl ImageSourceConfig {
    /// 从 JSON 文件加载配置；文件不存在或解析失败时回退默认值。
    pub fn load_from_path(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("⚠️ 配置文件解析失败，使用默认配置：{} ({})", path.display(), err);
                Self::default()
            }
        }
    }

    /// 以格式化 JSON 写入配置文件。
    pub fn save_to_path(&self, path: &Path) -> Result<(), crate::error::PickerError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 区间校验。
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.max_file_size < 1024 {
            return Err(ImageError::InvalidFormat("max_file_size 不能小于 1KB".to_string()));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(ImageError::InvalidFormat(
                "connect_timeout 必须在 1~120 秒之间".to_string(),
            ));
        }
        if !(1..=600).contains(&self.download_timeout) {
            return Err(ImageError::InvalidFormat(
                "download_timeout 必须在 1~600 秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_first_byte_timeout_ms) {
            return Err(ImageError::InvalidFormat(
                "stream_first_byte_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_chunk_timeout_ms) {
            return Err(ImageError::InvalidFormat(
                "stream_chunk_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if self.max_decoded_pixels == 0 {
            return Err(ImageError::InvalidFormat("max_decoded_pixels 不能为 0".to_string()));
        }
        if !(1..=64).contains(&self.max_concurrent_requests) {
            return Err(ImageError::InvalidFormat(
                "max_concurrent_requests 必须在 1~64 之间".to_string(),
            ));
        }
        if !(1..=64).contains(&self.worker_threads) {
            return Err(ImageError::InvalidFormat("worker_threads 必须在 1~64 之间".to_string()));
        }
        if self.memory_cache_capacity == 0 {
            return Err(ImageError::InvalidFormat(
                "memory_cache_capacity 不能为 0".to_string(),
            ));
        }
        if self.memory_cache_max_bytes < 1024 * 1024 {
            return Err(ImageError::InvalidFormat(
                "memory_cache_max_bytes 不能小于 1MB".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ImageError::InvalidFormat("jpeg_quality 必须在 1~100 之间".to_string()));
        }

        Ok(())
    }

    /// 基于当前参数反推性能档位。
    pub fn infer_performance_profile(&self) -> ImagePerformanceProfile {
        match self.resize_filter {
            ResizeFilter::Lanczos3 | ResizeFilter::CatmullRom if self.jpeg_quality >= 95 => {
                ImagePerformanceProfile::Quality
            }
            ResizeFilter::Nearest => ImagePerformanceProfile::Speed,
            _ if self.jpeg_quality <= 80 => ImagePerformanceProfile::Speed,
            _ => ImagePerformanceProfile::Balanced,
        }
    }

    /// 应用指定性能档位到实际参数。
    pub fn apply_performance_profile(&mut self, profile: ImagePerformanceProfile) {
        match profile {
            ImagePerformanceProfile::Quality => {
                self.resize_filter = ResizeFilter::Lanczos3;
                self.jpeg_quality = 95;
                self.max_decoded_pixels = 80_000_000;
            }
            ImagePerformanceProfile::Balanced => {
                self.resize_filter = ResizeFilter::Triangle;
                self.jpeg_quality = 90;
                self.max_decoded_pixels = 40_000_000;
            }
            ImagePerformanceProfile::Speed => {
                self.resize_filter = ResizeFilter::Nearest;
                self.jpeg_quality = 80;
                self.max_decoded_pixels = 24_000_000;
            }
        }
    }
}

/// 图片性能档位（面向产品/用户语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与性能平衡
/// - `Speed`：优先速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePerformanceProfile {
    Quality,
    Balanced,
    Speed,
}

impl ImagePerformanceProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use media_picker::image_source::ImagePerformanceProfile;
    ///
    /// let p = ImagePerformanceProfile::parse("balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), media_picker::image_source::ImageError>(())
    /// ```
    pub fn parse(profile: &str) -> Result<Self, ImageError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ImageError::InvalidFormat(format!(
                "未知性能档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    /// 将档位输出为稳定字符串。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}
