//! # 图片请求操作
//!
//! ## 设计思路
//!
//! 一个 `ImageRequestOperation` 对应一次解码请求，是可取消的最小工作单元：
//! - 取消只设置原子标志，不打断正在执行的代码；工作线程在每个阶段边界检查该标志。
//! - 下载开始/结束回调只对网络资源触发，且包裹加载步骤本身，即使之后被取消也照常触发。
//! - 解码失败交付 `image = None`；被取消则静默不交付。
//!
//! ## 实现思路
//!
//! 0. 渐进请求且内存中没有预览：查询磁盘缓存，命中则先交付降级结果
//! 1. 网络资源：投递 `on_download_start`
//! 2. 加载原始字节（加载器内部在分块之间检查取消）
//! 3. 网络资源：投递 `on_download_finish`
//! 4. 按尺寸选项解码（全尺寸 / 缩略图），解码内部在阶段边界检查取消
//! 5. 成功结果写入内存缓存（仅测量尺寸或导出 JPEG 的请求除外）
//! 6. 交付前最后一次检查取消，然后投递到回调上下文

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::DynamicImage;

use super::cache::ImageCache;
use super::dispatch::DispatchQueue;
use super::loader::ImageLoader;
use super::pipeline;
use super::request::{
    FromDecodedImage, ImageRequestId, ImageRequestOptions, ImageRequestResult, ImageSizeOption,
    LifecycleHook, ResultHandler,
};
use super::source::ImageUrl;
use super::{ImageError, ImageSourceConfig};

/// 请求队列可调度的操作。
pub trait QueuedOperation: Send + Sync {
    fn id(&self) -> ImageRequestId;

    /// 在工作线程上同步执行。
    fn run(&self);

    /// 请求取消。幂等。
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// 操作执行所需的共享依赖。
#[derive(Clone)]
pub struct OperationContext {
    pub(crate) config: Arc<ImageSourceConfig>,
    pub(crate) loader: Arc<dyn ImageLoader>,
    pub(crate) cache: Arc<ImageCache>,
    pub(crate) callback_queue: Arc<dyn DispatchQueue>,
}

/// 单次图片请求。
pub struct ImageRequestOperation<T: FromDecodedImage> {
    id: ImageRequestId,
    url: ImageUrl,
    options: ImageRequestOptions,
    handler: ResultHandler<T>,
    cancelled: Arc<AtomicBool>,
    context: OperationContext,
    store_in_cache: bool,
    disk_preview: bool,
    _output: PhantomData<fn() -> T>,
}

impl<T: FromDecodedImage> ImageRequestOperation<T> {
    pub fn new(
        id: ImageRequestId,
        url: ImageUrl,
        options: ImageRequestOptions,
        handler: ResultHandler<T>,
        context: OperationContext,
    ) -> Self {
        Self {
            id,
            url,
            options,
            handler,
            cancelled: Arc::new(AtomicBool::new(false)),
            context,
            store_in_cache: true,
            disk_preview: false,
            _output: PhantomData,
        }
    }

    /// 结果只用于测量或导出时不写入内存缓存。
    pub(crate) fn without_caching(mut self) -> Self {
        self.store_in_cache = false;
        self
    }

    /// 开始加载前先在工作线程上查询磁盘缓存，命中则交付一次降级结果。
    pub(crate) fn with_disk_preview(mut self) -> Self {
        self.disk_preview = true;
        self
    }

    pub fn url(&self) -> &ImageUrl {
        &self.url
    }

    pub fn options(&self) -> &ImageRequestOptions {
        &self.options
    }

    /// 把一次交付投递到回调上下文。回调真正执行前若已取消，则丢弃。
    pub(crate) fn deliver(&self, image: Option<T>, degraded: bool) {
        let handler = Arc::clone(&self.handler);
        let cancelled = Arc::clone(&self.cancelled);
        let result = ImageRequestResult {
            image,
            degraded,
            request_id: self.id,
        };

        self.context.callback_queue.dispatch(Box::new(move || {
            if cancelled.load(Ordering::SeqCst) {
                log::debug!("🚫 请求已取消，丢弃交付 - 请求: {}", result.request_id);
                return;
            }
            handler(result);
        }));
    }

    fn deliver_disk_preview(&self) {
        if let Some(preview) = self.context.cache.cached_image(&self.url) {
            log::debug!("🖼️ 交付磁盘缓存预览 - 请求: {}", self.id);
            self.deliver(Some(T::from_decoded_image((*preview).clone())), true);
        }
    }

    fn fire_hook(&self, hook: Option<&LifecycleHook>) {
        if let Some(hook) = hook {
            let hook = Arc::clone(hook);
            self.context.callback_queue.dispatch(Box::new(move || hook()));
        }
    }

    fn load_and_decode(&self) -> Result<DynamicImage, ImageError> {
        let is_cancelled = || self.is_cancelled();
        let remote = self.url.is_remote();

        if remote {
            self.fire_hook(self.options.on_download_start.as_ref());
        }
        let loaded = self.context.loader.load(&self.url, &is_cancelled);
        if remote {
            self.fire_hook(self.options.on_download_finish.as_ref());
        }
        let raw = loaded?;

        let config = self.context.config.as_ref();
        match self.options.size {
            ImageSizeOption::FullResolution => {
                pipeline::decode_full_resolution(&raw, config, &is_cancelled)
            }
            ImageSizeOption::FillSize(size) | ImageSizeOption::FitSize(size) => {
                pipeline::decode_thumbnail(&raw, size.max_dimension(), config, &is_cancelled)
            }
        }
    }
}

impl<T: FromDecodedImage> QueuedOperation for ImageRequestOperation<T> {
    fn id(&self) -> ImageRequestId {
        self.id
    }

    fn run(&self) {
        if self.is_cancelled() {
            log::debug!("🚫 请求在开始前已取消 - 请求: {}", self.id);
            return;
        }

        if self.disk_preview {
            self.deliver_disk_preview();
        }

        log::debug!(
            "▶️ 开始处理图片请求 - 请求: {} URL: {} 选项: {:?}",
            self.id,
            self.url.redacted(),
            self.options.size
        );

        match self.load_and_decode() {
            Ok(image) => {
                if self.store_in_cache {
                    self.context.cache.store_decoded(&self.url, image.clone());
                }

                if pipeline::checkpoint(&|| self.is_cancelled(), "交付前").is_err() {
                    log::debug!("🚫 请求在交付前被取消 - 请求: {}", self.id);
                    return;
                }

                self.deliver(Some(T::from_decoded_image(image)), false);
            }
            Err(err) if err.is_cancelled() || self.is_cancelled() => {
                log::debug!("🚫 {} - 请求: {}", err, self.id);
            }
            Err(err) => {
                log::warn!(
                    "⚠️ 图片请求失败 - 请求: {} URL: {} 错误: [{}:{}] {}",
                    self.id,
                    self.url.redacted(),
                    err.stage(),
                    err.code(),
                    err
                );
                self.deliver(None, false);
            }
        }
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::debug!("🛑 取消图片请求 - 请求: {}", self.id);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
