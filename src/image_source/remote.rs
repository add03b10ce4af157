//! # 图片源门面
//!
//! ## 设计思路
//!
//! `RemoteImageSource` 以 URL 为身份（相等性与哈希只看 URL），对外提供：
//! - `request_image`：按选项发起解码请求，渐进模式下先交付一次降级预览
//! - `image_size`：全尺寸解码测量尺寸，并在实例内记忆
//! - `full_resolution_image_data`：全尺寸解码后在独立的处理上下文重编码为 JPEG
//! - `cancel_request`：转发到共享请求队列
//!
//! 所有结果都在回调上下文上交付。预览只同步查询内存缓存，磁盘缓存命中需要解码，
//! 由渐进请求在工作线程上处理，调用方线程不做解码。
//! 测量尺寸与导出 JPEG 的全尺寸结果不写入内存缓存。
//!
//! ## 实现思路
//!
//! 记忆化尺寸放在 `Arc<OnceCell<_>>` 中，结果回调只持有这份共享单元而不持有图片源本身，
//! 因此回调不会延长共享服务的生命周期；首个成功写入者胜出，之后的读取永远返回同一个值。

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use image::DynamicImage;
use once_cell::sync::OnceCell;

use super::operation::ImageRequestOperation;
use super::pipeline;
use super::request::{
    DeliveryMode, FromDecodedImage, ImageRequestId, ImageRequestOptions, ImageRequestResult,
    ImageSize, ResultHandler,
};
use super::service::SharedImageServices;
use super::source::ImageUrl;

/// 基于 URL 的图片源。
pub struct RemoteImageSource {
    url: ImageUrl,
    preview: Option<Arc<DynamicImage>>,
    size: Arc<OnceCell<ImageSize>>,
    services: Arc<SharedImageServices>,
}

impl RemoteImageSource {
    pub fn new(url: ImageUrl, services: Arc<SharedImageServices>) -> Self {
        Self {
            url,
            preview: None,
            size: Arc::new(OnceCell::new()),
            services,
        }
    }

    /// 附带一张预先提供的预览图（例如列表中已有的缩略图）。
    pub fn with_preview(url: ImageUrl, preview: DynamicImage, services: Arc<SharedImageServices>) -> Self {
        Self {
            preview: Some(Arc::new(preview)),
            ..Self::new(url, services)
        }
    }

    pub fn url(&self) -> &ImageUrl {
        &self.url
    }

    /// 可立即使用的预览：构造时提供的优先，其次查询内存缓存。
    ///
    /// 磁盘缓存需要解码，不在这里同步查询，而是由渐进请求在工作线程上处理。
    pub fn preview_image(&self) -> Option<Arc<DynamicImage>> {
        self.preview
            .clone()
            .or_else(|| self.services.cache().memory_image(&self.url))
    }

    /// 已记忆的尺寸。
    pub fn cached_size(&self) -> Option<ImageSize> {
        self.size.get().copied()
    }

    /// 发起图片请求，同步返回请求 ID。
    ///
    /// 渐进模式且存在预览时，先在回调上下文交付一次 `degraded = true` 的结果，再入队真正的请求。
    pub fn request_image<T, F>(&self, options: ImageRequestOptions, handler: F) -> ImageRequestId
    where
        T: FromDecodedImage,
        F: Fn(ImageRequestResult<T>) + Send + Sync + 'static,
    {
        self.submit(options, Arc::new(handler), true)
    }

    fn submit<T: FromDecodedImage>(
        &self,
        options: ImageRequestOptions,
        handler: ResultHandler<T>,
        store_in_cache: bool,
    ) -> ImageRequestId {
        let id = self.services.next_request_id();
        let progressive = options.delivery_mode == DeliveryMode::Progressive;

        let mut operation = ImageRequestOperation::new(
            id,
            self.url.clone(),
            options,
            handler,
            self.services.operation_context(),
        );
        if !store_in_cache {
            operation = operation.without_caching();
        }

        let preview = if progressive { self.preview_image() } else { None };
        if progressive && preview.is_none() && self.services.cache().has_disk_cache() {
            operation = operation.with_disk_preview();
        }
        let operation = Arc::new(operation);

        if let Some(preview) = preview {
            log::debug!("🖼️ 交付降级预览 - 请求: {} URL: {}", id, self.url.redacted());
            operation.deliver(Some(T::from_decoded_image((*preview).clone())), true);
        }

        if let Err(err) = self.services.queue().enqueue(operation.clone()) {
            log::error!("❌ 图片请求入队失败 - 请求: {} 错误: {}", id, err);
            operation.deliver(None, false);
        }

        id
    }

    /// 取消请求。未知或已完成的 ID 不做任何事。
    pub fn cancel_request(&self, id: ImageRequestId) -> bool {
        self.services.queue().cancel(id)
    }

    /// 获取图片尺寸。已记忆时直接在回调上下文交付并返回 `None`，否则返回测量请求的 ID。
    pub fn image_size<F>(&self, completion: F) -> Option<ImageRequestId>
    where
        F: FnOnce(Option<ImageSize>) + Send + 'static,
    {
        if let Some(size) = self.cached_size() {
            self.services.dispatch_callback(move || completion(Some(size)));
            return None;
        }

        let memo = Arc::clone(&self.size);
        let completion = Mutex::new(Some(completion));

        let handler: ResultHandler<ImageSize> = Arc::new(move |result: ImageRequestResult<ImageSize>| {
            let size = result.image.map(|measured| *memo.get_or_init(|| measured));
            if let Some(completion) = take_once(&completion) {
                completion(size);
            }
        });
        let id = self.submit(ImageRequestOptions::full_resolution(), handler, false);

        Some(id)
    }

    /// 全尺寸解码后重编码为 JPEG 字节。解码或编码失败时交付 `None`。
    pub fn full_resolution_image_data<F>(&self, completion: F) -> ImageRequestId
    where
        F: FnOnce(Option<Vec<u8>>) + Send + 'static,
    {
        let processing_queue = Arc::clone(self.services.processing_queue());
        let callback_queue = Arc::clone(self.services.callback_queue());
        let quality = self.services.config().jpeg_quality;
        let redacted = self.url.redacted();
        let completion = Mutex::new(Some(completion));

        let handler: ResultHandler<DynamicImage> = Arc::new(
            move |result: ImageRequestResult<DynamicImage>| {
                let Some(completion) = take_once(&completion) else {
                    return;
                };

                let Some(image) = result.image else {
                    completion(None);
                    return;
                };

                let callback_queue = Arc::clone(&callback_queue);
                let redacted = redacted.clone();
                processing_queue.dispatch(Box::new(move || {
                    let data = match pipeline::encode_jpeg(&image, quality) {
                        Ok(bytes) => {
                            log::debug!("📦 JPEG 导出完成 - URL: {} 大小: {} bytes", redacted, bytes.len());
                            Some(bytes)
                        }
                        Err(err) => {
                            log::warn!("⚠️ JPEG 导出失败 - URL: {} 错误: {}", redacted, err);
                            None
                        }
                    };
                    callback_queue.dispatch(Box::new(move || completion(data)));
                }));
            },
        );

        self.submit(ImageRequestOptions::full_resolution(), handler, false)
    }
}

fn take_once<F>(slot: &Mutex<Option<F>>) -> Option<F> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

impl PartialEq for RemoteImageSource {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for RemoteImageSource {}

impl Hash for RemoteImageSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl fmt::Debug for RemoteImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteImageSource")
            .field("url", &self.url.redacted())
            .field("has_preview", &self.preview.is_some())
            .field("size", &self.size.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_source::operation::tests::{FixedLoader, InlineQueue};
    use crate::image_source::pipeline::tests::create_png_bytes;
    use crate::image_source::{ImageSizeOption, ImageSourceConfig};
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::time::Duration;

    fn services_with(bytes: Option<Vec<u8>>) -> Arc<SharedImageServices> {
        Arc::new(
            SharedImageServices::builder(ImageSourceConfig::default())
                .loader(Arc::new(FixedLoader::new(bytes)))
                .build()
                .expect("service init failed"),
        )
    }

    fn url(s: &str) -> ImageUrl {
        ImageUrl::parse(s).expect("valid url")
    }

    #[test]
    fn equality_and_hash_follow_url_only() {
        let services = services_with(None);
        let a = RemoteImageSource::new(url("https://example.com/a.png"), Arc::clone(&services));
        let a_with_preview = RemoteImageSource::with_preview(
            url("https://example.com/a.png"),
            DynamicImage::new_rgba8(2, 2),
            Arc::clone(&services),
        );
        let b = RemoteImageSource::new(url("https://example.com/b.png"), Arc::clone(&services));

        assert_eq!(a, a_with_preview);
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(a_with_preview);
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn request_ids_increase_per_request() {
        let services = services_with(Some(create_png_bytes(4, 4)));
        let source = RemoteImageSource::new(url("file:///tmp/a.png"), services);

        let first = source.request_image(ImageRequestOptions::default(), |_: ImageRequestResult<ImageSize>| {});
        let second = source.request_image(ImageRequestOptions::default(), |_: ImageRequestResult<ImageSize>| {});
        assert!(second > first);
    }

    #[test]
    fn progressive_request_delivers_preview_before_final() {
        let services = services_with(Some(create_png_bytes(64, 32)));
        let source = RemoteImageSource::with_preview(
            url("https://example.com/p.png"),
            DynamicImage::new_rgba8(8, 4),
            services,
        );
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let id = source.request_image(
            ImageRequestOptions::new(ImageSizeOption::FullResolution, DeliveryMode::Progressive),
            move |result: ImageRequestResult<ImageSize>| {
                let _ = tx.lock().expect("lock").send((result.request_id, result.degraded, result.image));
            },
        );

        let first = rx.recv_timeout(Duration::from_secs(5)).expect("preview");
        let second = rx.recv_timeout(Duration::from_secs(5)).expect("final");

        assert_eq!(first, (id, true, Some(ImageSize::new(8, 4))));
        assert_eq!(second, (id, false, Some(ImageSize::new(64, 32))));
    }

    #[test]
    fn best_mode_skips_preview() {
        let services = services_with(Some(create_png_bytes(16, 16)));
        let source = RemoteImageSource::with_preview(
            url("https://example.com/best.png"),
            DynamicImage::new_rgba8(2, 2),
            services,
        );
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        source.request_image(ImageRequestOptions::default(), move |result: ImageRequestResult<ImageSize>| {
            let _ = tx.lock().expect("lock").send(result.degraded);
        });

        assert!(!rx.recv_timeout(Duration::from_secs(5)).expect("final"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn image_size_is_memoized() {
        let services = services_with(Some(create_png_bytes(30, 20)));
        let source = RemoteImageSource::new(url("file:///tmp/size.png"), services);
        let (tx, rx) = mpsc::channel();

        let tx_first = tx.clone();
        assert!(source.image_size(move |size| {
            let _ = tx_first.send(size);
        })
        .is_some());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).expect("size"),
            Some(ImageSize::new(30, 20))
        );

        assert_eq!(source.cached_size(), Some(ImageSize::new(30, 20)));
        assert!(source.image_size(move |size| {
            let _ = tx.send(size);
        })
        .is_none());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).expect("size"),
            Some(ImageSize::new(30, 20))
        );
    }

    #[test]
    fn full_resolution_data_is_jpeg_or_none() {
        let services = services_with(Some(create_png_bytes(24, 12)));
        let source = RemoteImageSource::new(url("file:///tmp/export.png"), services);
        let (tx, rx) = mpsc::channel();

        source.full_resolution_image_data(move |data| {
            let _ = tx.send(data);
        });

        let data = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("export")
            .expect("jpeg bytes");
        let decoded = image::load_from_memory(&data).expect("valid jpeg");
        assert_eq!((decoded.width(), decoded.height()), (24, 12));

        let broken = RemoteImageSource::new(url("file:///tmp/broken.png"), services_with(Some(b"nope".to_vec())));
        let (tx, rx) = mpsc::channel();
        broken.full_resolution_image_data(move |data| {
            let _ = tx.send(data);
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).expect("export").is_none());
    }

    #[test]
    fn cancel_unknown_request_is_noop() {
        let source = RemoteImageSource::new(url("https://example.com/x.png"), services_with(None));
        assert!(!source.cancel_request(ImageRequestId::new(12345)));
    }

    #[test]
    fn preview_falls_back_to_memory_cache() {
        let services = Arc::new(
            SharedImageServices::builder(ImageSourceConfig::default())
                .loader(Arc::new(FixedLoader::new(None)))
                .callback_queue(Arc::new(InlineQueue))
                .build()
                .expect("service init failed"),
        );
        let target = url("https://example.com/cached.png");
        services.cache().store_decoded(&target, DynamicImage::new_rgba8(5, 5));

        let source = RemoteImageSource::new(target, services);
        let preview = source.preview_image().expect("cached preview");
        assert_eq!((preview.width(), preview.height()), (5, 5));
    }

    #[test]
    fn measuring_and_exporting_leave_memory_cache_empty() {
        let services = services_with(Some(create_png_bytes(40, 30)));
        let target = url("https://example.com/measured.png");
        let source = RemoteImageSource::new(target.clone(), Arc::clone(&services));

        let (tx, rx) = mpsc::channel();
        source.image_size(move |size| {
            let _ = tx.send(size);
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).expect("size"),
            Some(ImageSize::new(40, 30))
        );

        let (tx, rx) = mpsc::channel();
        source.full_resolution_image_data(move |data| {
            let _ = tx.send(data.is_some());
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).expect("export"));

        assert!(services.cache().memory_image(&target).is_none());
    }

    #[test]
    fn disk_cached_preview_is_decoded_off_the_caller_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ImageSourceConfig::default();
        config.disk_cache_dir = Some(dir.path().to_path_buf());
        let services = Arc::new(
            SharedImageServices::builder(config)
                .loader(Arc::new(FixedLoader::new(Some(create_png_bytes(64, 32)))))
                .build()
                .expect("service init failed"),
        );
        let target = url("https://example.com/disk-preview.png");
        services.cache().write_bytes(&target, &create_png_bytes(16, 8));

        let source = RemoteImageSource::new(target, Arc::clone(&services));
        assert!(source.preview_image().is_none());

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        source.request_image(
            ImageRequestOptions::new(ImageSizeOption::FullResolution, DeliveryMode::Progressive),
            move |result: ImageRequestResult<ImageSize>| {
                let _ = tx.lock().expect("lock").send((result.degraded, result.image));
            },
        );

        let first = rx.recv_timeout(Duration::from_secs(5)).expect("preview");
        let second = rx.recv_timeout(Duration::from_secs(5)).expect("final");
        assert_eq!(first, (true, Some(ImageSize::new(16, 8))));
        assert_eq!(second, (false, Some(ImageSize::new(64, 32))));
    }
}
