//! # 共享服务（可注入状态）
//!
//! ## 设计思路
//!
//! 使用 `SharedImageServices` 承载所有图片源共享的进程级资源，替代全局单例：
//! - ID 生成器与请求队列
//! - tokio 运行时（执行下载与解码）
//! - 回调上下文（概念上的 UI 主线程）与独立的重编码上下文
//! - 图片缓存与加载器
//!
//! 由宿主在启动时显式创建一次，再以 `Arc` 注入每个图片源；测试可创建相互隔离的实例。
//!
//! ## 实现思路
//!
//! `SharedImageServicesBuilder` 允许替换回调队列与加载器，其余部分按配置组装。
//! 运行时在 `Drop` 中以 `shutdown_background` 关闭，不阻塞调用方线程。

use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};

use super::cache::ImageCache;
use super::dispatch::{DispatchQueue, SerialQueue};
use super::id_generator::ThreadSafeIdGenerator;
use super::loader::{DefaultImageLoader, ImageLoader};
use super::operation::OperationContext;
use super::queue::RequestQueue;
use super::request::ImageRequestId;
use super::{ImagePerformanceProfile, ImageSourceConfig};
use crate::error::PickerError;

pub const CALLBACK_QUEUE_LABEL: &str = "media-picker-main";
pub const PROCESSING_QUEUE_LABEL: &str = "media-picker-processing";
const WORKER_THREAD_NAME: &str = "media-picker-worker";

/// 所有图片源共享的服务集合。
pub struct SharedImageServices {
    runtime: Option<Runtime>,
    handle: Handle,
    config: Arc<ImageSourceConfig>,
    id_generator: ThreadSafeIdGenerator,
    queue: RequestQueue,
    cache: Arc<ImageCache>,
    loader: Arc<dyn ImageLoader>,
    callback_queue: Arc<dyn DispatchQueue>,
    processing_queue: Arc<dyn DispatchQueue>,
}

impl SharedImageServices {
    /// 使用默认配置创建服务。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use media_picker::image_source::SharedImageServices;
    ///
    /// let services = SharedImageServices::new()?;
    /// # Ok::<(), media_picker::error::PickerError>(())
    /// ```
    pub fn new() -> Result<Self, PickerError> {
        Self::builder(ImageSourceConfig::default()).build()
    }

    /// 使用自定义配置创建服务。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use media_picker::image_source::{ImageSourceConfig, SharedImageServices};
    ///
    /// let mut config = ImageSourceConfig::default();
    /// config.max_concurrent_requests = 2;
    /// let services = SharedImageServices::with_config(config)?;
    /// # Ok::<(), media_picker::error::PickerError>(())
    /// ```
    pub fn with_config(config: ImageSourceConfig) -> Result<Self, PickerError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ImageSourceConfig) -> SharedImageServicesBuilder {
        SharedImageServicesBuilder {
            config,
            callback_queue: None,
            loader: None,
        }
    }

    pub fn config(&self) -> &ImageSourceConfig {
        &self.config
    }

    pub fn performance_profile(&self) -> ImagePerformanceProfile {
        self.config.infer_performance_profile()
    }

    pub fn next_request_id(&self) -> ImageRequestId {
        ImageRequestId::new(self.id_generator.next_id())
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    pub fn callback_queue(&self) -> &Arc<dyn DispatchQueue> {
        &self.callback_queue
    }

    pub fn processing_queue(&self) -> &Arc<dyn DispatchQueue> {
        &self.processing_queue
    }

    pub fn runtime_handle(&self) -> &Handle {
        &self.handle
    }

    /// 在回调上下文上执行任务。
    pub fn dispatch_callback(&self, job: impl FnOnce() + Send + 'static) {
        self.callback_queue.dispatch(Box::new(job));
    }

    pub fn operation_context(&self) -> OperationContext {
        OperationContext {
            config: Arc::clone(&self.config),
            loader: Arc::clone(&self.loader),
            cache: Arc::clone(&self.cache),
            callback_queue: Arc::clone(&self.callback_queue),
        }
    }
}

impl Drop for SharedImageServices {
    fn drop(&mut self) {
        self.queue.cancel_all();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        log::debug!("🛑 图片共享服务已关闭");
    }
}

/// `SharedImageServices` 的构建器。
pub struct SharedImageServicesBuilder {
    config: ImageSourceConfig,
    callback_queue: Option<Arc<dyn DispatchQueue>>,
    loader: Option<Arc<dyn ImageLoader>>,
}

impl SharedImageServicesBuilder {
    /// 替换回调上下文，例如接入宿主 UI 框架的主循环。
    pub fn callback_queue(mut self, queue: Arc<dyn DispatchQueue>) -> Self {
        self.callback_queue = Some(queue);
        self
    }

    /// 替换原始字节加载器。
    pub fn loader(mut self, loader: Arc<dyn ImageLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn build(self) -> Result<SharedImageServices, PickerError> {
        let config = self.config;
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| PickerError::Startup(format!("无法创建 tokio 运行时：{}", e)))?;
        let handle = runtime.handle().clone();

        let cache = Arc::new(ImageCache::new(&config)?);

        let loader: Arc<dyn ImageLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(
                DefaultImageLoader::new(config.clone(), handle.clone())?
                    .with_cache(Arc::clone(&cache)),
            ),
        };

        let callback_queue: Arc<dyn DispatchQueue> = match self.callback_queue {
            Some(queue) => queue,
            None => Arc::new(SerialQueue::spawn(CALLBACK_QUEUE_LABEL)?),
        };
        let processing_queue: Arc<dyn DispatchQueue> =
            Arc::new(SerialQueue::spawn(PROCESSING_QUEUE_LABEL)?);

        let queue = RequestQueue::new(handle.clone(), config.max_concurrent_requests);

        log::info!(
            "🚀 图片共享服务已启动 - 工作线程: {} 最大并发: {} 档位: {}",
            config.worker_threads,
            config.max_concurrent_requests,
            config.infer_performance_profile().as_str()
        );

        Ok(SharedImageServices {
            runtime: Some(runtime),
            handle,
            config: Arc::new(config),
            id_generator: ThreadSafeIdGenerator::new(),
            queue,
            cache,
            loader,
            callback_queue,
            processing_queue,
        })
    }
}
