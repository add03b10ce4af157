//! # 图片源模块（image_source）
//!
//! ## 设计思路
//!
//! 该模块将“请求发起 → 排队调度 → 加载校验 → 解码与方向校正 → 回调交付”
//! 按职责拆分为多个子模块：
//!
//! - `remote`：对外门面 `RemoteImageSource`（以 URL 为身份）
//! - `service`：承载共享资源（`SharedImageServices`）
//! - `queue`：有界并发的请求队列，支持按 ID 取消
//! - `operation`：单次请求的可取消工作单元
//! - `loader`：文件 / Data URL / HTTP 加载与安全校验
//! - `pipeline`：解码、EXIF 方向校正、缩略图、JPEG 导出
//! - `cache`：内存 LRU + 磁盘缓存
//! - `dispatch`：回调上下文与串行队列
//! - `config/error/request/source/id_generator`：配置、错误、请求模型、地址模型、ID 生成
//!
//! ## 新同事快速上手
//!
//! ```text
//! RemoteImageSource::request_image
//!    ├─（渐进模式 + 有预览）回调上下文交付 degraded 结果
//!    ↓
//! RequestQueue::enqueue（信号量限流 + spawn_blocking）
//!    ↓
//! ImageRequestOperation::run
//!    ├─ loader.rs（网络资源前后触发下载开始/结束回调）
//!    ├─ pipeline.rs（取消检查点 + 解码 + 方向校正 / 缩略图）
//!    └─ cache.rs（写入内存缓存）
//!    ↓
//! 回调上下文交付最终结果（失败为 None，取消则不交付）
//! ```

mod cache;
mod config;
mod dispatch;
mod error;
mod id_generator;
mod loader;
mod operation;
mod pipeline;
mod queue;
mod remote;
mod request;
mod service;
mod source;

pub use cache::ImageCache;
pub use config::{ImagePerformanceProfile, ImageSourceConfig, ResizeFilter};
pub use dispatch::{DispatchQueue, Job, SerialQueue};
pub use error::ImageError;
pub use id_generator::ThreadSafeIdGenerator;
pub use loader::{DefaultImageLoader, ImageLoader};
pub use operation::{ImageRequestOperation, OperationContext, QueuedOperation};
pub use pipeline::CancelCheck;
pub use queue::RequestQueue;
pub use remote::RemoteImageSource;
pub use request::{
    DeliveryMode, FromDecodedImage, ImageRequestId, ImageRequestOptions, ImageRequestResult,
    ImageSize, ImageSizeOption, LifecycleHook, ResultHandler,
};
pub use service::{
    CALLBACK_QUEUE_LABEL, PROCESSING_QUEUE_LABEL, SharedImageServices, SharedImageServicesBuilder,
};
pub use source::{ImageUrl, RawImageData};
