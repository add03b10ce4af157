//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义 crate 级统一的 `PickerError` 枚举，承载图片链路之外的失败来源
//! （配置持久化、文件 I/O、服务启动），替代分散的 `.map_err(|e| e.to_string())`。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ImageError`、`std::io::Error`、`serde_json::Error` 提供 `From` 转换，无需手动 map。

use crate::image_source::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum PickerError {
    /// 图片请求链路错误（加载 / 解码 / 编码）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 配置序列化 / 反序列化失败
    #[error("配置错误: {0}")]
    Config(#[from] serde_json::Error),

    /// 服务启动失败（运行时、线程创建等）
    #[error("服务启动失败: {0}")]
    Startup(String),
}
