//! # 媒体选择器图片核心：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │               宿主界面（相册 / 相机 / 裁剪）              │
//! │                                                          │
//! │  photo_library ── 选择状态 + 界面事件                     │
//! │       │                                                  │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ 回调上下文（串行，概念上的 UI 主线程）
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            图片源核心                            │
//! │                                                          │
//! │  ┌─ error ────── PickerError (统一错误类型)              │
//! │  │                                                       │
//! │  └─ image_source                                         │
//! │      ├─ RemoteImageSource   URL 身份 + 请求门面          │
//! │      ├─ SharedImageServices 运行时·队列·缓存·回调上下文  │
//! │      ├─ RequestQueue        有界并发 + 按 ID 取消        │
//! │      ├─ loader              文件 / Data URL / HTTP       │
//! │      ├─ pipeline            解码·方向校正·缩略图·JPEG    │
//! │      └─ cache               内存 LRU + 磁盘              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `PickerError`，覆盖启动、配置与图片链路 |
//! | [`image_source`] | 图片请求、排队、加载、解码与交付 |
//! | [`photo_library`] | 相册选择状态、选择上限与界面事件 |

pub mod error;
pub mod image_source;
pub mod photo_library;
