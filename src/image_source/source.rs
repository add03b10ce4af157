//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入地址”和“流水线中间结果”解耦：
//! - `ImageUrl` 表示图片资源地址（网络 / 本地文件 / Data URL）
//! - `RawImageData` 表示已加载但未解码的字节
//!
//! 是否为网络资源决定了下载生命周期回调是否触发，因此判定逻辑集中在这里。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bytes::Bytes;

use super::ImageError;

/// 图片资源地址。
///
/// 相等性与哈希完全基于 URL 字符串，图片源的身份语义依赖这一点。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageUrl(reqwest::Url);

impl ImageUrl {
    pub fn parse(input: &str) -> Result<Self, ImageError> {
        reqwest::Url::parse(input.trim())
            .map(Self)
            .map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))
    }

    /// 从本地绝对路径构造 `file://` 地址。
    pub fn from_file_path(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        reqwest::Url::from_file_path(path).map(Self).map_err(|_| {
            ImageError::InvalidFormat(format!("不是有效的绝对文件路径：{}", path.display()))
        })
    }

    pub fn as_url(&self) -> &reqwest::Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_file(&self) -> bool {
        self.0.scheme() == "file"
    }

    pub fn is_data(&self) -> bool {
        self.0.scheme() == "data"
    }

    /// 非本地资源（非 `file:` / `data:`）视为网络资源。
    pub fn is_remote(&self) -> bool {
        !self.is_file() && !self.is_data()
    }

    pub fn to_file_path(&self) -> Result<PathBuf, ImageError> {
        self.0
            .to_file_path()
            .map_err(|_| ImageError::FileSystem(format!("无法转换为本地路径：{}", self.redacted())))
    }

    /// 缓存键：完整 URL 字符串。
    pub fn cache_key(&self) -> &str {
        self.0.as_str()
    }

    /// 日志用的脱敏地址：去掉 query / fragment，Data URL 只保留媒体类型。
    pub fn redacted(&self) -> String {
        if self.is_data() {
            let media_type = self.0.path().split([';', ',']).next().unwrap_or("");
            return format!("data:{};…", media_type);
        }

        if self.is_file() {
            return format!("file://{}", self.0.path());
        }

        let host = self.0.host_str().unwrap_or("<unknown-host>");
        let port = self.0.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", self.0.scheme(), host, port, self.0.path())
    }
}

impl FromStr for ImageUrl {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<reqwest::Url> for ImageUrl {
    fn from(url: reqwest::Url) -> Self {
        Self(url)
    }
}

impl fmt::Display for ImageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// 加载阶段输出：原始字节与来源标识。
#[derive(Debug, Clone)]
pub struct RawImageData {
    /// 原始图片字节。
    pub bytes: Bytes,
    /// 来源提示（用于日志与诊断）。
    pub source_hint: &'static str,
}

impl RawImageData {
    pub fn new(bytes: impl Into<Bytes>, source_hint: &'static str) -> Self {
        Self {
            bytes: bytes.into(),
            source_hint,
        }
    }
}
