//! # 加载与校验模块
//!
//! ## 设计思路
//!
//! 统一处理三类地址（网络 / Data URL / 本地文件）的原始字节加载，并在“尽可能早”的阶段执行输入校验，
//! 尽快失败以减少不必要的内存与 CPU 消耗。
//!
//! ## 实现思路
//!
//! - 网络：协议 + 主机安全 + 手动重定向 + 单次请求（不重试，可随时取消） + 内容类型 + 体积校验 + 流式下载，
//!   成功后写入磁盘缓存；磁盘缓存命中时跳过网络。
//! - Data URL：Base64 解析 + 解码前体积估算。
//! - 文件：存在性 + metadata 体积限制 + 读取。
//! - 所有来源最终都经过文件签名（magic bytes）校验。
//!
//! `ImageLoader` 是同步接口，在解码工作线程上调用；网络部分通过运行时句柄 `block_on` 执行异步下载。

use std::net::IpAddr;
use std::sync::Arc;
use std::future::Future;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use tokio::net::lookup_host;
use tokio::runtime::Handle;

use super::cache::ImageCache;
use super::pipeline::CancelCheck;
use super::source::{ImageUrl, RawImageData};
use super::{ImageError, ImageSourceConfig};

const STREAM_SIGNATURE_PREFIX_BYTES: usize = 4096;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;
const USER_AGENT: &str = concat!("media-picker/", env!("CARGO_PKG_VERSION"));

/// 原始字节加载接口。
///
/// 实现必须可在任意工作线程上同步调用，并在合适的位置检查 `is_cancelled`。
pub trait ImageLoader: Send + Sync {
    fn load(&self, url: &ImageUrl, is_cancelled: CancelCheck<'_>) -> Result<RawImageData, ImageError>;
}

/// 默认加载器：文件 / Data URL / HTTP(S)。
pub struct DefaultImageLoader {
    config: ImageSourceConfig,
    client: reqwest::Client,
    runtime: Handle,
    cache: Option<Arc<ImageCache>>,
}

impl DefaultImageLoader {
    pub fn new(config: ImageSourceConfig, runtime: Handle) -> Result<Self, ImageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ImageError::Network(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            config,
            client,
            runtime,
            cache: None,
        })
    }

    /// 挂接磁盘缓存：远程下载前先查缓存，下载成功后回写。
    pub fn with_cache(mut self, cache: Arc<ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 从本地文件加载。
    fn load_from_file(&self, url: &ImageUrl) -> Result<RawImageData, ImageError> {
        let path = url.to_file_path()?;
        log::info!("📁 开始读取本地图片 - 路径: {}", path.display());

        let metadata = std::fs::metadata(&path).map_err(|e| {
            ImageError::FileSystem(format!("无法读取文件信息 {}：{}", path.display(), e))
        })?;

        if metadata.len() > self.config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                self.config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = std::fs::read(&path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取图片文件：{}", e)))?;
        validate_image_signature(&bytes)?;

        Ok(RawImageData::new(bytes, "file"))
    }

    /// 从 Data URL 加载。
    fn load_from_data_url(&self, url: &ImageUrl) -> Result<RawImageData, ImageError> {
        log::info!("📝 开始处理 base64 图片");

        let bytes = parse_data_url_with_limit(url.as_str(), self.config.max_file_size)?;
        if bytes.len() as u64 > self.config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "Base64 解码后体积过大：{:.2} MB（限制：{:.2} MB）",
                bytes.len() as f64 / 1024.0 / 1024.0,
                self.config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }
        validate_image_signature(&bytes)?;

        Ok(RawImageData::new(bytes, "data-url"))
    }

    /// 从网络加载；磁盘缓存命中时跳过下载。
    fn load_from_network(
        &self,
        url: &ImageUrl,
        is_cancelled: CancelCheck<'_>,
    ) -> Result<RawImageData, ImageError> {
        if let Some(bytes) = self.cache.as_ref().and_then(|cache| cache.read_bytes(url)) {
            if validate_image_signature(&bytes).is_ok() {
                log::debug!("♻️ 命中磁盘缓存 - URL: {}", url.redacted());
                return Ok(RawImageData::new(bytes, "disk-cache"));
            }
        }

        let bytes = self.runtime.block_on(self.download(url, is_cancelled))?;

        if let Some(cache) = &self.cache {
            cache.write_bytes(url, &bytes);
        }

        Ok(RawImageData::new(bytes, "url"))
    }

    /// 下载远程图片：安全校验 → 单次请求 → 手动重定向 → 流式读取。
    pub(crate) async fn download(
        &self,
        url: &ImageUrl,
        is_cancelled: CancelCheck<'_>,
    ) -> Result<Bytes, ImageError> {
        log::info!("🌐 开始下载图片 - URL: {}", url.redacted());

        validate_url_safety(url.as_url(), &self.config).await?;

        let mut current_url = url.as_url().clone();
        for redirect_count in 0..=self.config.max_redirects {
            if is_cancelled() {
                return Err(ImageError::Cancelled("图片下载已取消".to_string()));
            }

            let response = self.send_request(&current_url, is_cancelled).await?;

            if response.status().is_redirection() {
                if redirect_count >= self.config.max_redirects {
                    return Err(ImageError::Network(format!(
                        "重定向次数超过限制（{}）",
                        self.config.max_redirects
                    )));
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| ImageError::Network("重定向响应缺少 Location 头".to_string()))?
                    .to_str()
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向地址无效：{}", e)))?;

                let next_url = current_url
                    .join(location)
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向 URL 解析失败：{}", e)))?;

                validate_url_safety(&next_url, &self.config).await?;

                log::debug!("↪️ 跳转到: {}", ImageUrl::from(next_url.clone()).redacted());
                current_url = next_url;
                continue;
            }

            return self.read_validated_body(response, is_cancelled).await;
        }

        Err(ImageError::Network("下载流程异常结束".to_string()))
    }

    /// 发送单次请求。失败不重试，由调用方重新发起请求；等待响应期间持续响应取消。
    async fn send_request(
        &self,
        url: &reqwest::Url,
        is_cancelled: CancelCheck<'_>,
    ) -> Result<reqwest::Response, ImageError> {
        let request = self
            .client
            .get(url.clone())
            .header(
                reqwest::header::ACCEPT,
                "image/avif,image/webp,image/apng,image/*,*/*;q=0.8",
            )
            .send();

        cancellable(request, is_cancelled)
            .await?
            .map_err(|err| map_reqwest_error(err, url, &self.config))
    }

    async fn read_validated_body(
        &self,
        mut response: reqwest::Response,
        is_cancelled: CancelCheck<'_>,
    ) -> Result<Bytes, ImageError> {
        let config = &self.config;

        if !response.status().is_success() {
            return Err(ImageError::Network(format!(
                "HTTP {}: {}",
                response.status().as_u16(),
                status_message(response.status().as_u16())
            )));
        }

        if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            if let Ok(ct_str) = ct.to_str() {
                if !is_image_content_type(ct_str) {
                    return Err(ImageError::InvalidFormat(format!("不是图片类型：{}", ct_str)));
                }
            }
        }

        let total_len = response.content_length();
        if let Some(size) = total_len {
            if size > config.max_file_size {
                return Err(ImageError::ResourceLimit(format!(
                    "文件过大：{:.2} MB（限制：{:.2} MB）",
                    size as f64 / 1024.0 / 1024.0,
                    config.max_file_size as f64 / 1024.0 / 1024.0
                )));
            }
        }

        let initial_capacity = total_len
            .map(|len| len.min(config.max_file_size).min(usize::MAX as u64) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        let mut buffer = Vec::with_capacity(initial_capacity);
        let mut total: u64 = 0;
        let mut signature_validated = false;
        let mut received_first_chunk = false;

        loop {
            let read_timeout = if received_first_chunk {
                Duration::from_millis(config.stream_chunk_timeout_ms)
            } else {
                Duration::from_millis(config.stream_first_byte_timeout_ms)
            };

            let next_chunk = cancellable(tokio::time::timeout(read_timeout, response.chunk()), is_cancelled)
                .await?
                .map_err(|_| {
                    if received_first_chunk {
                        ImageError::Timeout("下载数据流读取超时".to_string())
                    } else {
                        ImageError::Timeout("下载首包超时".to_string())
                    }
                })?
                .map_err(|e| ImageError::Network(format!("下载失败：{}", e)))?;

            let Some(chunk) = next_chunk else {
                break;
            };
            received_first_chunk = true;

            if is_cancelled() {
                return Err(ImageError::Cancelled("图片下载已取消".to_string()));
            }

            total = total.saturating_add(chunk.len() as u64);
            if total > config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);

            if !signature_validated {
                signature_validated =
                    validate_stream_signature_prefix(&buffer, STREAM_SIGNATURE_PREFIX_BYTES)?;
            }
        }

        if !signature_validated {
            validate_image_signature(&buffer)?;
        }

        log::debug!("✅ 下载完成 - {} bytes", total);
        Ok(Bytes::from(buffer))
    }
}

impl ImageLoader for DefaultImageLoader {
    fn load(&self, url: &ImageUrl, is_cancelled: CancelCheck<'_>) -> Result<RawImageData, ImageError> {
        if url.is_file() {
            self.load_from_file(url)
        } else if url.is_data() {
            self.load_from_data_url(url)
        } else {
            self.load_from_network(url, is_cancelled)
        }
    }
}

/// 校验 URL 安全性。默认阻止本地/内网目标，防止 SSRF。
async fn validate_url_safety(url: &reqwest::Url, config: &ImageSourceConfig) -> Result<(), ImageError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ImageError::InvalidFormat("仅支持 HTTP/HTTPS".to_string()));
    }

    if config.allow_private_network {
        return Ok(());
    }

    let host = url
        .host_str()
        .ok_or_else(|| ImageError::InvalidFormat("URL 缺少主机地址".to_string()))?;

    if is_local_hostname(host) {
        return Err(ImageError::InvalidFormat(format!("禁止访问本地网络地址：{}", host)));
    }

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if is_private_or_local_ip(ip) {
            return Err(ImageError::InvalidFormat(format!("禁止访问内网 IP：{}", ip)));
        }
        return Ok(());
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| ImageError::InvalidFormat("URL 缺少端口信息".to_string()))?;
    let addrs = lookup_host((host, port))
        .await
        .map_err(|e| ImageError::Network(format!("URL 主机解析失败：{}", e)))?;

    for addr in addrs {
        if is_private_or_local_ip(addr.ip()) {
            return Err(ImageError::InvalidFormat(format!(
                "URL 解析结果命中内网地址：{}",
                addr.ip()
            )));
        }
    }

    Ok(())
}

fn is_local_hostname(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.eq_ignore_ascii_case("localhost.")
        || host.ends_with(".local")
}

/// 判断 IP 是否属于本地/内网/链路本地等受限范围。
fn is_private_or_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified()
                || v4.is_multicast()
            {
                return true;
            }

            // 0.0.0.0/8 与运营商级 NAT 100.64.0.0/10
            let octets = v4.octets();
            octets[0] == 0 || (octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_or_local_ip(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
        }
    }
}

/// 让等待中的网络操作与取消标志竞争；取消先到时放弃该操作。
async fn cancellable<F: Future>(operation: F, is_cancelled: CancelCheck<'_>) -> Result<F::Output, ImageError> {
    tokio::select! {
        output = operation => Ok(output),
        _ = wait_for_cancellation(is_cancelled) => {
            Err(ImageError::Cancelled("图片下载已取消".to_string()))
        }
    }
}

async fn wait_for_cancellation(is_cancelled: CancelCheck<'_>) {
    let mut ticker = tokio::time::interval(CANCEL_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if is_cancelled() {
            return;
        }
    }
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|base| {
            let base = base.trim().to_ascii_lowercase();
            // 部分 CDN 对图片返回通用二进制类型，交给签名校验兜底
            base.starts_with("image/") || base == "application/octet-stream"
        })
        .unwrap_or(false)
}

fn sanitize_error_message(error_msg: &str, url: &reqwest::Url) -> String {
    error_msg.replace(url.as_str(), &ImageUrl::from(url.clone()).redacted())
}

fn map_reqwest_error(e: reqwest::Error, url: &reqwest::Url, config: &ImageSourceConfig) -> ImageError {
    let err_msg = sanitize_error_message(&e.to_string(), url);

    if e.is_timeout() {
        ImageError::Timeout(format!("下载超时（{}秒）", config.download_timeout))
    } else if e.is_connect() {
        ImageError::Network(format!("无法连接：{}", err_msg))
    } else {
        ImageError::Network(format!("请求失败：{}", err_msg))
    }
}

fn status_message(code: u16) -> &'static str {
    match code {
        404 => "未找到",
        403 => "访问被拒绝",
        500..=599 => "服务器错误",
        _ => "请求失败",
    }
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, ImageError> {
    let len = base64_data.trim().len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}

/// 解析 `data:image/...;base64,` 形式的地址，解码前先估算体积。
fn parse_data_url_with_limit(data: &str, max_file_size: u64) -> Result<Vec<u8>, ImageError> {
    let normalized = data.trim();
    let base64_start = normalized
        .find(";base64,")
        .ok_or_else(|| ImageError::InvalidFormat("缺少 base64 标记".to_string()))?;
    let base64_data = &normalized[base64_start + ";base64,".len()..];

    let estimated_len = estimate_base64_decoded_upper_bound_len(base64_data)?;
    if estimated_len > max_file_size {
        return Err(ImageError::ResourceLimit(format!(
            "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
            estimated_len as f64 / 1024.0 / 1024.0,
            max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    general_purpose::STANDARD
        .decode(base64_data)
        .map_err(|e| ImageError::Decode(format!("Base64 解码失败：{}", e)))
}

/// 通过文件签名（magic bytes）校验输入是否为图片。
fn validate_image_signature(bytes: &[u8]) -> Result<(), ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::InvalidFormat("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| ImageError::InvalidFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ImageError::InvalidFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

/// 流式下载阶段的签名探测。
///
/// - `Ok(true)`：已识别为图片
/// - `Ok(false)`：字节不足以判断，继续下载
/// - `Err(...)`：已识别为非图片，或达到探测上限仍无法识别
fn validate_stream_signature_prefix(bytes: &[u8], prefix_limit: usize) -> Result<bool, ImageError> {
    if bytes.is_empty() {
        return Ok(false);
    }

    if let Some(kind) = infer::get(bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(ImageError::InvalidFormat(format!(
                "下载内容不是图片类型：{}",
                kind.mime_type()
            )));
        }
        return Ok(true);
    }

    if bytes.len() >= prefix_limit {
        return Err(ImageError::InvalidFormat(format!(
            "下载前 {} 字节内无法识别图片类型",
            prefix_limit
        )));
    }

    Ok(false)
}
