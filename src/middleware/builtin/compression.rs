//! gzip response compression
//!
//! A response is compressed only when all of these hold:
//! - the client accepts gzip with a non-zero quality
//! - no `Content-Encoding` is set yet
//! - the media type is textual (see [`is_compressible`])
//! - the body is at least `min_size` bytes

use crate::config::CompressionConfig;
use crate::context::Context;
use crate::error::Result;
use crate::http::Response;
use crate::middleware::{ExclusionPolicy, NoExclusions, OutboundMiddleware};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;

#[derive(Clone)]
pub struct ResponseCompression {
    min_size: usize,
    level: u32,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl ResponseCompression {
    pub fn new() -> Self {
        Self {
            min_size: 1024,
            level: 6,
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn from_config(config: &CompressionConfig) -> Self {
        Self::new().min_size(config.min_size).level(config.level)
    }

    /// Smallest body worth compressing, in bytes
    pub fn min_size(mut self, bytes: usize) -> Self {
        self.min_size = bytes;
        self
    }

    /// gzip level, clamped to 0..=9
    pub fn level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn with_exclusions<P: ExclusionPolicy>(mut self, exclusions: P) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }

    fn should_compress(&self, accept_encoding: Option<&str>, response: &Response) -> bool {
        accept_encoding.map(accepts_gzip).unwrap_or(false)
            && !response.has_header("Content-Encoding")
            && response.body.len() >= self.min_size
            && response
                .content_type()
                .map(|ct| is_compressible(&ct))
                .unwrap_or(false)
    }

    fn gzip(&self, body: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(body)?;
        encoder.finish()
    }
}

impl Default for ResponseCompression {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an `Accept-Encoding` value admits gzip
///
/// An explicit `gzip;q=0` refuses it even when `*` is listed.
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    let mut wildcard = false;

    for part in accept_encoding.split(',') {
        let mut params = part.split(';');
        let coding = params.next().unwrap_or("").trim().to_ascii_lowercase();
        let quality = params
            .filter_map(|param| {
                let (name, value) = param.split_once('=')?;
                if name.trim().eq_ignore_ascii_case("q") {
                    value.trim().parse::<f32>().ok()
                } else {
                    None
                }
            })
            .next()
            .unwrap_or(1.0);

        match coding.as_str() {
            "gzip" | "x-gzip" => return quality > 0.0,
            "*" => wildcard = quality > 0.0,
            _ => {}
        }
    }

    wildcard
}

/// Textual media types that shrink under gzip
pub fn is_compressible(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    mime.starts_with("text/")
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
        || matches!(
            mime.as_str(),
            "application/json"
                | "application/javascript"
                | "application/xml"
                | "application/x-www-form-urlencoded"
                | "image/svg+xml"
        )
}

/// Add `Accept-Encoding` to the response's `Vary` list
fn merge_vary(response: &mut Response) {
    let merged = match response.header("Vary") {
        None => "Accept-Encoding".to_string(),
        Some(existing) => {
            let listed = existing
                .split(',')
                .map(str::trim)
                .any(|name| name == "*" || name.eq_ignore_ascii_case("accept-encoding"));
            if listed {
                return;
            }
            format!("{}, Accept-Encoding", existing)
        }
    };
    response.set_header("Vary", &merged);
}

#[async_trait]
impl OutboundMiddleware for ResponseCompression {
    async fn process_response(&self, ctx: &mut Context) -> Result<()> {
        let accept_encoding = ctx.req.header("accept-encoding").map(str::to_string);
        let response = match ctx.response_mut() {
            Some(response) => response,
            None => return Ok(()),
        };
        if !self.should_compress(accept_encoding.as_deref(), response) {
            return Ok(());
        }

        let compressed = match self.gzip(&response.body) {
            Ok(compressed) => compressed,
            Err(e) => {
                log::warn!("Response compression failed, sending identity: {}", e);
                return Ok(());
            }
        };
        log::trace!(
            "Compressed response body {} -> {} bytes",
            response.body.len(),
            compressed.len()
        );

        response.body = compressed;
        response.set_header("Content-Encoding", "gzip");
        merge_vary(response);
        if response.has_header("Content-Length") {
            let length = response.body.len().to_string();
            response.set_header("Content-Length", &length);
        }
        Ok(())
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}
