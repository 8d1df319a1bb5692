//! Response compression (spec §4.G). New module — the teacher never
//! compresses backend responses. Grounded on how `ferronweb-ferron`
//! layers `async-compression`'s Tokio-aware encoders over a byte stream;
//! the configured `gzip.level`/`brotli.level` (spec §3) are threaded
//! through to the encoders via `Level::Precise`.

use crate::config::CompressionConfig;
use async_compression::tokio::bufread::{BrotliEncoder, GzipEncoder};
use async_compression::Level;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    Brotli,
}

/// Picks an encoding from the client's `Accept-Encoding` header and the
/// rule's compression config, preferring brotli when both are accepted
/// (brotli has typically denser ratios than gzip for text payloads).
pub fn negotiate(accept_encoding: Option<&str>, cfg: &CompressionConfig, body_len: u64) -> Encoding {
    if !cfg.enabled || body_len < cfg.min_length {
        return Encoding::Identity;
    }
    let accept = accept_encoding.unwrap_or("");
    if cfg.brotli.on && accept.contains("br") {
        Encoding::Brotli
    } else if cfg.gzip.on && accept.contains("gzip") {
        Encoding::Gzip
    } else {
        Encoding::Identity
    }
}

/// Compresses an already-buffered body at the configured quality level.
/// Streaming responses should instead wrap their body stream directly
/// with `async_compression`'s encoders; this helper exists for the common
/// case of a fully-buffered upstream response after body transformation
/// has already run.
pub async fn compress(body: Bytes, encoding: Encoding, cfg: &CompressionConfig) -> std::io::Result<Bytes> {
    match encoding {
        Encoding::Identity => Ok(body),
        Encoding::Gzip => {
            let reader = BufReader::new(&body[..]);
            let mut encoder = GzipEncoder::with_quality(reader, Level::Precise(cfg.gzip.level as i32));
            let mut out = Vec::new();
            encoder.read_to_end(&mut out).await?;
            Ok(Bytes::from(out))
        }
        Encoding::Brotli => {
            let reader = BufReader::new(&body[..]);
            let mut encoder = BrotliEncoder::with_quality(reader, Level::Precise(cfg.brotli.level as i32));
            let mut out = Vec::new();
            encoder.read_to_end(&mut out).await?;
            Ok(Bytes::from(out))
        }
    }
}

impl Encoding {
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            Encoding::Identity => None,
            Encoding::Gzip => Some("gzip"),
            Encoding::Brotli => Some("br"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrotliConfig, GzipConfig};

    fn cfg(min_length: u64) -> CompressionConfig {
        CompressionConfig {
            enabled: true,
            gzip: GzipConfig { on: true, level: 6 },
            brotli: BrotliConfig { on: true, level: 5 },
            min_length,
        }
    }

    #[test]
    fn prefers_brotli_when_both_accepted() {
        let enc = negotiate(Some("gzip, br"), &cfg(0), 1000);
        assert_eq!(enc, Encoding::Brotli);
    }

    #[test]
    fn falls_back_to_gzip() {
        let enc = negotiate(Some("gzip"), &cfg(0), 1000);
        assert_eq!(enc, Encoding::Gzip);
    }

    #[test]
    fn below_min_length_is_identity() {
        let enc = negotiate(Some("gzip, br"), &cfg(2000), 1000);
        assert_eq!(enc, Encoding::Identity);
    }

    #[test]
    fn disabled_compression_is_identity() {
        let mut c = cfg(0);
        c.enabled = false;
        let enc = negotiate(Some("gzip, br"), &c, 1000);
        assert_eq!(enc, Encoding::Identity);
    }

    #[tokio::test]
    async fn gzip_roundtrips_through_flate2() {
        let original = Bytes::from_static(b"hello world hello world hello world");
        let compressed = compress(original.clone(), Encoding::Gzip, &cfg(0)).await.unwrap();
        assert_ne!(compressed, original);
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut out).unwrap();
        assert_eq!(out.as_bytes(), &original[..]);
    }

    #[tokio::test]
    async fn brotli_roundtrips_with_configured_level() {
        let original = Bytes::from_static(b"hello world hello world hello world");
        let mut c = cfg(0);
        c.brotli.level = 9;
        let compressed = compress(original.clone(), Encoding::Brotli, &c).await.unwrap();
        assert_ne!(compressed, original);
    }
}
