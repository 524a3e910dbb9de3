//! Upload source resolution.
//!
//! A reference image can arrive as an inline data URL, a remote URL, or a
//! local path. Resolution turns any of them into bytes plus a filename,
//! failing fast on anything unreachable or oversized before the upload
//! pipeline does network work.

use std::path::PathBuf;

use base64::Engine;
use tracing::debug;
use uuid::Uuid;

use crate::config::{ClientConfig, MAX_FILE_SIZE};
use crate::error::{JimengError, Result};

/// Where the upload bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// `data:<mime>;base64,<payload>` inline data.
    DataUrl(String),
    /// Remote `http(s)` URL, HEAD-checked before download.
    Remote(String),
    /// Local filesystem path.
    Local(PathBuf),
}

impl FileSource {
    /// Classify a raw string the way the web client accepts it.
    pub fn parse(input: &str) -> Self {
        if input.starts_with("data:") {
            Self::DataUrl(input.to_string())
        } else if input.starts_with("http://") || input.starts_with("https://") {
            Self::Remote(input.to_string())
        } else {
            Self::Local(PathBuf::from(input))
        }
    }
}

/// Resolved payload ready for checksum and transfer.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub bytes: Vec<u8>,
    pub filename: String,
}

impl FileSource {
    /// Resolve into bytes + filename.
    pub async fn resolve(
        &self,
        http: &reqwest::Client,
        config: &ClientConfig,
    ) -> Result<ResolvedFile> {
        let resolved = match self {
            Self::DataUrl(data) => decode_data_url(data)?,
            Self::Remote(url) => fetch_remote(http, config, url).await?,
            Self::Local(path) => read_local(path).await?,
        };
        if resolved.bytes.len() as u64 > MAX_FILE_SIZE {
            return Err(JimengError::InvalidFileUrl(format!(
                "{} exceeds the {} byte limit",
                resolved.filename, MAX_FILE_SIZE
            )));
        }
        debug!(
            filename = %resolved.filename,
            size = resolved.bytes.len(),
            "resolved upload source"
        );
        Ok(resolved)
    }
}

fn decode_data_url(data: &str) -> Result<ResolvedFile> {
    let rest = data
        .strip_prefix("data:")
        .ok_or_else(|| JimengError::InvalidFileUrl("malformed data URL".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| JimengError::InvalidFileUrl("data URL has no payload".to_string()))?;
    let mime = header.trim_end_matches(";base64");
    // The extension list is alphabetical ("jfif" before "jpeg"); the
    // subtype is the canonical choice whenever it is a known extension.
    let subtype = mime.rsplit('/').next().unwrap_or("");
    let extension = match mime_guess::get_mime_extensions_str(mime) {
        Some(exts) if exts.contains(&subtype) => subtype,
        Some(exts) => exts.first().copied().unwrap_or("png"),
        None => "png",
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| JimengError::InvalidFileUrl(format!("base64 decode: {e}")))?;
    Ok(ResolvedFile {
        bytes,
        filename: format!("{}.{extension}", Uuid::new_v4()),
    })
}

async fn fetch_remote(
    http: &reqwest::Client,
    config: &ClientConfig,
    url: &str,
) -> Result<ResolvedFile> {
    // Existence and size gate before any transfer.
    let head = http
        .head(url)
        .timeout(config.head_timeout)
        .send()
        .await
        .map_err(|e| JimengError::InvalidFileUrl(format!("{url}: {e}")))?;
    if head.status().as_u16() >= 400 {
        return Err(JimengError::InvalidFileUrl(format!(
            "{url} returned {}",
            head.status()
        )));
    }
    if let Some(length) = head.content_length() {
        if length > MAX_FILE_SIZE {
            return Err(JimengError::InvalidFileUrl(format!(
                "{url} is {length} bytes, over the {MAX_FILE_SIZE} byte limit"
            )));
        }
    }

    let filename = url
        .rsplit('/')
        .next()
        .and_then(|name| name.split('?').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.jpg", Uuid::new_v4()));

    let response = http
        .get(url)
        .timeout(config.transfer_timeout)
        .send()
        .await
        .map_err(|e| JimengError::InvalidFileUrl(format!("{url}: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| JimengError::InvalidFileUrl(format!("{url}: {e}")))?;
    Ok(ResolvedFile {
        bytes: bytes.to_vec(),
        filename,
    })
}

async fn read_local(path: &PathBuf) -> Result<ResolvedFile> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| JimengError::InvalidFileUrl(format!("{}: {e}", path.display())))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.jpg", Uuid::new_v4()));
    Ok(ResolvedFile { bytes, filename })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classifies_sources() {
        assert!(matches!(
            FileSource::parse("data:image/png;base64,AAAA"),
            FileSource::DataUrl(_)
        ));
        assert!(matches!(
            FileSource::parse("https://example.com/cat.jpg"),
            FileSource::Remote(_)
        ));
        assert!(matches!(
            FileSource::parse("/tmp/cat.jpg"),
            FileSource::Local(_)
        ));
    }

    #[tokio::test]
    async fn data_url_decodes_with_mime_extension() {
        let config = ClientConfig::default();
        let source = FileSource::parse("data:image/jpeg;base64,aGVsbG8=");
        let resolved = source
            .resolve(&reqwest::Client::new(), &config)
            .await
            .unwrap();
        assert_eq!(resolved.bytes, b"hello");
        assert!(
            resolved.filename.ends_with(".jpeg"),
            "unexpected filename {}",
            resolved.filename
        );
    }

    #[tokio::test]
    async fn data_url_extension_uses_the_mime_subtype() {
        let config = ClientConfig::default();
        let png = FileSource::parse("data:image/png;base64,aGVsbG8=")
            .resolve(&reqwest::Client::new(), &config)
            .await
            .unwrap();
        assert!(png.filename.ends_with(".png"), "got {}", png.filename);

        let webp = FileSource::parse("data:image/webp;base64,aGVsbG8=")
            .resolve(&reqwest::Client::new(), &config)
            .await
            .unwrap();
        assert!(webp.filename.ends_with(".webp"), "got {}", webp.filename);

        // Unknown MIME types fall back to png.
        let unknown = FileSource::parse("data:application/x-nonsense;base64,aGVsbG8=")
            .resolve(&reqwest::Client::new(), &config)
            .await
            .unwrap();
        assert!(unknown.filename.ends_with(".png"), "got {}", unknown.filename);
    }

    #[tokio::test]
    async fn malformed_data_url_is_rejected() {
        let config = ClientConfig::default();
        let source = FileSource::DataUrl("data:image/png;base64".to_string());
        let err = source
            .resolve(&reqwest::Client::new(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, JimengError::InvalidFileUrl(_)));
    }

    #[tokio::test]
    async fn missing_local_file_is_rejected() {
        let config = ClientConfig::default();
        let source = FileSource::parse("/definitely/not/here.png");
        let err = source
            .resolve(&reqwest::Client::new(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, JimengError::InvalidFileUrl(_)));
    }

    #[tokio::test]
    async fn local_file_resolves_with_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        std::fs::write(&path, b"png-bytes").unwrap();
        let config = ClientConfig::default();
        let resolved = FileSource::Local(path)
            .resolve(&reqwest::Client::new(), &config)
            .await
            .unwrap();
        assert_eq!(resolved.filename, "frame.png");
        assert_eq!(resolved.bytes, b"png-bytes");
    }
}
