//! Compression and decompression of backup artifacts.
//!
//! Operates on files rather than in-memory buffers: dumps can be large,
//! and streaming through a file keeps memory bounded. The method is
//! auto-detected from the destination suffix on compress and from the
//! source suffix on decompress (`.gz` / `.bz2` / `.zip`); `tar.gz` is
//! produced directly by the files adapter rather than through the
//! generic [`compress`] entry point, since it bundles many source paths
//! into one archive.

use std::io::{Read, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression as BzCompression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;

use crate::error::{BackupError, Result};

/// Supported compression methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Gzip,
    Bzip2,
    Zip,
}

impl CompressionMethod {
    /// Detect a method from a destination (compress) or source
    /// (decompress) file suffix.
    pub fn from_suffix(path: &Path) -> Option<Self> {
        let name = path.to_str()?;
        if name.ends_with(".gz") {
            Some(Self::Gzip)
        } else if name.ends_with(".bz2") {
            Some(Self::Bzip2)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    /// Parse a method from its spec.md configuration name (empty string
    /// means "no compression", handled by the caller).
    pub fn from_config_str(value: &str) -> Option<Self> {
        match value {
            "gz" | "gzip" => Some(Self::Gzip),
            "bz2" | "bzip2" => Some(Self::Bzip2),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }

    /// File extension this method produces.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
            Self::Zip => "zip",
        }
    }
}

/// Compress `src` into `dst`. If `method` is `None`, it is inferred from
/// `dst`'s suffix; if that also fails, the file is copied uncompressed
/// (an empty `compression` config value means "no compression" per
/// spec.md §4.5).
pub async fn compress(
    src: &Path,
    dst: &Path,
    method: Option<CompressionMethod>,
) -> Result<()> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    let method = method.or_else(|| CompressionMethod::from_suffix(&dst));

    tokio::task::spawn_blocking(move || compress_blocking(&src, &dst, method))
        .await
        .map_err(|e| BackupError::Operation {
            step: "compress".to_string(),
            message: e.to_string(),
        })?
}

fn compress_blocking(src: &Path, dst: &Path, method: Option<CompressionMethod>) -> Result<()> {
    let Some(method) = method else {
        std::fs::copy(src, dst)?;
        return Ok(());
    };

    let input = std::fs::read(src)?;

    match method {
        CompressionMethod::Gzip => {
            let file = std::fs::File::create(dst)?;
            let mut encoder = GzEncoder::new(file, GzCompression::default());
            encoder.write_all(&input)?;
            encoder.finish()?;
        }
        CompressionMethod::Bzip2 => {
            let file = std::fs::File::create(dst)?;
            let mut encoder = BzEncoder::new(file, BzCompression::best());
            encoder.write_all(&input)?;
            encoder.finish()?;
        }
        CompressionMethod::Zip => {
            let file = std::fs::File::create(dst)?;
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            let entry_name = src
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("payload")
                .to_string();
            zip.start_file(entry_name, options)
                .map_err(|e| BackupError::Operation {
                    step: "compress".to_string(),
                    message: e.to_string(),
                })?;
            zip.write_all(&input)?;
            zip.finish().map_err(|e| BackupError::Operation {
                step: "compress".to_string(),
                message: e.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Decompress `src` into `dst`. If `method` is `None`, it is inferred
/// from `src`'s suffix.
pub async fn decompress(
    src: &Path,
    dst: &Path,
    method: Option<CompressionMethod>,
) -> Result<()> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    let method = method.or_else(|| CompressionMethod::from_suffix(&src));

    tokio::task::spawn_blocking(move || decompress_blocking(&src, &dst, method))
        .await
        .map_err(|e| BackupError::Operation {
            step: "decompress".to_string(),
            message: e.to_string(),
        })?
}

fn decompress_blocking(src: &Path, dst: &Path, method: Option<CompressionMethod>) -> Result<()> {
    let Some(method) = method else {
        std::fs::copy(src, dst)?;
        return Ok(());
    };

    let mut output = Vec::new();

    match method {
        CompressionMethod::Gzip => {
            let file = std::fs::File::open(src)?;
            GzDecoder::new(file).read_to_end(&mut output)?;
        }
        CompressionMethod::Bzip2 => {
            let file = std::fs::File::open(src)?;
            BzDecoder::new(file).read_to_end(&mut output)?;
        }
        CompressionMethod::Zip => {
            let file = std::fs::File::open(src)?;
            let mut archive = zip::ZipArchive::new(file).map_err(|e| BackupError::Operation {
                step: "decompress".to_string(),
                message: e.to_string(),
            })?;
            let mut entry = archive.by_index(0).map_err(|e| BackupError::Operation {
                step: "decompress".to_string(),
                message: e.to_string(),
            })?;
            entry.read_to_end(&mut output)?;
        }
    }

    std::fs::write(dst, output)?;
    Ok(())
}

/// Build a gzipped tar archive at `dst` from `files`, preserving their
/// absolute paths as archive entry names (used by the files adapter).
pub async fn tar_gz_archive(files: Vec<std::path::PathBuf>, dst: &Path) -> Result<()> {
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&dst)?;
        let encoder = GzEncoder::new(file, GzCompression::default());
        let mut builder = tar::Builder::new(encoder);

        for path in &files {
            if !path.is_file() {
                tracing::warn!(path = %path.display(), "skipping missing file during archive");
                continue;
            }
            let entry_name = path.strip_prefix("/").unwrap_or(path);
            builder.append_path_with_name(path, entry_name)?;
        }

        builder.into_inner()?.finish()?;
        Ok::<(), BackupError>(())
    })
    .await
    .map_err(|e| BackupError::Operation {
        step: "compress".to_string(),
        message: e.to_string(),
    })?
}

/// Extract a gzipped tar archive into `target_dir` (or `/` when none is
/// given). Missing source files were already skipped when the archive
/// was built; any extraction error here surfaces as an operation error.
pub async fn tar_gz_extract(src: &Path, target_dir: Option<&Path>) -> Result<()> {
    let src = src.to_path_buf();
    let target_dir = target_dir
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("/"));

    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&src)?;
        let decoder = GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(&target_dir)?;
        Ok::<(), BackupError>(())
    })
    .await
    .map_err(|e| BackupError::Operation {
        step: "restore".to_string(),
        message: e.to_string(),
    })?
}

/// Ratio of original size to compressed size, or `None` if either input
/// is missing/unreadable or the compressed artifact is zero bytes.
pub fn compression_ratio(original_path: &Path, compressed_path: &Path) -> Option<f64> {
    let original = std::fs::metadata(original_path).ok()?.len();
    let compressed = std::fs::metadata(compressed_path).ok()?.len();
    if compressed == 0 {
        return None;
    }
    Some(original as f64 / compressed as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn gzip_roundtrip() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("dump.sql");
        let gz = dir.path().join("dump.sql.gz");
        let out = dir.path().join("dump.sql.out");

        std::fs::write(&src, b"SELECT 1;".repeat(50)).unwrap();
        compress(&src, &gz, None).await.unwrap();
        decompress(&gz, &out, None).await.unwrap();

        assert_eq!(std::fs::read(&src).unwrap(), std::fs::read(&out).unwrap());
    }

    #[tokio::test]
    async fn bzip2_roundtrip() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("dump.sql");
        let bz = dir.path().join("dump.sql.bz2");
        let out = dir.path().join("dump.sql.out");

        std::fs::write(&src, b"data".repeat(200)).unwrap();
        compress(&src, &bz, None).await.unwrap();
        decompress(&bz, &out, None).await.unwrap();

        assert_eq!(std::fs::read(&src).unwrap(), std::fs::read(&out).unwrap());
    }

    #[tokio::test]
    async fn zip_roundtrip() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("dump.sql");
        let zipped = dir.path().join("dump.sql.zip");
        let out = dir.path().join("dump.sql.out");

        std::fs::write(&src, b"zip me").unwrap();
        compress(&src, &zipped, None).await.unwrap();
        decompress(&zipped, &out, None).await.unwrap();

        assert_eq!(std::fs::read(&src).unwrap(), std::fs::read(&out).unwrap());
    }

    #[test]
    fn ratio_is_none_for_missing_or_zero_byte_compressed() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("a");
        std::fs::write(&original, b"hello").unwrap();

        assert!(compression_ratio(&original, &dir.path().join("missing")).is_none());

        let zero_byte = dir.path().join("z");
        std::fs::write(&zero_byte, b"").unwrap();
        assert!(compression_ratio(&original, &zero_byte).is_none());
    }

    #[tokio::test]
    async fn tar_gz_archive_roundtrip() {
        let dir = tempdir().unwrap();
        let file_a = dir.path().join("a.txt");
        let file_b = dir.path().join("b.txt");
        std::fs::write(&file_a, b"alpha").unwrap();
        std::fs::write(&file_b, b"beta").unwrap();

        let archive = dir.path().join("files.tar.gz");
        tar_gz_archive(vec![file_a.clone(), file_b.clone()], &archive)
            .await
            .unwrap();
        assert!(archive.exists());

        let extract_dir = tempdir().unwrap();
        tar_gz_extract(&archive, Some(extract_dir.path()))
            .await
            .unwrap();
        let extracted = extract_dir.path().join(file_a.strip_prefix("/").unwrap());
        assert_eq!(std::fs::read(extracted).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn tar_gz_archive_skips_missing_files() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("present.txt");
        std::fs::write(&present, b"data").unwrap();
        let missing = dir.path().join("missing.txt");

        let archive = dir.path().join("files.tar.gz");
        tar_gz_archive(vec![present, missing], &archive)
            .await
            .unwrap();
        assert!(archive.exists());
    }
}
