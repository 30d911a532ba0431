//! Local media storage for generation results.
//!
//! Results arrive either as URLs or base64 blobs; both land as files
//! under `output_dir` named from `(task_id, timestamp, sequence)`. When
//! a product requires watermarking, a `watermarked_` sibling is
//! produced next to the clean original, which is retained for
//! fulfillment.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use inkstone_core::types::DbId;
use inkstone_core::watermark::{self, WatermarkError};
use inkstone_core::TaskErrorKind;
use inkstone_providers::ImageRef;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("download failed: HTTP {0}")]
    DownloadStatus(u16),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("watermark failed: {0}")]
    Watermark(#[from] WatermarkError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Task error classification for a failed result materialization.
    pub fn task_error_kind(&self) -> TaskErrorKind {
        match self {
            StorageError::Download(_) | StorageError::DownloadStatus(_) => {
                TaskErrorKind::DownloadFailed
            }
            _ => TaskErrorKind::DecodeFailed,
        }
    }
}

/// One materialized result image.
#[derive(Debug, Clone)]
pub struct StoredOutput {
    /// The un-watermarked original, kept for fulfillment.
    pub clean_path: PathBuf,
    /// The watermarked preview, when the product requires one.
    pub watermarked_path: Option<PathBuf>,
}

impl StoredOutput {
    /// The path shown to the user: watermarked when available.
    pub fn display_path(&self) -> &Path {
        self.watermarked_path.as_deref().unwrap_or(&self.clean_path)
    }
}

/// Filesystem + HTTP facade for result images.
pub struct MediaStore {
    client: reqwest::Client,
    output_dir: PathBuf,
    watermark_path: PathBuf,
    watermark_opacity: f32,
    public_base_url: String,
}

impl MediaStore {
    pub fn new(
        client: reqwest::Client,
        output_dir: PathBuf,
        watermark_path: PathBuf,
        watermark_opacity: f32,
        public_base_url: String,
    ) -> Self {
        Self {
            client,
            output_dir,
            watermark_path,
            watermark_opacity,
            public_base_url,
        }
    }

    /// Fetch one result ref and write it (and its watermarked sibling
    /// when requested) under the output directory.
    pub async fn store_output(
        &self,
        task_id: DbId,
        sequence: usize,
        image: &ImageRef,
        watermark_required: bool,
    ) -> Result<StoredOutput, StorageError> {
        let (bytes, ext) = self.fetch(image).await?;

        std::fs::create_dir_all(&self.output_dir)?;
        let name = output_name(task_id, sequence, ext);
        let clean_path = self.output_dir.join(&name);
        std::fs::write(&clean_path, &bytes)?;

        // The bytes must decode before the task can complete on them.
        if let Err(e) = image::load_from_memory(&bytes) {
            let _ = std::fs::remove_file(&clean_path);
            return Err(StorageError::Decode(e.to_string()));
        }

        let watermarked_path = if watermark_required {
            let wm_path = self.output_dir.join(watermark::watermarked_name(&name));
            watermark::watermark_file(
                &clean_path,
                &self.watermark_path,
                &wm_path,
                self.watermark_opacity,
            )?;
            Some(wm_path)
        } else {
            None
        };

        Ok(StoredOutput {
            clean_path,
            watermarked_path,
        })
    }

    /// Re-watermark from the clean copy, replacing a damaged preview.
    pub fn rewatermark(&self, clean_path: &Path) -> Result<PathBuf, StorageError> {
        let name = file_name(clean_path);
        let wm_path = clean_path.with_file_name(watermark::watermarked_name(&name));
        watermark::watermark_file(
            clean_path,
            &self.watermark_path,
            &wm_path,
            self.watermark_opacity,
        )?;
        Ok(wm_path)
    }

    /// Copy a task output into the order's final fulfillment slots.
    ///
    /// Returns `(final_image_path, final_image_path_clean)`.
    pub fn promote_selection(
        &self,
        order_number: &str,
        output: &StoredOutput,
    ) -> Result<(PathBuf, PathBuf), StorageError> {
        let ext = output
            .clean_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png");
        let final_clean = self.output_dir.join(format!("final_{order_number}.{ext}"));
        std::fs::copy(&output.clean_path, &final_clean)?;

        let final_display = match &output.watermarked_path {
            Some(wm) => {
                let dest = self
                    .output_dir
                    .join(format!("final_{order_number}_preview.{ext}"));
                std::fs::copy(wm, &dest)?;
                dest
            }
            None => final_clean.clone(),
        };
        Ok((final_display, final_clean))
    }

    /// Public URL under which a stored file is served.
    pub fn public_url(&self, path: &Path) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            file_name(path)
        )
    }

    async fn fetch(&self, image: &ImageRef) -> Result<(Vec<u8>, &'static str), StorageError> {
        match image {
            ImageRef::Url(url) => {
                let response = self.client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(StorageError::DownloadStatus(status.as_u16()));
                }
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let bytes = response.bytes().await?.to_vec();
                let ext = ext_from_url(url)
                    .or_else(|| content_type.as_deref().and_then(ext_for_mime))
                    .unwrap_or_else(|| {
                        warn!(url, "no usable extension hint, defaulting to png");
                        "png"
                    });
                Ok((bytes, ext))
            }
            ImageRef::Inline { data, mime } => {
                let bytes = BASE64.decode(data.trim())?;
                let ext = ext_for_mime(mime).unwrap_or("png");
                Ok((bytes, ext))
            }
        }
    }
}

/// `task<id>_<yyyymmddHHMMSS>_<seq>.<ext>`
fn output_name(task_id: DbId, sequence: usize, ext: &str) -> String {
    format!(
        "task{task_id}_{}_{sequence}.{ext}",
        Utc::now().format("%Y%m%d%H%M%S")
    )
}

fn ext_for_mime(mime: &str) -> Option<&'static str> {
    match mime.split(';').next().unwrap_or("").trim() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn ext_from_url(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => Some("jpg"),
        Some("png") => Some("png"),
        Some("webp") => Some("webp"),
        _ => None,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_embeds_task_and_sequence() {
        let name = output_name(42, 1, "png");
        assert!(name.starts_with("task42_"));
        assert!(name.ends_with("_1.png"));
    }

    #[test]
    fn mime_to_extension() {
        assert_eq!(ext_for_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_for_mime("image/png; charset=binary"), Some("png"));
        assert_eq!(ext_for_mime("application/json"), None);
    }

    #[test]
    fn url_extension_ignores_query_string() {
        assert_eq!(ext_from_url("https://cdn/x/out.JPG?sig=abc"), Some("jpg"));
        assert_eq!(ext_from_url("https://cdn/x/out.webp#frag"), Some("webp"));
        assert_eq!(ext_from_url("https://cdn/x/out"), None);
    }

    #[test]
    fn public_url_joins_base_and_file_name() {
        let store = MediaStore::new(
            reqwest::Client::new(),
            PathBuf::from("/data/outputs"),
            PathBuf::from("/assets/wm.png"),
            0.25,
            "http://localhost:3000/files/".into(),
        );
        assert_eq!(
            store.public_url(Path::new("/data/outputs/task1_x_0.png")),
            "http://localhost:3000/files/task1_x_0.png"
        );
    }

    #[test]
    fn display_path_prefers_watermarked() {
        let with = StoredOutput {
            clean_path: PathBuf::from("a.png"),
            watermarked_path: Some(PathBuf::from("watermarked_a.png")),
        };
        assert_eq!(with.display_path(), Path::new("watermarked_a.png"));
        let without = StoredOutput {
            clean_path: PathBuf::from("a.png"),
            watermarked_path: None,
        };
        assert_eq!(without.display_path(), Path::new("a.png"));
    }

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([10, 20, 30, 255]));
        image::DynamicImage::ImageRgba8(img).save(path).unwrap();
    }

    #[test]
    fn rewatermark_rebuilds_the_preview_next_to_the_clean_copy() {
        let dir = tempfile::tempdir().unwrap();
        let clean = dir.path().join("task5_x_0.png");
        let overlay = dir.path().join("wm.png");
        write_png(&clean, 4, 4);
        write_png(&overlay, 2, 2);

        let store = MediaStore::new(
            reqwest::Client::new(),
            dir.path().to_path_buf(),
            overlay,
            0.25,
            "http://x".into(),
        );
        let preview = store.rewatermark(&clean).unwrap();
        assert_eq!(preview, dir.path().join("watermarked_task5_x_0.png"));
        assert!(preview.exists());
        image::open(&preview).unwrap();
    }

    #[tokio::test]
    async fn inline_ref_decodes_base64() {
        // 1x1 transparent png
        let png = image::RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 0]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(png)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let data = BASE64.encode(&bytes);

        let store = MediaStore::new(
            reqwest::Client::new(),
            std::env::temp_dir(),
            PathBuf::from("unused"),
            0.25,
            "http://x".into(),
        );
        let (fetched, ext) = store
            .fetch(&ImageRef::Inline {
                data,
                mime: "image/png".into(),
            })
            .await
            .unwrap();
        assert_eq!(fetched, bytes);
        assert_eq!(ext, "png");
    }
}
