//! External encoder integration
//!
//! Pixel compression is delegated to the `nvcompress` binary. This module
//! owns the hand-off: resize the decoded image, persist it to a temporary
//! PNG next to the destination, run the encoder, surface its stderr, and
//! clean the temporary up.
//!
//! All invocations pass through an [`EncodeGate`]. nvcompress is not
//! guaranteed safe for concurrent invocation, so the default gate admits
//! one encode at a time process-wide. Relaxing this to per-destination
//! locking would be a behavior change and needs an encoder that supports
//! concurrent runs.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, warn};

use crate::policy::{ChannelLayout, TransformDecision};

/// Mutual-exclusion domain for encoder subprocesses.
///
/// `exclusive()` is the production gate: at most one encode runs at any
/// instant, process-wide. `unlocked()` disables serialization and exists
/// for tests and for encoders known to tolerate concurrent invocation.
#[derive(Clone)]
pub struct EncodeGate(Option<Arc<Mutex<()>>>);

impl EncodeGate {
    pub fn exclusive() -> Self {
        EncodeGate(Some(Arc::new(Mutex::new(()))))
    }

    pub fn unlocked() -> Self {
        EncodeGate(None)
    }

    fn acquire(&self) -> Option<MutexGuard<'_, ()>> {
        // A poisoned gate still serializes; the panic happened in another
        // conversion and does not invalidate the lock itself.
        self.0
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

/// Errors from one encoder invocation.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Failed to write intermediate image: {0}")]
    Intermediate(#[source] std::io::Error),

    #[error("Failed to spawn encoder {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder exited with status {status} for {dest}")]
    Failed { status: String, dest: PathBuf },
}

/// Runs nvcompress against resized intermediates.
pub struct EncoderInvoker {
    binary: PathBuf,
    gate: EncodeGate,
}

impl EncoderInvoker {
    /// Locate the encoder binary and build an invoker around it.
    ///
    /// Lookup order: explicit override, `bin/nvcompress[.exe]` beside the
    /// executable, then the system PATH.
    pub fn discover(override_path: Option<PathBuf>, gate: EncodeGate) -> Result<Self> {
        let binary = match override_path {
            Some(path) => {
                if !path.exists() {
                    bail!("Encoder binary not found: {}", path.display());
                }
                path
            }
            None => find_nvcompress()?,
        };
        debug!("Using encoder binary: {}", binary.display());
        Ok(EncoderInvoker { binary, gate })
    }

    /// Build an invoker around a known binary. Used by tests with mock
    /// encoder scripts; skips discovery entirely.
    pub fn with_binary(binary: PathBuf, gate: EncodeGate) -> Self {
        EncoderInvoker { binary, gate }
    }

    /// Resize, stage, and encode one image to `dest`.
    ///
    /// The intermediate PNG is removed best-effort whatever the encoder
    /// exit status; a removal failure is logged, never fatal.
    pub fn invoke(
        &self,
        image: &DynamicImage,
        decision: &TransformDecision,
        dest: &Path,
    ) -> Result<(), EncodeError> {
        let _serialized = self.gate.acquire();

        let resized = image.resize_exact(decision.width, decision.height, FilterType::Triangle);
        let staged = match decision.layout {
            ChannelLayout::Rgba | ChannelLayout::GrayAlpha => {
                DynamicImage::ImageRgba8(resized.to_rgba8())
            }
            ChannelLayout::Rgb | ChannelLayout::Gray => DynamicImage::ImageRgb8(resized.to_rgb8()),
        };

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".ddswatch-")
            .suffix(".png")
            .tempfile_in(parent)
            .map_err(EncodeError::Intermediate)?
            .into_temp_path();

        staged
            .save_with_format(&temp, image::ImageFormat::Png)
            .map_err(|e| EncodeError::Intermediate(std::io::Error::other(e)))?;

        let result = self.run_encoder(decision, &temp, dest);

        if let Err(e) = temp.close() {
            warn!("Failed to remove intermediate file: {}", e);
        }

        result
    }

    fn run_encoder(
        &self,
        decision: &TransformDecision,
        input: &Path,
        dest: &Path,
    ) -> Result<(), EncodeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(decision.mode.flag()).arg(input).arg(dest);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let output = cmd.output().map_err(|source| EncodeError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;

        if !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Encoder stderr for {}: {}", dest.display(), stderr.trim());
        }

        if !output.status.success() {
            return Err(EncodeError::Failed {
                status: output.status.to_string(),
                dest: dest.to_path_buf(),
            });
        }

        debug!(
            "Encoded {} as {} ({}x{})",
            dest.display(),
            decision.mode.flag(),
            decision.width,
            decision.height
        );
        Ok(())
    }
}

/// Find the nvcompress binary: `bin/` beside the executable first (the
/// usual deployment layout), then the system PATH.
fn find_nvcompress() -> Result<PathBuf> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            for candidate in ["bin/nvcompress", "bin/nvcompress.exe", "nvcompress"] {
                let path = exe_dir.join(candidate);
                if path.exists() {
                    return Ok(path);
                }
            }
        }
    }

    which::which("nvcompress")
        .context("nvcompress not found. Install NVIDIA Texture Tools or place nvcompress in bin/.")
}
