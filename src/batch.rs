//! One-shot batch conversion
//!
//! Walks a folder (flat or recursive), converts every eligible image, and
//! reports integer-percentage progress after each file. Progress and
//! completion flow through a typed event channel so the shell can render
//! them however it likes; the converter itself never touches a terminal.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;
use walkdir::WalkDir;

use crate::config::{self, ConfigError, HandlerConfig};
use crate::paths;
use crate::worker::{ConversionRequest, ConversionWorker};

/// Events emitted during a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEvent {
    /// Integer percentage, monotonically non-decreasing, ends at 100
    Progress(u8),
    /// Emitted exactly once, after the last file (or immediately for an
    /// empty folder)
    Complete,
}

/// Sequential batch converter. Runs on its own task so the control thread
/// stays responsive; it does not parallelize file conversions.
pub struct BatchConverter<'a> {
    worker: &'a ConversionWorker,
}

impl<'a> BatchConverter<'a> {
    pub fn new(worker: &'a ConversionWorker) -> Self {
        BatchConverter { worker }
    }

    /// Convert every eligible file under `root`.
    ///
    /// The total is enumerated up front so progress can be fractional; an
    /// empty enumeration completes immediately with no progress events.
    /// Event send failures are ignored: a dropped receiver means nobody is
    /// listening, not that conversion should stop.
    pub fn run(
        &self,
        root: &Path,
        config: &HandlerConfig,
        events: &UnboundedSender<BatchEvent>,
    ) -> Result<(), ConfigError> {
        config::validate_root(root)?;

        let files = enumerate(root, config.recursive);
        let total = files.len();

        if total == 0 {
            info!("No convertible images under {}", root.display());
            let _ = events.send(BatchEvent::Complete);
            return Ok(());
        }

        info!("Converting {} images under {}", total, root.display());

        for (done, source) in files.into_iter().enumerate() {
            let request = ConversionRequest::new(source, config);
            self.worker.convert_one(&request);

            let percent = ((done + 1) * 100 / total) as u8;
            let _ = events.send(BatchEvent::Progress(percent));
        }

        let _ = events.send(BatchEvent::Complete);
        Ok(())
    }
}

/// Enumerate convertible files in stable traversal order.
fn enumerate(root: &Path, recursive: bool) -> Vec<PathBuf> {
    if recursive {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| paths::is_convertible(p))
            .collect()
    } else {
        let Ok(entries) = std::fs::read_dir(root) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| paths::is_convertible(p))
            .collect()
    }
}
