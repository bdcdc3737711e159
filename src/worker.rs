//! Single-file conversion orchestration
//!
//! `convert_one` is the shared entry point for both the watcher and the
//! batch converter: freshness check, decode, transform policy, encoder,
//! cleanup. It is total with respect to errors; every per-file failure is
//! logged here and never reaches a caller, so one broken image cannot
//! stop a batch or a watch session.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::config::{HandlerConfig, MaxResolution};
use crate::encoder::{EncodeError, EncoderInvoker};
use crate::paths;
use crate::policy::{plan_transform, ChannelLayout, TransformDecision};

/// One file conversion, created at trigger time and discarded when the
/// worker returns. Settings are snapshotted at dispatch, so a config
/// change mid-flight does not affect this request.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub delete_source: bool,
    pub max_resolution: MaxResolution,
    pub recursive: bool,
}

impl ConversionRequest {
    pub fn new(source: PathBuf, config: &HandlerConfig) -> Self {
        let dest = paths::destination_for(&source);
        ConversionRequest {
            source,
            dest,
            delete_source: config.delete_source,
            max_resolution: config.max_resolution,
            recursive: config.recursive,
        }
    }
}

/// Per-file failures, contained inside `convert_one`.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Failed to decode source image: {0}")]
    Decode(#[from] image::ImageError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// What `convert_one` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Destination already up to date
    Fresh,
    Converted(TransformDecision),
}

/// Converts one file at a time. Safe to share across workers; same-path
/// races are rendered harmless by the freshness check and the encode gate.
pub struct ConversionWorker {
    encoder: EncoderInvoker,
}

impl ConversionWorker {
    pub fn new(encoder: EncoderInvoker) -> Self {
        ConversionWorker { encoder }
    }

    /// Convert one source image. Never propagates an error; idempotent for
    /// an unchanged source (the second call is a freshness no-op).
    pub fn convert_one(&self, request: &ConversionRequest) {
        match self.try_convert(request) {
            Ok(Outcome::Fresh) => {
                debug!("Up to date, skipping {}", request.source.display());
            }
            Ok(Outcome::Converted(decision)) => {
                info!(
                    "Converted {} -> {} using {} ({}x{})",
                    request.source.display(),
                    request.dest.display(),
                    decision.mode.flag(),
                    decision.width,
                    decision.height
                );
            }
            Err(e) => {
                error!("Failed to convert {}: {}", request.source.display(), e);
            }
        }
    }

    fn try_convert(&self, request: &ConversionRequest) -> Result<Outcome, ConvertError> {
        if paths::is_fresh(&request.source, &request.dest) {
            return Ok(Outcome::Fresh);
        }

        let image = image::open(&request.source)?;
        let layout = ChannelLayout::classify(image.color());
        let decision = plan_transform(
            image.width(),
            image.height(),
            layout,
            request.max_resolution,
        );

        self.encoder.invoke(&image, &decision, &request.dest)?;

        if request.delete_source {
            remove_source(&request.source);
        }

        Ok(Outcome::Converted(decision))
    }
}

/// Remove a converted source. Permission denied is tolerated silently:
/// the file may still be open in an editor or locked externally. The
/// encode already succeeded, so nothing propagates from here.
fn remove_source(source: &Path) {
    match fs::remove_file(source) {
        Ok(()) => debug!("Removed source {}", source.display()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {}
        Err(e) => debug!("Could not remove source {}: {}", source.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodeGate;
    #[cfg(unix)]
    use crate::testutil::write_png;
    #[cfg(unix)]
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Mock encoder that copies input to output and appends one line per
    /// invocation to a counter file beside the script.
    #[cfg(unix)]
    fn counting_encoder(dir: &Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;
        let count_file = dir.join("invocations");
        let script = dir.join("mock-nvcompress");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$1 $3\" >> {}\ncp \"$2\" \"$3\"\n",
                count_file.display()
            ),
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        (script, count_file)
    }

    #[cfg(unix)]
    fn invocation_count(count_file: &Path) -> usize {
        std::fs::read_to_string(count_file)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[cfg(unix)]
    #[test]
    fn test_convert_one_is_idempotent() {
        let dir = tempdir().unwrap();
        let (script, count_file) = counting_encoder(dir.path());
        let worker =
            ConversionWorker::new(EncoderInvoker::with_binary(script, EncodeGate::exclusive()));

        let source = dir.path().join("rock.png");
        write_png(&source, 16, 16);
        let request = ConversionRequest::new(source, &HandlerConfig::default());

        worker.convert_one(&request);
        assert!(request.dest.exists());
        assert_eq!(invocation_count(&count_file), 1);

        // Unchanged source: second call is a freshness no-op
        worker.convert_one(&request);
        assert_eq!(invocation_count(&count_file), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_convert_one_selects_mode_from_channels() {
        let dir = tempdir().unwrap();
        let (script, count_file) = counting_encoder(dir.path());
        let worker =
            ConversionWorker::new(EncoderInvoker::with_binary(script, EncodeGate::exclusive()));

        let opaque = dir.path().join("opaque.png");
        write_png(&opaque, 8, 8);
        let alpha = dir.path().join("alpha.png");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([1, 2, 3, 128]))
            .save(&alpha)
            .unwrap();

        let config = HandlerConfig::default();
        worker.convert_one(&ConversionRequest::new(opaque, &config));
        worker.convert_one(&ConversionRequest::new(alpha, &config));

        let log = std::fs::read_to_string(&count_file).unwrap();
        let mut lines = log.lines();
        assert!(lines.next().unwrap().starts_with("-bc1"));
        assert!(lines.next().unwrap().starts_with("-bc3"));
    }

    #[cfg(unix)]
    #[test]
    fn test_convert_one_deletes_source_when_flagged() {
        let dir = tempdir().unwrap();
        let (script, _) = counting_encoder(dir.path());
        let worker =
            ConversionWorker::new(EncoderInvoker::with_binary(script, EncodeGate::exclusive()));

        let source = dir.path().join("gone.png");
        write_png(&source, 8, 8);
        let config = HandlerConfig {
            delete_source: true,
            ..Default::default()
        };
        let request = ConversionRequest::new(source.clone(), &config);

        worker.convert_one(&request);
        assert!(request.dest.exists());
        assert!(!source.exists());
    }

    #[test]
    fn test_convert_one_swallows_decode_failure() {
        let dir = tempdir().unwrap();
        let worker = ConversionWorker::new(EncoderInvoker::with_binary(
            dir.path().join("never-run"),
            EncodeGate::exclusive(),
        ));

        let source = dir.path().join("corrupt.png");
        std::fs::write(&source, b"not a png").unwrap();
        let request = ConversionRequest::new(source, &HandlerConfig::default());

        // Must not panic and must not create a destination
        worker.convert_one(&request);
        assert!(!request.dest.exists());
    }

    /// N concurrent conversions of distinct sources: all destinations
    /// produced, encoder invocations never overlapping in time.
    #[cfg(unix)]
    #[test]
    fn test_concurrent_conversions_serialize_encoder() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let trace = dir.path().join("trace");
        let script = dir.path().join("slow-nvcompress");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 echo \"start $(date +%s%N)\" >> {trace}\n\
                 sleep 0.05\n\
                 cp \"$2\" \"$3\"\n\
                 echo \"end $(date +%s%N)\" >> {trace}\n",
                trace = trace.display()
            ),
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let worker = Arc::new(ConversionWorker::new(EncoderInvoker::with_binary(
            script,
            EncodeGate::exclusive(),
        )));

        let mut requests = Vec::new();
        for i in 0..4 {
            let source = dir.path().join(format!("tex{}.png", i));
            write_png(&source, 8, 8);
            requests.push(ConversionRequest::new(source, &HandlerConfig::default()));
        }

        let handles: Vec<_> = requests
            .iter()
            .cloned()
            .map(|request| {
                let worker = Arc::clone(&worker);
                std::thread::spawn(move || worker.convert_one(&request))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for request in &requests {
            assert!(request.dest.exists());
        }

        // Every `start` must be directly followed by its `end`
        let log = std::fs::read_to_string(&trace).unwrap();
        let events: Vec<&str> = log
            .lines()
            .map(|l| l.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(events.len(), 8);
        for pair in events.chunks(2) {
            assert_eq!(pair, ["start", "end"], "overlapping encoder invocations");
        }
    }
}
