//! Path rules for the conversion pipeline.
//!
//! Decides which files are convertible source images, where their DDS
//! output lands, and whether an existing output is still fresh. The
//! freshness check is the sole skip/re-encode mechanism: a destination
//! is up to date iff it exists and its mtime is >= the source's mtime.
//! There is no content hash.

use std::path::{Path, PathBuf};

/// Source extensions we convert (matched case-insensitively).
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Extension of the encoded output.
pub const OUTPUT_EXTENSION: &str = "dds";

/// Check whether a path names a convertible source image by extension.
///
/// Hidden (dot-prefixed) files are never sources: editors drop temp files
/// there, and our own encode intermediates are dot-prefixed so a watch on
/// the folder does not chase them. Does not touch the filesystem;
/// directory filtering is the caller's job.
pub fn is_convertible(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    if hidden {
        return false;
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => SUPPORTED_EXTENSIONS
            .iter()
            .any(|s| ext.eq_ignore_ascii_case(s)),
        None => false,
    }
}

/// Destination path for a source image: same location, `.dds` extension.
pub fn destination_for(source: &Path) -> PathBuf {
    source.with_extension(OUTPUT_EXTENSION)
}

/// Whether `dest` is up to date with respect to `source`.
///
/// Missing or unreadable metadata on either side counts as stale, so a
/// broken destination gets re-encoded rather than silently kept.
pub fn is_fresh(source: &Path, dest: &Path) -> bool {
    let Ok(dest_meta) = std::fs::metadata(dest) else {
        return false;
    };
    let Ok(source_meta) = std::fs::metadata(source) else {
        return false;
    };

    match (dest_meta.modified(), source_meta.modified()) {
        (Ok(dest_mtime), Ok(source_mtime)) => dest_mtime >= source_mtime,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_is_convertible() {
        assert!(is_convertible(Path::new("texture.png")));
        assert!(is_convertible(Path::new("texture.JPG")));
        assert!(is_convertible(Path::new("dir/with.dots/texture.Jpeg")));
        assert!(is_convertible(Path::new("texture.bmp")));
        assert!(!is_convertible(Path::new("texture.dds")));
        assert!(!is_convertible(Path::new("texture.tga")));
        assert!(!is_convertible(Path::new("noext")));
        // Hidden files are editor/encoder temporaries, never sources
        assert!(!is_convertible(Path::new(".ddswatch-x1y2.png")));
        assert!(!is_convertible(Path::new("dir/.hidden.png")));
    }

    #[test]
    fn test_destination_for() {
        assert_eq!(
            destination_for(Path::new("art/rock.png")),
            PathBuf::from("art/rock.dds")
        );
        assert_eq!(
            destination_for(Path::new("rock.JPEG")),
            PathBuf::from("rock.dds")
        );
    }

    #[test]
    fn test_is_fresh_missing_dest() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.png");
        fs::write(&source, b"x").unwrap();
        assert!(!is_fresh(&source, &dir.path().join("a.dds")));
    }

    #[test]
    fn test_is_fresh_newer_dest() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.png");
        let dest = dir.path().join("a.dds");
        fs::write(&source, b"x").unwrap();
        fs::write(&dest, b"y").unwrap();
        // dest written after source, so it is fresh
        assert!(is_fresh(&source, &dest));
    }

    #[test]
    fn test_is_fresh_stale_dest() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.png");
        let dest = dir.path().join("a.dds");
        fs::write(&dest, b"y").unwrap();
        // Push the source mtime past the destination's.
        fs::write(&source, b"x").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        let f = fs::File::options().write(true).open(&source).unwrap();
        f.set_modified(later).unwrap();
        assert!(!is_fresh(&source, &dest));
    }
}
