use std::path::{Path, PathBuf};

/// Path of an exported media file as written into export rows: relative to
/// the directory that contains the media directory, with `/` separators.
pub fn relative_media_path(media_dir: &Path, file: &Path) -> String {
    let base = media_dir.parent().unwrap_or(Path::new(""));
    let relative = pathdiff::diff_paths(file, base).unwrap_or_else(|| {
        file.file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| file.to_path_buf())
    });
    normalize_path_separator(&relative.to_string_lossy())
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(raw),
    }
}

// Helper function for cross-platform path comparison
pub fn normalize_path_separator(s: &str) -> String {
    s.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_media_dir_when_relativizing_then_includes_dir_name() {
        let media = Path::new("/out/media");
        assert_eq!(
            relative_media_path(media, Path::new("/out/media/a.jpg")),
            "media/a.jpg"
        );
    }

    #[test]
    fn given_plain_path_when_expanding_then_unchanged() {
        assert_eq!(expand_path("forms/a.xml"), PathBuf::from("forms/a.xml"));
    }
}
