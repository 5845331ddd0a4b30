use std::io;
use std::path::PathBuf;

use tempfile::TempDir;

/// Create the working temp directory, inside the user-supplied parent when
/// given.
pub fn create_temp_dir(parent: Option<&PathBuf>) -> io::Result<TempDir> {
    let builder_prefix = "seqstore-";
    match parent {
        Some(dir) => tempfile::Builder::new()
            .prefix(builder_prefix)
            .tempdir_in(dir),
        None => tempfile::Builder::new().prefix(builder_prefix).tempdir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_temp_dir_default() {
        let dir = create_temp_dir(None).unwrap();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_create_temp_dir_in_parent() {
        let parent = tempfile::tempdir().unwrap();
        let parent_path = parent.path().to_path_buf();
        let dir = create_temp_dir(Some(&parent_path)).unwrap();
        assert!(dir.path().starts_with(parent.path()));
    }
}
