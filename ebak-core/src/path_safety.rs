use std::path::{Component, Path, PathBuf};

/// Path of `file` relative to `root`, as stored inside an archive.
/// Returns `None` when `file` is not strictly beneath `root` (absolute
/// leftovers or `..` traversal).
pub fn archive_rel_path(root: &Path, file: &Path) -> Option<PathBuf> {
    let rel = pathdiff::diff_paths(file, root)?;
    if rel.as_os_str().is_empty() || rel.is_absolute() {
        return None;
    }
    let escapes = rel
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        None
    } else {
        Some(rel)
    }
}
