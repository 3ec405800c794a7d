use ebak_core::path_safety::archive_rel_path;
use std::path::{Path, PathBuf};

#[test]
fn nested_file_is_relative() {
    let root = Path::new("/data/ws");
    assert_eq!(
        archive_rel_path(root, Path::new("/data/ws/a/b.txt")),
        Some(PathBuf::from("a/b.txt"))
    );
}

#[test]
fn outside_or_root_itself_is_rejected() {
    let root = Path::new("/data/ws");
    assert_eq!(archive_rel_path(root, Path::new("/data/other/x")), None);
    assert_eq!(archive_rel_path(root, Path::new("/data/ws")), None);
    assert_eq!(archive_rel_path(root, Path::new("/data/ws/../ws2/x")), None);
}
