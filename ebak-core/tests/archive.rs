use ebak_core::archive::{ArchiveError, Archiver, SevenZip};
use std::fs;
use std::path::Path;

#[cfg(unix)]
fn stub_archiver(dir: &Path) -> (SevenZip, std::path::PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let args_out = dir.join("args.txt");
    let script = dir.join("fake7z.sh");
    fs::write(
        &script,
        format!(
            concat!(
                "#!/bin/sh\n",
                "printf '%s\\n' \"$@\" > '{}'\n",
                "for a in \"$@\"; do case \"$a\" in @*) list=\"${{a#@}}\";; -*|a) ;; *) target=\"$a\";; esac; done\n",
                "cp \"$list\" \"$target\"\n",
            ),
            args_out.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    (SevenZip::new(script), args_out)
}

#[cfg(unix)]
#[test]
fn names_are_listed_literally_and_relative() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("ws");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("report?.txt"), b"q").unwrap();
    fs::write(root.join("sub/x"), b"x").unwrap();
    let (seven, args_out) = stub_archiver(td.path());
    let target = td.path().join("out.7z");

    seven
        .pack(&[root.join("report?.txt"), root.join("sub/x")], &target, &root, Some("pw"))
        .unwrap();

    let args: Vec<String> = fs::read_to_string(args_out).unwrap().lines().map(String::from).collect();
    assert_eq!(args[..3], ["a", "-t7z", "-y"]);
    assert!(args.contains(&"-spd".to_string()));
    assert!(args.contains(&"-scsUTF-8".to_string()));
    assert!(args.contains(&"-ppw".to_string()));
    assert!(args.contains(&"-mhe=on".to_string()));
    assert_eq!(fs::read_to_string(&target).unwrap(), "report?.txt\nsub/x\n");
}

#[test]
fn line_break_names_are_refused_before_running() {
    let td = tempfile::tempdir().unwrap();
    let seven = SevenZip::new(td.path().join("never-run"));
    let bad = td.path().join("two\nlines");
    let err = seven.pack(&[bad], &td.path().join("out.7z"), td.path(), None).unwrap_err();
    assert!(matches!(err, ArchiveError::UnlistableName(_)), "{:?}", err);
}

#[test]
fn files_outside_root_are_refused() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("ws");
    let seven = SevenZip::default();
    let err = seven
        .pack(&[td.path().join("elsewhere")], &td.path().join("out.7z"), &root, None)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::OutsideRoot { .. }), "{:?}", err);
}

#[test]
fn empty_batch_is_refused() {
    let td = tempfile::tempdir().unwrap();
    let err = SevenZip::default().pack(&[], &td.path().join("out.7z"), td.path(), None).unwrap_err();
    assert!(matches!(err, ArchiveError::Empty(_)));
}
