use std::fs;
use std::path::Path;
use tempfile::TempDir;
use codetext::{Consolidator, Error, FilterConfig, ScanOptions, SkipReason};

fn write(dir: &Path, rel: &str, content: &[u8]) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write test file");
}

fn consolidator() -> Consolidator {
    Consolidator::new(ScanOptions::default()).expect("Failed to create consolidator")
}

#[test]
fn test_mixed_folder_scenario() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "a.py", b"x=1");
    write(src.path(), "b.log", b"log line");
    write(src.path(), "c.js", b"y=2");

    let filter = FilterConfig::new([".py", ".js"], ["*.log"], "###");
    let output = out.path().join("bundle.txt");
    let result = consolidator()
        .consolidate(src.path(), &filter, &output, false)
        .expect("Consolidation failed");

    assert_eq!(result.included_paths().collect::<Vec<_>>(), vec!["a.py", "c.js"]);
    assert!(result.skipped_files.is_empty());
    assert!(!result.compressed);

    let text = fs::read_to_string(&output).expect("Failed to read output");
    let a_header = text.find("### File: a.py ###").expect("a.py header missing");
    let c_header = text.find("### File: c.js ###").expect("c.js header missing");
    assert!(a_header < c_header);
    assert!(text.contains("x=1"));
    assert!(text.contains("y=2"));
    assert!(!text.contains("b.log"));
    assert_eq!(text.matches("### End of file ###").count(), 2);
    assert_eq!(result.total_bytes, text.len() as u64);
}

#[test]
fn test_consolidation_is_idempotent() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "src/main.rs", b"fn main() {}\n");
    write(src.path(), "src/lib.rs", b"pub mod a;\n");
    write(src.path(), "README.md", b"# readme\n");

    let consolidator = consolidator();
    let filter = FilterConfig::default();
    let first_path = out.path().join("first.txt");
    let second_path = out.path().join("second.txt");

    consolidator.consolidate(src.path(), &filter, &first_path, false).expect("First run failed");
    consolidator.consolidate(src.path(), &filter, &second_path, false).expect("Second run failed");

    let first = fs::read(&first_path).expect("Failed to read first output");
    let second = fs::read(&second_path).expect("Failed to read second output");
    assert_eq!(first, second);
}

#[test]
fn test_ignored_paths_never_appear() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "keep/app.py", b"print('keep')");
    write(src.path(), "temp/scratch.py", b"print('scratch')");
    write(src.path(), "deep/nested/debug.log", b"noise");

    let filter = FilterConfig::new(Vec::<String>::new(), ["temp/*", "*.log"], "###");
    let output = out.path().join("bundle.txt");
    let result = consolidator()
        .consolidate(src.path(), &filter, &output, false)
        .expect("Consolidation failed");

    let text = fs::read_to_string(&output).expect("Failed to read output");
    assert_eq!(result.included_paths().collect::<Vec<_>>(), vec!["keep/app.py"]);
    assert!(!text.contains("temp/scratch.py"));
    assert!(!text.contains("debug.log"));
}

#[test]
fn test_empty_allow_list_includes_all_text_files() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "Makefile", b"all:\n\ttrue\n");
    write(src.path(), "notes.txt", b"notes");
    write(src.path(), "script.sh", b"echo hi");

    let result = consolidator()
        .consolidate(src.path(), &FilterConfig::default(), &out.path().join("o.txt"), false)
        .expect("Consolidation failed");

    assert_eq!(
        result.included_paths().collect::<Vec<_>>(),
        vec!["Makefile", "notes.txt", "script.sh"]
    );
}

#[test]
fn test_binary_file_is_skipped() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "a.txt", b"hello");
    write(src.path(), "image.png", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00]);
    write(src.path(), "z.txt", b"world");

    let output = out.path().join("bundle.txt");
    let result = consolidator()
        .consolidate(src.path(), &FilterConfig::default(), &output, false)
        .expect("Binary content must not abort the run");

    assert_eq!(result.included_paths().collect::<Vec<_>>(), vec!["a.txt", "z.txt"]);
    assert_eq!(result.skipped_files.len(), 1);
    assert_eq!(result.skipped_files[0].relative_path, "image.png");
    assert_eq!(result.skipped_files[0].reason, SkipReason::Binary);

    let text = fs::read_to_string(&output).expect("Failed to read output");
    assert!(!text.contains("image.png"));
}

#[cfg(unix)]
#[test]
fn test_unreadable_entry_is_reported_as_skipped() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "a.py", b"x=1");
    std::os::unix::fs::symlink(src.path().join("gone.py"), src.path().join("link.py"))
        .expect("Failed to create symlink");

    let output = out.path().join("bundle.txt");
    let result = consolidator()
        .consolidate(src.path(), &FilterConfig::default(), &output, false)
        .expect("An unreadable entry must not abort the run");

    assert_eq!(result.included_paths().collect::<Vec<_>>(), vec!["a.py"]);
    assert_eq!(result.skipped_files.len(), 1);
    assert_eq!(result.skipped_files[0].relative_path, "link.py");
    assert!(matches!(result.skipped_files[0].reason, SkipReason::Unreadable(_)));

    let text = fs::read_to_string(&output).expect("Failed to read output");
    assert!(!text.contains("link.py"));
}

#[test]
fn test_latin1_file_is_included() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "legacy.txt", &[b'n', b'a', b'\xEF', b'v', b'e']);

    let output = out.path().join("bundle.txt");
    consolidator()
        .consolidate(src.path(), &FilterConfig::default(), &output, false)
        .expect("Consolidation failed");

    let text = fs::read_to_string(&output).expect("Failed to read output");
    assert!(text.contains("naïve"));
}

#[test]
fn test_unwritable_output_is_io_error() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "a.py", b"x=1");

    // A regular file standing where the output's parent directory should be
    let blocker = out.path().join("not-a-dir");
    fs::write(&blocker, "occupied").expect("Failed to write blocker");
    let output = blocker.join("bundle.txt");

    let err = consolidator()
        .consolidate(src.path(), &FilterConfig::default(), &output, false)
        .expect_err("Writing below a regular file must fail");

    assert!(matches!(err, Error::Io { .. }));
    assert_eq!(fs::read_to_string(&blocker).expect("Blocker vanished"), "occupied");
    let leftovers: Vec<_> = fs::read_dir(out.path()).expect("Failed to list dir").collect();
    assert_eq!(leftovers.len(), 1);
}

#[cfg(unix)]
#[test]
fn test_read_only_directory_is_io_error() {
    use std::os::unix::fs::PermissionsExt;

    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "a.py", b"x=1");

    let locked = out.path().join("locked");
    fs::create_dir(&locked).expect("Failed to create dir");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).expect("Failed to chmod");

    // Privileged users ignore directory permissions
    if fs::write(locked.join("write-check"), "x").is_ok() {
        let _ = fs::remove_file(locked.join("write-check"));
        let _ = fs::set_permissions(&locked, fs::Permissions::from_mode(0o755));
        return;
    }

    let err = consolidator()
        .consolidate(src.path(), &FilterConfig::default(), &locked.join("bundle.txt"), false)
        .expect_err("Writing into a read-only directory must fail");

    assert!(matches!(err, Error::Io { .. }));
    assert_eq!(fs::read_dir(&locked).expect("Failed to list dir").count(), 0);

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("Failed to restore permissions");
}

#[test]
fn test_failed_run_keeps_previous_artifact() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "a.py", b"x=1");

    let consolidator = consolidator();
    let output = out.path().join("bundle.txt");
    consolidator
        .consolidate(src.path(), &FilterConfig::default(), &output, false)
        .expect("First run failed");
    let before = fs::read(&output).expect("Failed to read output");

    let bad_filter = FilterConfig::new(Vec::<String>::new(), ["[unclosed"], "###");
    let err = consolidator
        .consolidate(src.path(), &bad_filter, &output, false)
        .expect_err("Invalid pattern must fail");

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(fs::read(&output).expect("Failed to read output"), before);
}

#[test]
fn test_output_directory_is_config_error() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    write(src.path(), "a.py", b"x=1");

    let err = consolidator()
        .consolidate(src.path(), &FilterConfig::default(), out.path(), false)
        .expect_err("A directory is not a valid output path");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_root_that_is_a_file_is_config_error() {
    let out = TempDir::new().expect("Failed to create temp dir");
    let file = out.path().join("file.txt");
    fs::write(&file, "x").expect("Failed to write file");

    let err = consolidator()
        .consolidate(&file, &FilterConfig::default(), &out.path().join("o.txt"), false)
        .expect_err("A file is not a valid root");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_concurrent_runs_are_serialized() {
    let src = TempDir::new().expect("Failed to create temp dir");
    let out = TempDir::new().expect("Failed to create temp dir");
    for i in 0..20 {
        write(src.path(), &format!("m{:02}.py", i), format!("value = {}\n", i).as_bytes());
    }

    let consolidator = consolidator();
    let output = out.path().join("bundle.txt");
    let filter = FilterConfig::default();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                consolidator
                    .consolidate(src.path(), &filter, &output, false)
                    .expect("Concurrent run failed");
            });
        }
    });

    let text = fs::read_to_string(&output).expect("Failed to read output");
    assert_eq!(text.matches("### End of file ###").count(), 20);
    let leftovers: Vec<_> = fs::read_dir(out.path()).expect("Failed to list dir").collect();
    assert_eq!(leftovers.len(), 1);
}
