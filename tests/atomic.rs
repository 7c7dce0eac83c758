use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use jobmerge::atomic::AtomicWriter;
use jobmerge::error::PipelineError;
use jobmerge::store::Store;

fn root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

#[test]
fn interrupted_write_leaves_target_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let target = root(&temp).join("merojob_jobs.json");
    fs::write(target.as_std_path(), b"{\"original\": true}").unwrap();
    let before = fs::read(target.as_std_path()).unwrap();

    let writer = AtomicWriter::direct();
    let staged = writer.stage(&target, b"{\"replacement\": true}").unwrap();
    assert_eq!(
        fs::read(staged.temp_path()).unwrap(),
        b"{\"replacement\": true}"
    );
    // Process dies here: the rename never happens.
    std::mem::forget(staged);

    assert_eq!(fs::read(target.as_std_path()).unwrap(), before);
}

#[test]
fn abandoned_stage_is_cleaned_up() {
    let temp = tempfile::tempdir().unwrap();
    let target = root(&temp).join("jobs_master.csv");
    fs::write(target.as_std_path(), b"old").unwrap();

    let staged = AtomicWriter::direct().stage(&target, b"new").unwrap();
    let temp_path = staged.temp_path().to_path_buf();
    drop(staged);

    assert!(!temp_path.exists());
    assert_eq!(fs::read(target.as_std_path()).unwrap(), b"old");
}

#[test]
fn commit_replaces_content() {
    let temp = tempfile::tempdir().unwrap();
    let target = root(&temp).join("jobs_master.tsv");
    fs::write(target.as_std_path(), b"old").unwrap();

    AtomicWriter::direct()
        .stage(&target, b"new")
        .unwrap()
        .commit()
        .unwrap();

    assert_eq!(fs::read(target.as_std_path()).unwrap(), b"new");
    let leftovers = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn cache_mirror_is_kept() {
    let data = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let store = Store::new_with_paths(root(&data), Some(root(&cache)));
    let target = store.portal_audit_path("linkedin");

    AtomicWriter::for_store(&store)
        .write_bytes(&target, b"https://a\n")
        .unwrap();

    assert_eq!(fs::read(target.as_std_path()).unwrap(), b"https://a\n");
    let mirror = store.cache_path_for(&target).unwrap();
    assert_eq!(fs::read(mirror.as_std_path()).unwrap(), b"https://a\n");
}

#[cfg(unix)]
#[test]
fn unwritable_directory_is_a_partial_write() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempfile::tempdir().unwrap();
    let locked = root(&temp).join("locked");
    fs::create_dir(locked.as_std_path()).unwrap();
    let target = locked.join("jobs_master.csv");
    fs::write(target.as_std_path(), b"old").unwrap();
    fs::set_permissions(locked.as_std_path(), fs::Permissions::from_mode(0o555)).unwrap();

    // Root ignores directory permissions; nothing to observe then.
    if fs::write(locked.join("probe").as_std_path(), b"").is_ok() {
        return;
    }

    let err = AtomicWriter::direct()
        .write_bytes(&target, b"new")
        .unwrap_err();
    assert_matches!(err, PipelineError::PartialWrite { .. });
    assert_eq!(fs::read(target.as_std_path()).unwrap(), b"old");

    fs::set_permissions(locked.as_std_path(), fs::Permissions::from_mode(0o755)).unwrap();
}
