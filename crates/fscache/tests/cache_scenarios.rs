//! End-to-end behavior of the mirror over an in-memory bucket.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fscache::entry::{DIR_CACHED_MARKER, DOWNLOAD_SUFFIX};
use fscache::{
    Bucket, BucketRemote, CacheError, CacheOptions, CacheResult, CachedFs, FileRecord, LocalEntry,
    MemoryBucket, NotifyFile, Remote,
};
use tempfile::TempDir;

fn mtime() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_600_000_000)
}

fn bucket() -> Arc<MemoryBucket> {
    let bucket = Arc::new(MemoryBucket::new());
    bucket.insert_file("d/a.txt", "abc", mtime()).unwrap();
    bucket.insert_dir("d/sub", mtime()).unwrap();
    bucket
}

async fn online(local: &Path, bucket: &Arc<MemoryBucket>) -> CachedFs {
    CachedFs::with_bucket(local, bucket.clone(), CacheOptions::online())
        .await
        .unwrap()
}

/// Open `name` as a directory and wait for its stubs.
async fn list(fs: &CachedFs, name: &str) -> Vec<FileRecord> {
    let mut dir = fs.open(name).await.unwrap();
    let entries = dir.readdir().await.unwrap();
    if let Some(population) = dir.population() {
        population.wait().await.unwrap();
    }
    dir.close().await.unwrap();
    entries
}

fn names(entries: &[FileRecord]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

/// Names of unfinished downloads anywhere under `dir`.
fn leftover_downloads(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    for item in std::fs::read_dir(dir).unwrap() {
        let item = item.unwrap();
        let name = item.file_name().to_string_lossy().into_owned();
        if name.ends_with(DOWNLOAD_SUFFIX) {
            found.push(name);
        } else if item.file_type().unwrap().is_dir() {
            found.extend(leftover_downloads(&item.path()));
        }
    }
    found
}

/// A bucket whose reads take a while.
struct SlowBucket(Arc<MemoryBucket>);

#[async_trait]
impl Bucket for SlowBucket {
    async fn stat(&self, path: &Path) -> CacheResult<FileRecord> {
        self.0.stat(path).await
    }

    async fn readdir(&self, path: &Path) -> CacheResult<Vec<FileRecord>> {
        self.0.readdir(path).await
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> CacheResult<Vec<u8>> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.0.read(path, offset, size).await
    }
}

#[tokio::test]
async fn first_listing_populates_stubs_and_marker() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let fs = online(local.path(), &bucket).await;

    let entries = list(&fs, "/d").await;
    assert_eq!(names(&entries), vec!["a.txt", "sub"]);
    assert_eq!(entries[0].size, 3);
    assert!(entries[1].is_dir());

    let d = local.path().join("d");
    assert!(d.join(DIR_CACHED_MARKER).exists());
    match LocalEntry::load(&d.join("a.txt")).await.unwrap() {
        LocalEntry::Stub(record) => {
            assert_eq!(record.size, 3);
            assert_eq!(record.mtime, mtime());
        }
        other => panic!("expected stub, got {other:?}"),
    }
    assert!(d.join("sub").is_dir());
}

#[tokio::test]
async fn marked_listing_is_served_locally() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let fs = online(local.path(), &bucket).await;

    let first = list(&fs, "/d").await;
    let calls = bucket.calls();

    let second = list(&fs, "/d").await;
    assert_eq!(bucket.calls(), calls);
    assert_eq!(second, first);
    assert_eq!(names(&second), vec!["a.txt", "sub"]);
    assert!(second[0].is_remote());
    assert_eq!(second[1].mtime, mtime());
    assert_eq!(second[1].size, 0);

    // Populating the nested directory leaves its entry in the parent alone.
    list(&fs, "/d/sub").await;
    assert_eq!(list(&fs, "/d").await, first);
}

#[tokio::test]
async fn fetch_materializes_on_close() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let fs = online(local.path(), &bucket).await;
    list(&fs, "/d").await;

    let mut file = fs.open("/d/a.txt").await.unwrap();
    assert!(file.is_remote());
    assert_eq!(file.read_to_end().await.unwrap(), b"abc");
    file.close().await.unwrap();

    let path = local.path().join("d/a.txt");
    let meta = std::fs::symlink_metadata(&path).unwrap();
    assert!(meta.file_type().is_file());
    assert_eq!(meta.modified().unwrap(), mtime());
    assert!(leftover_downloads(local.path()).is_empty());

    let (record, flagged) = fs.remote().lstat(&path).await.unwrap();
    assert!(!flagged);
    assert_eq!(record.size, 3);

    // Served from disk from now on.
    let calls = bucket.calls();
    let mut file = fs.open("/d/a.txt").await.unwrap();
    assert!(!file.is_remote());
    assert_eq!(file.read_to_end().await.unwrap(), b"abc");
    file.close().await.unwrap();
    assert_eq!(bucket.calls(), calls);
}

#[tokio::test]
async fn offline_refuses_what_is_not_local() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();

    let offline = CachedFs::with_bucket(local.path(), bucket.clone(), CacheOptions::offline())
        .await
        .unwrap();
    assert!(offline.is_offline());
    assert!(matches!(offline.open("/d").await, Err(CacheError::Offline)));

    let fs = online(local.path(), &bucket).await;
    list(&fs, "/d").await;
    let calls = bucket.calls();

    // Stub content cannot be served, and stubs are not listed.
    assert!(matches!(offline.open("/d/a.txt").await, Err(CacheError::Offline)));
    assert_eq!(names(&list(&offline, "/d").await), vec!["sub"]);
    // The nested directory has no marker yet.
    assert!(matches!(offline.open("/d/sub").await, Err(CacheError::Offline)));
    assert_eq!(bucket.calls(), calls);

    let mut file = fs.open("/d/a.txt").await.unwrap();
    file.read_to_end().await.unwrap();
    file.close().await.unwrap();

    let mut file = offline.open("/d/a.txt").await.unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), b"abc");
    assert_eq!(names(&list(&offline, "/d").await), vec!["a.txt", "sub"]);
}

#[tokio::test]
async fn failed_stub_withholds_marker() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let fs = online(local.path(), &bucket).await;

    // A regular file where the remote has a directory.
    std::fs::create_dir_all(local.path().join("d")).unwrap();
    std::fs::write(local.path().join("d/sub"), "in the way").unwrap();

    let mut dir = fs.open("/d").await.unwrap();
    let report = dir.population().unwrap().wait().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(!report.marked);
    assert!(!local.path().join("d").join(DIR_CACHED_MARKER).exists());

    // Still unmarked, so the next listing goes back to the remote.
    let readdirs = bucket.calls().readdir;
    list(&fs, "/d").await;
    assert_eq!(bucket.calls().readdir, readdirs + 1);
}

#[tokio::test]
async fn unknown_names_are_discovered_remotely() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let fs = online(local.path(), &bucket).await;

    let mut file = fs.open("/d/a.txt").await.unwrap();
    assert_eq!(file.stat().size, 3);
    file.read_to_end().await.unwrap();
    file.close().await.unwrap();
    assert!(local.path().join("d/a.txt").is_file());

    // The parent exists now but was never listed.
    assert!(!local.path().join("d").join(DIR_CACHED_MARKER).exists());
    let entries = list(&fs, "/d").await;
    assert_eq!(names(&entries), vec!["a.txt", "sub"]);
    assert!(local.path().join("d").join(DIR_CACHED_MARKER).exists());

    assert!(fs.open("/d/missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn nested_directories_populate_on_demand() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    bucket.insert_file("d/sub/deep.txt", "deep", mtime()).unwrap();
    let fs = online(local.path(), &bucket).await;

    list(&fs, "/d").await;
    assert!(!local.path().join("d/sub").join(DIR_CACHED_MARKER).exists());

    let entries = list(&fs, "/d/sub").await;
    assert_eq!(names(&entries), vec!["deep.txt"]);
    assert!(local.path().join("d/sub").join(DIR_CACHED_MARKER).exists());
}

#[tokio::test]
async fn root_listing_hides_internal_files() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    bucket.insert_file("top.txt", "t", mtime()).unwrap();
    let fs = online(local.path(), &bucket).await;

    assert_eq!(names(&list(&fs, "/").await), vec!["d", "top.txt"]);
    assert!(local.path().join(DIR_CACHED_MARKER).exists());
    assert_eq!(names(&list(&fs, "/").await), vec!["d", "top.txt"]);
}

#[tokio::test]
async fn without_cache_file_content_is_not_kept() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let options = CacheOptions::online().with_cache_file(false);
    let fs = CachedFs::with_bucket(local.path(), bucket.clone(), options)
        .await
        .unwrap();

    assert_eq!(names(&list(&fs, "/d").await), vec!["a.txt", "sub"]);

    for _ in 0..2 {
        let mut file = fs.open("/d/a.txt").await.unwrap();
        assert!(file.is_remote());
        assert_eq!(file.read_to_end().await.unwrap(), b"abc");
        file.close().await.unwrap();
    }

    // The stub stays a stub.
    let path = local.path().join("d/a.txt");
    assert!(matches!(LocalEntry::load(&path).await.unwrap(), LocalEntry::Stub(_)));
    // Each pass reads the content and then hits EOF.
    assert_eq!(bucket.calls().read, 4);
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, i64)>>,
}

impl NotifyFile for Recorder {
    fn notify_file(&self, name: &str, record: &FileRecord) {
        self.seen.lock().unwrap().push((name.to_string(), record.size));
    }
}

#[tokio::test]
async fn materialized_files_are_announced() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let recorder = Arc::new(Recorder::default());
    let remote = BucketRemote::new(bucket.clone()).with_notify(recorder.clone());
    let fs = CachedFs::new(local.path(), Arc::new(remote), false).await.unwrap();

    // Partial reads still persist the whole file.
    let mut file = fs.open("/d/a.txt").await.unwrap();
    let mut buf = [0u8; 1];
    file.read(&mut buf).await.unwrap();
    file.close().await.unwrap();

    assert_eq!(std::fs::read(local.path().join("d/a.txt")).unwrap(), b"abc");
    assert_eq!(*recorder.seen.lock().unwrap(), vec![("/d/a.txt".to_string(), 3)]);

    // Directories and local files are not announced.
    list(&fs, "/d").await;
    let mut file = fs.open("/d/a.txt").await.unwrap();
    file.close().await.unwrap();
    assert_eq!(recorder.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn wait_idle_covers_detached_populations() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let remote = Arc::new(BucketRemote::new(bucket.clone()));
    let fs = CachedFs::new(local.path(), remote.clone(), false).await.unwrap();

    // Dropping the handle detaches the population.
    drop(fs.open("/d").await.unwrap());
    remote.wait_idle().await;
    assert!(local.path().join("d").join(DIR_CACHED_MARKER).exists());
}

#[tokio::test]
async fn parent_components_are_rejected() {
    let local = TempDir::new().unwrap();
    let fs = online(local.path(), &bucket()).await;
    assert!(matches!(
        fs.open("/d/../../etc/passwd").await,
        Err(CacheError::PathEscapesRoot(_))
    ));
}

#[tokio::test]
async fn config_drives_a_local_bucket() {
    let remote_dir = TempDir::new().unwrap();
    std::fs::create_dir(remote_dir.path().join("img")).unwrap();
    std::fs::write(remote_dir.path().join("img/logo.png"), "png").unwrap();

    let local = TempDir::new().unwrap();
    let conf = fscache::CacheConfig::new(remote_dir.path().display().to_string());
    fscache::config::write_config(local.path(), &conf).await.unwrap();

    let fs = CachedFs::open_dir(local.path(), false).await.unwrap();
    assert_eq!(names(&list(&fs, "/").await), vec!["img"]);

    let mut file = fs.open("/img/logo.png").await.unwrap();
    assert_eq!(file.read_to_end().await.unwrap(), b"png");
    file.close().await.unwrap();
    assert_eq!(std::fs::read(local.path().join("img/logo.png")).unwrap(), b"png");

    // Second listing is local and still hides the config file.
    assert_eq!(names(&list(&fs, "/").await), vec!["img"]);
}

#[tokio::test]
async fn concurrent_closes_of_one_file() {
    let local = TempDir::new().unwrap();
    let bucket = Arc::new(MemoryBucket::new());
    let content: Vec<u8> = (0..24 * 1024).map(|i| (i % 251) as u8).collect();
    bucket.insert_file("a.bin", content.clone(), mtime()).unwrap();
    let slow = Arc::new(SlowBucket(bucket.clone()));
    let fs = CachedFs::with_bucket(local.path(), slow, CacheOptions::online())
        .await
        .unwrap();

    let a = fs.open("/a.bin").await.unwrap();
    let b = fs.open("/a.bin").await.unwrap();
    assert!(a.is_remote() && b.is_remote());

    let (closed_a, closed_b) = tokio::join!(a.close(), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        b.close().await
    });
    closed_a.unwrap();
    closed_b.unwrap();

    let path = local.path().join("a.bin");
    assert_eq!(std::fs::read(&path).unwrap(), content);
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), mtime());
    assert!(leftover_downloads(local.path()).is_empty());
}

#[tokio::test]
async fn concurrent_listings_both_mark() {
    let local = TempDir::new().unwrap();
    let bucket = Arc::new(MemoryBucket::new());
    for i in 0..150 {
        bucket.insert_file(format!("d/f{i:03}"), "x", mtime()).unwrap();
    }
    bucket.insert_dir("d/sub", mtime()).unwrap();
    let fs = online(local.path(), &bucket).await;

    let (a, b) = tokio::join!(fs.open("/d"), fs.open("/d"));
    let (mut a, mut b) = (a.unwrap(), b.unwrap());
    let (report_a, report_b) = tokio::join!(
        a.population().unwrap().wait(),
        b.population().unwrap().wait(),
    );
    for report in [report_a.unwrap(), report_b.unwrap()] {
        assert_eq!(report.written, 151);
        assert_eq!(report.failed, 0);
        assert!(report.marked);
    }

    let entries = list(&fs, "/d").await;
    assert_eq!(entries.len(), 151);
    assert!(entries.iter().filter(|e| !e.is_dir()).all(|e| e.is_remote()));
}

#[tokio::test]
async fn malformed_stub_is_fetched_again() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let fs = online(local.path(), &bucket).await;
    list(&fs, "/d").await;

    let path = local.path().join("d/a.txt");
    std::fs::remove_file(&path).unwrap();
    std::os::unix::fs::symlink("not-a-stub!", &path).unwrap();

    let mut file = fs.open("/d/a.txt").await.unwrap();
    assert!(file.is_remote());
    assert_eq!(file.read_to_end().await.unwrap(), b"abc");
    file.close().await.unwrap();

    let meta = std::fs::symlink_metadata(&path).unwrap();
    assert!(meta.file_type().is_file());
    assert_eq!(meta.modified().unwrap(), mtime());
    assert_eq!(std::fs::read(&path).unwrap(), b"abc");
}

#[tokio::test]
async fn stale_stub_is_replaced_by_directory() {
    let local = TempDir::new().unwrap();
    let bucket = bucket();
    let fs = online(local.path(), &bucket).await;
    list(&fs, "/d").await;

    // "a.txt" became a directory on the remote after it was stubbed.
    bucket.remove("d/a.txt").unwrap();
    bucket.insert_file("d/a.txt/inner", "i", mtime()).unwrap();

    assert_eq!(names(&list(&fs, "/d/a.txt").await), vec!["inner"]);
    let dir = local.path().join("d/a.txt");
    assert!(std::fs::symlink_metadata(&dir).unwrap().is_dir());
    assert!(dir.join(DIR_CACHED_MARKER).exists());

    // Marked now, so served without the remote.
    let calls = bucket.calls();
    assert_eq!(names(&list(&fs, "/d/a.txt").await), vec!["inner"]);
    assert_eq!(bucket.calls(), calls);
}
