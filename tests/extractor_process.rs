//! Media-extractor task driven by a fake helper script.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aiodl::config::{CoreContext, CorePaths, SettingsSnapshot};
use aiodl::downloader::DownloadManager;
use aiodl::model::record::{status_text, MediaFormat, MediaInfo, TaskStatus};

fn write_script(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

fn manager_with_helper(script: &Path) -> (Arc<DownloadManager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let paths = CorePaths::under_root(dir.path());
    paths.ensure().unwrap();
    let mut settings = SettingsSnapshot::default();
    settings.extractor_program = script.to_path_buf();
    settings.auto_resume_max_errors = 3;
    let ctx = Arc::new(CoreContext::new(paths, settings));
    (DownloadManager::new(ctx), dir)
}

fn test_media() -> (MediaInfo, MediaFormat) {
    (
        MediaInfo {
            url: "https://video.example/watch/1".into(),
            title: "My Clip".into(),
            referer: None,
            thumbnail_url: None,
            cookie: Some("sid=abc".into()),
        },
        MediaFormat {
            format_id: "best".into(),
            resolution: "720p".into(),
            vcodec: None,
            is_from_social: false,
        },
    )
}

async fn drive_until(
    manager: &Arc<DownloadManager>,
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) {
    let deadline = Instant::now() + timeout;
    loop {
        manager.tick().await;
        if condition() {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "condition not reached within {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn known_failure_substring_maps_and_stops() {
    let script_dir = tempfile::tempdir().unwrap();
    let script = script_dir.path().join("fake-extractor.sh");
    let counter = script_dir.path().join("invocations");
    write_script(
        &script,
        &format!(
            "#!/bin/sh\necho run >> {}\necho 'ERROR: Requested format is not available' 1>&2\nexit 1\n",
            counter.display()
        ),
    );

    let (manager, _dir) = manager_with_helper(&script);
    let (info, format) = test_media();
    let record = manager.new_media_record(info, format);
    let id = record.id;
    manager.add(record).await.unwrap();

    drive_until(&manager, Duration::from_secs(20), || {
        manager
            .snapshot(id)
            .map(|r| r.is_extractor_error)
            .unwrap_or(false)
    })
    .await;

    let snapshot = manager.snapshot(id).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Close);
    assert!(!snapshot.is_running);
    assert_eq!(
        snapshot.extractor_error_message.as_deref(),
        Some(status_text::FORMAT_NOT_FOUND)
    );
    assert_eq!(snapshot.status_info, status_text::PAUSED);

    // Mapped failures are never retried
    tokio::time::sleep(Duration::from_millis(300)).await;
    let invocations = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(invocations.lines().count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn helper_success_adopts_output() {
    let script_dir = tempfile::tempdir().unwrap();
    let script = script_dir.path().join("fake-extractor.sh");
    // Emit progress, then produce the artifact next to the -o path with a
    // helper-chosen extension
    write_script(
        &script,
        concat!(
            "#!/bin/sh\n",
            "out=\"\"\n",
            "prev=\"\"\n",
            "for a in \"$@\"; do\n",
            "  if [ \"$prev\" = \"-o\" ]; then out=\"$a\"; fi\n",
            "  prev=\"$a\"\n",
            "done\n",
            "echo '[download]  50.0% of ~1.00MiB at 512KiB/s'\n",
            "printf 'extracted-media-bytes' > \"$out.mp4\"\n",
            "echo '[download] 100% of 1.00MiB'\n",
            "exit 0\n"
        ),
    );

    let (manager, _dir) = manager_with_helper(&script);
    let (info, format) = test_media();
    let record = manager.new_media_record(info, format);
    let id = record.id;
    manager.add(record).await.unwrap();

    drive_until(&manager, Duration::from_secs(20), || {
        manager.snapshot(id).map(|r| r.is_complete).unwrap_or(false)
    })
    .await;

    let snapshot = manager.snapshot(id).unwrap();
    assert_eq!(snapshot.progress_percent, 100);
    assert_eq!(snapshot.file_name, "My Clip.mp4");
    assert_eq!(snapshot.file_size, "extracted-media-bytes".len() as i64);
    assert!(snapshot.extractor_command.is_some());

    let destination = snapshot.destination_path();
    assert_eq!(std::fs::read(&destination).unwrap(), b"extracted-media-bytes");

    // The cookies temp written for the helper is gone after completion
    assert!(!manager.store().cookies_path(id).exists());
}
