use super::*;

use std::sync::Arc;

use crate::fanout::Fanout;

fn write_stdout_header(dir: &Path) {
    std::fs::write(
        dir.join("stdout"),
        "{\"version\":2,\"width\":80,\"height\":24,\"timestamp\":0}\n",
    )
    .expect("write stdout header");
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn registers_external_session_once_metadata_is_readable() {
    let root = tempfile::tempdir().unwrap();
    let manager = Arc::new(Manager::new(
        root.path().to_path_buf(),
        Arc::new(Fanout::new()),
        CancellationToken::new(),
    ));

    let session_dir = root.path().join("ext-1");
    std::fs::create_dir_all(&session_dir).unwrap();
    write_stdout_header(&session_dir);

    let meta = crate::recording::SessionMetadata {
        id: "ext-1".to_owned(),
        name: None,
        command: vec!["bash".to_owned()],
        cwd: None,
        cols: 80,
        rows: 24,
        status: crate::recording::SessionStatus::Running,
        created_at: 0,
        pid: None,
        exit_code: None,
    };
    crate::recording::write_session_json_atomic(&session_dir, &meta).unwrap();

    let shutdown = CancellationToken::new();
    let watcher = Watcher::new(root.path().to_path_buf());
    let watch_manager = manager.clone();
    let watch_shutdown = shutdown.clone();
    let task = tokio::spawn(async move { watcher.run(watch_manager, watch_shutdown).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if manager.get("ext-1").await.is_ok() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("watcher never registered the external session");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    shutdown.cancel();
    let _ = task.await;
}

#[test]
fn list_entries_ignores_plain_files() {
    let root = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(root.path().join("a")).expect("mkdir a");
    std::fs::write(root.path().join("not-a-dir"), b"x").expect("write file");

    let entries = list_entries(root.path());
    assert_eq!(entries, vec!["a".to_owned()]);
}
