//! Module discovery and process-backed starts

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use freerds_session_manager::config::PropertyStore;
use freerds_session_manager::module::{BackendKind, ModuleDescriptor, ModuleError, ModuleManager, ProcessBackend};
use freerds_session_manager::session::SessionStore;

fn write_file(dir: &std::path::Path, name: &str, content: &str) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

#[test]
fn test_load_modules_skips_bad_descriptors() {
    let dir = tempfile::tempdir().unwrap();

    write_file(
        dir.path(),
        "x11.module.toml",
        r#"
name = "x11"
api_version = 1
kind = "x11"
command = "/usr/lib/freerds/freerds-x11"
args = ["--display", "{display}"]
"#,
    );
    write_file(
        dir.path(),
        "cef.module.toml",
        r#"
name = "Cef"
api_version = 1
kind = "cef"
command = "/usr/lib/freerds/freerds-cef"
endpoint_tag = "Browser"
"#,
    );
    write_file(
        dir.path(),
        "future.module.toml",
        r#"
name = "Future"
api_version = 2
kind = "command"
command = "/bin/true"
"#,
    );
    write_file(dir.path(), "broken.module.toml", "name = ");
    write_file(
        dir.path(),
        "ignored.toml",
        r#"
name = "Ignored"
api_version = 1
kind = "command"
command = "/bin/true"
"#,
    );

    let mut manager = ModuleManager::new(dir.path(), Duration::from_secs(1));
    let loaded = manager
        .load_modules_from_path(dir.path(), "*.module.toml")
        .unwrap();

    assert_eq!(loaded, 2);
    assert_eq!(manager.module_names(), vec!["CEF".to_string(), "X11".to_string()]);
    assert_eq!(manager.descriptor("cef").unwrap().endpoint_tag(), "Browser");
    assert!(manager.descriptor("future").is_none());
}

#[test]
fn test_invalid_pattern_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = ModuleManager::new(dir.path(), Duration::from_secs(1));
    let err = manager
        .load_modules_from_path(dir.path(), "[unclosed")
        .unwrap_err();
    assert!(matches!(err, ModuleError::InvalidPattern(_)));
}

#[tokio::test]
async fn test_backend_that_never_listens_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = ModuleManager::new(dir.path(), Duration::from_millis(300));
    manager
        .register(Arc::new(ProcessBackend::new(
            ModuleDescriptor::new("Sleeper", BackendKind::Command, "/bin/sleep").with_args(["30"]),
        )))
        .unwrap();

    let store = SessionStore::new();
    let session = store.create_session("alice", "corp", "Sleeper");

    let err = manager
        .start_module(&session, &PropertyStore::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ModuleError::StartFailed { .. }));
    assert!(err.to_string().contains("not ready"));
    assert_eq!(manager.running_count(), 0);
    assert!(!manager.is_running(session.session_id));
}

#[tokio::test]
async fn test_backend_exiting_early_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = ModuleManager::new(dir.path(), Duration::from_secs(10));
    manager
        .register(Arc::new(ProcessBackend::new(ModuleDescriptor::new(
            "Quitter",
            BackendKind::Command,
            "/bin/true",
        ))))
        .unwrap();

    let store = SessionStore::new();
    let session = store.create_session("alice", "corp", "Quitter");

    let started = std::time::Instant::now();
    let err = manager
        .start_module(&session, &PropertyStore::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("exited"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(manager.running_count(), 0);
}

#[tokio::test]
async fn test_missing_binary_fails_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = ModuleManager::new(dir.path(), Duration::from_secs(1));
    manager
        .register(Arc::new(ProcessBackend::new(ModuleDescriptor::new(
            "Ghost",
            BackendKind::Command,
            "/nonexistent/freerds-backend",
        ))))
        .unwrap();

    let store = SessionStore::new();
    let session = store.create_session("alice", "corp", "Ghost");

    let err = manager
        .start_module(&session, &PropertyStore::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::StartFailed { .. }));
    assert_eq!(manager.running_count(), 0);
}
