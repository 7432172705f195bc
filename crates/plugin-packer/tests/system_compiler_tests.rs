#![cfg(unix)]

/// Binary packaging against a real compiler process.
///
/// Kept to a single test: the script is written and then executed, and a
/// concurrent fork elsewhere in the same binary could hold it open for
/// writing at exec time.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use plugin_packer::{BinaryOptions, PackError, PackagingEngine, PackagingRequest};
use tempfile::TempDir;

#[test]
fn test_failing_compiler_script_reports_output_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let plugin = tmp.path().join("plugin");
    let out = tmp.path().join("out");
    fs::create_dir_all(&plugin).unwrap();
    fs::create_dir_all(&out).unwrap();
    fs::write(plugin.join("A.kt"), "fun a( = 1\n").unwrap();

    let compiler = tmp.path().join("kotlinc");
    fs::write(&compiler, "#!/bin/sh\necho 'A.kt:1:7: syntax error' >&2\nexit 1\n").unwrap();
    fs::set_permissions(&compiler, fs::Permissions::from_mode(0o755)).unwrap();

    let request = PackagingRequest::binary("demo", &out, BinaryOptions::new(&compiler))
        .source_path(&plugin);
    let outcome = PackagingEngine::new().package(&request);

    match &outcome.error {
        Some(PackError::CompilationFailed { exit_code, output }) => {
            assert_eq!(*exit_code, Some(1));
            assert!(output.contains("syntax error"), "output: {:?}", output);
        }
        other => panic!("Expected CompilationFailed, got {:?}", other),
    }
    assert_eq!(outcome.artifact_path, out.join("demo.jar"));
    assert!(!out.join("demo.jar").exists());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}
