use std::process::Command;

fn classpatch() -> Command {
    let binary = std::env::var("CARGO_BIN_EXE_classpatch").unwrap_or_else(|_| {
        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("classpatch");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    });
    Command::new(binary)
}

#[test]
fn classpatch_exits_non_zero_on_missing_input() {
    let output = classpatch()
        .arg("--input")
        .arg("missing.class")
        .output()
        .expect("run classpatch");

    assert!(!output.status.success());
}

#[test]
fn classpatch_exits_non_zero_on_missing_patch() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = classpatch()
        .arg("--input")
        .arg(temp.path())
        .arg("--patch")
        .arg(temp.path().join("missing.patch"))
        .output()
        .expect("run classpatch");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing.patch"), "{stderr}");
}

#[test]
fn classpatch_requires_an_input() {
    let output = classpatch().output().expect("run classpatch");

    assert!(!output.status.success());
}
