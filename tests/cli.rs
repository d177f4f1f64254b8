use assert_cmd::Command;
use predicates::prelude::*;

fn embed_server() -> Command {
    let mut cmd = Command::cargo_bin("embed-server").unwrap();
    // Keep the caller's environment from steering the binary.
    for var in [
        "EMBED_ARTIFACT_ROOT",
        "EMBED_TOKENIZER_DIR",
        "EMBED_MODEL_PATH",
        "EMBED_LOG_DIR",
        "EMBED_LOG",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn help_lists_options() {
    embed_server()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--artifact-root"))
        .stdout(predicate::str::contains("--check"));
}

#[test]
fn check_fails_on_missing_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    embed_server()
        .args(["--check", "--artifact-root"])
        .arg(tmp.path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to load tokenizer"));
}

#[test]
fn check_fails_on_missing_model() {
    let tmp = tempfile::tempdir().unwrap();
    let fixture = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tokenizer");
    embed_server()
        .args(["--check", "--artifact-root"])
        .arg(tmp.path())
        .arg("--tokenizer-dir")
        .arg(&fixture)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load model"));
}

#[test]
fn rejects_unknown_flags() {
    embed_server().arg("--no-such-flag").assert().failure();
}
