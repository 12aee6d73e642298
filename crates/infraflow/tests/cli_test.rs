#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const DEMO: &str = include_str!("../../../demos/form-sink/infra.kdl");

/// 環境変数の影響を受けないコマンド
fn infraflow(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("infraflow").unwrap();
    cmd.current_dir(dir)
        .env_remove("INFRAFLOW_CONFIG_PATH")
        .env_remove("INFRAFLOW_FOLDER_ID")
        .env_remove("INFRAFLOW_ZONE")
        .env_remove("INFRAFLOW_PARALLELISM")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

/// デモプロジェクトを一時ディレクトリに配置
fn demo_project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("infra.kdl"), DEMO).unwrap();
    dir
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("infraflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("依存関係の順に"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("state"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("infraflow").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("infraflow"));
}

/// applyコマンドのヘルプにオプションが表示されることを確認
#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("infraflow").unwrap();
    cmd.arg("apply")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--set"))
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--parallelism"));
}

/// プロジェクトファイルが無い場所では validate が失敗する
#[test]
fn test_validate_outside_project() {
    let dir = tempfile::tempdir().unwrap();
    infraflow(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("設定エラー"));
}

#[test]
fn test_validate_demo_project() {
    let dir = demo_project();
    infraflow(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("設定ファイルは正常です"))
        .stdout(predicate::str::contains("ノード: 16個（うち作成対象 14個）"));
}

#[test]
fn test_graph_lists_nodes_in_dependency_order() {
    let dir = demo_project();
    let output = infraflow(dir.path()).arg("graph").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let network = stdout.find(". network.form-net").unwrap();
    let subnet = stdout.find(". subnet.form-subnet").unwrap();
    assert!(network < subnet);
    assert!(stdout.contains("function.form-handler (count = 0)"));
}

#[test]
fn test_unknown_local_override_fails() {
    let dir = demo_project();
    infraflow(dir.path())
        .args(["plan", "--set", "no_such_local=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no_such_local"));

    infraflow(dir.path())
        .args(["plan", "--set", "missing-equals"])
        .assert()
        .failure();
}

/// plan → apply → 再plan → 機能フラグの切り替え → destroy の一連の流れ
#[test]
fn test_apply_lifecycle() {
    let dir = demo_project();

    infraflow(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("+ bucket.forms"))
        .stdout(predicate::str::contains("<= data.secret_version.form-keys"))
        .stdout(predicate::str::contains("作成 14, 変更 0"))
        .stdout(predicate::str::contains("function.form-handler").not());

    // plan は状態を書き込まない
    assert!(!dir.path().join(".infraflow/state.json").exists());

    infraflow(dir.path())
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("適用が完了しました（成功 14 件"))
        .stdout(predicate::str::contains("bucket = \"form-sink-submissions\""))
        .stdout(predicate::str::contains("storage_secret_key = (sensitive)"));

    assert!(dir.path().join(".infraflow/state.json").exists());
    assert!(dir.path().join(".infraflow/local-cloud.json").exists());

    infraflow(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("変更はありません"));

    infraflow(dir.path())
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bucket.forms"))
        .stdout(predicate::str::contains("data.secret_version.form-keys"))
        .stdout(predicate::str::contains("role_binding.storage-admin"));

    infraflow(dir.path())
        .args(["state", "show", "static_access_key.storage-key"])
        .assert()
        .success()
        .stdout(predicate::str::contains("access_key = \"YCAJ"))
        .stdout(predicate::str::contains("secret_key = (sensitive)"));

    infraflow(dir.path())
        .args(["state", "show", "function.form-handler"])
        .assert()
        .failure();

    infraflow(dir.path())
        .args(["plan", "--set", "function_enabled=1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ function.form-handler"))
        .stdout(predicate::str::contains("+ function_iam_binding.public-invoke"))
        .stdout(predicate::str::contains("作成 2, 変更 0"));

    infraflow(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("- bucket.forms"))
        .stdout(predicate::str::contains("適用が完了しました"));

    infraflow(dir.path())
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("リソースはありません"));
}

/// 確認に同意しなければ何も変更しない
#[test]
fn test_apply_without_confirmation_changes_nothing() {
    let dir = demo_project();
    infraflow(dir.path())
        .arg("apply")
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("キャンセルしました"));

    assert!(!dir.path().join(".infraflow/state.json").exists());
}
