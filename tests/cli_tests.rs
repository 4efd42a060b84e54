use assert_cmd::Command;
use std::fs;
use std::path::Path;
use satchel::archive::Archiver;
use satchel::config::Settings;
use serde_json::json;
use tempfile::tempdir;

fn satchel(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("satchel").unwrap();
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .arg("--cache-dir")
        .arg(dir.join("cache"));
    cmd
}

fn stdout(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn test_init_creates_project_layout() {
    let dir = tempdir().unwrap();
    satchel(dir.path()).arg("init").assert().success();

    assert!(dir.path().join(".satchel").is_dir());
    assert!(dir.path().join("satchel.toml").is_file());
    let lock = fs::read_to_string(dir.path().join("satchel-lock.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&lock).unwrap();
    assert_eq!(value["tools"], json!({}));
}

#[test]
fn test_list_requires_init() {
    let dir = tempdir().unwrap();
    satchel(dir.path()).arg("list").assert().failure();

    satchel(dir.path()).arg("init").assert().success();
    let out = stdout(satchel(dir.path()).arg("list"));
    assert!(out.contains("No tools installed"));
}

#[test]
fn test_pack_hash_and_verify() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("my-agent");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("agent.md"), "# my agent").unwrap();
    fs::write(src.join(".DS_Store"), "junk").unwrap();

    let out = stdout(satchel(dir.path()).args(["pack", "my-agent", "my-agent.zip"]));
    assert!(out.contains("1 entries"));

    let digest = stdout(satchel(dir.path()).args(["hash", "my-agent.zip"]));
    let digest = digest.trim();
    assert_eq!(digest.len(), 64);
    assert!(out.contains(digest));

    satchel(dir.path())
        .args(["verify", "my-agent.zip", digest])
        .assert()
        .success();
    satchel(dir.path())
        .args(["verify", "my-agent.zip", &"0".repeat(64)])
        .assert()
        .failure();
}

#[test]
fn test_cache_status_on_empty_cache() {
    let dir = tempdir().unwrap();
    let out = stdout(satchel(dir.path()).args(["cache", "status"]));
    assert!(out.contains("empty"));
    satchel(dir.path()).args(["cache", "clear"]).assert().success();
}

#[test]
fn test_install_from_local_registry() {
    let dir = tempdir().unwrap();
    let registry_dir = dir.path().join("registry");
    let project = dir.path().join("project");
    fs::create_dir_all(registry_dir.join("agents")).unwrap();
    fs::create_dir_all(&project).unwrap();

    let src = dir.path().join("tool-a");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("agent.md"), "# tool a").unwrap();
    let archiver = Archiver::new(dir.path()).unwrap();
    let archive = registry_dir.join("agents").join("tool-a.zip");
    archiver.create(&src, &archive).unwrap();

    let registry = json!({
        "version": "1.0",
        "updated_at": "2026-01-10T12:00:00Z",
        "tools": {
            "agent": [{
                "name": "tool-a",
                "version": "1.0.0",
                "type": "agent",
                "description": "A test agent",
                "file": "agents/tool-a.zip",
                "sha256": archiver.hash(&archive).unwrap(),
            }]
        }
    });
    let registry_path = registry_dir.join("registry.json");
    fs::write(&registry_path, serde_json::to_vec_pretty(&registry).unwrap()).unwrap();

    let settings = Settings {
        registry_url: registry_path.display().to_string(),
        ..Settings::default()
    };
    settings.save(project.join("satchel.toml")).unwrap();

    satchel(&project).arg("init").assert().success();
    satchel(&project).args(["install", "tool-a@1.0.0"]).assert().success();
    assert_eq!(
        fs::read_to_string(project.join(".satchel").join("agents").join("tool-a").join("agent.md")).unwrap(),
        "# tool a"
    );

    let out = stdout(satchel(&project).arg("list"));
    assert!(out.contains("tool-a@1.0.0 (agent)"));
    let out = stdout(satchel(&project).arg("outdated"));
    assert!(out.contains("All tools are up to date"));
    let out = stdout(satchel(&project).args(["search", "test agent"]));
    assert!(out.contains("tool-a"));
    let out = stdout(satchel(&project).args(["cache", "status"]));
    assert!(out.contains("valid"));

    satchel(&project).args(["uninstall", "tool-a"]).assert().success();
    let out = stdout(satchel(&project).arg("list"));
    assert!(out.contains("No tools installed"));
}
