//! Integration tests for the TickTrek CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "TICKTREK_PORT",
    "TICKTREK_HOST",
    "TICKTREK_DEV_MODE",
    "TICKTREK_DATA_PATH",
    "TICKTREK_REQUIRE_APPROVAL",
    "TICKTREK_SESSION_TTL_HOURS",
    "TICKTREK_LOG_JSON",
];

/// Helper to create a ticktrek Command isolated from the caller's env
fn ticktrek() -> Command {
    let mut cmd = cargo_bin_cmd!("ticktrek");
    for name in ENV_VARS {
        cmd.env_remove(name);
    }
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir) {
    ticktrek()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn read_data(dir: &TempDir) -> serde_json::Value {
    let content = fs::read_to_string(dir.path().join(".ticktrek/data.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        ticktrek()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("invite"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn test_version() {
        ticktrek()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("ticktrek"));
    }

    #[test]
    fn test_unknown_command_fails() {
        ticktrek().arg("frobnicate").assert().failure();
    }

    #[test]
    fn test_serve_help_lists_flags() {
        ticktrek()
            .args(["serve", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--port"))
            .stdout(predicate::str::contains("--dev"));
    }
}

// =============================================================================
// Init
// =============================================================================

mod init {
    use super::*;

    #[test]
    fn test_init_creates_config_and_data() {
        let dir = create_temp_project();

        ticktrek()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"))
            .stdout(predicate::str::contains("Seeded data file"))
            .stdout(predicate::str::contains("admin.user@ticktrek-inc"));

        assert!(dir.path().join(".ticktrek/ticktrek.toml").exists());
        let data = read_data(&dir);
        assert_eq!(data["organizations"][0]["id"], "ticktrek-inc");
        assert_eq!(data["users"][0]["role"], "admin");
        let hash = data["users"][0]["passwordHash"].as_str().unwrap();
        assert!(hash.starts_with("$argon2"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        ticktrek()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Using existing"))
            .stdout(predicate::str::contains("already present"));
    }

    #[test]
    fn test_init_honors_project_dir_flag() {
        let dir = create_temp_project();

        ticktrek()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("init")
            .assert()
            .success();

        assert!(dir.path().join(".ticktrek/data.json").exists());
    }
}

// =============================================================================
// Invite
// =============================================================================

mod invite {
    use super::*;

    #[test]
    fn test_invite_for_seed_org() {
        let dir = create_temp_project();
        init_project(&dir);

        ticktrek()
            .current_dir(dir.path())
            .args(["invite", "ticktrek-inc"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Invite token: invite-"))
            .stdout(predicate::str::contains("/signup?token=invite-"));

        let data = read_data(&dir);
        let tokens = data["organizations"][0]["inviteTokens"].as_array().unwrap();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_invite_for_unknown_org_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        ticktrek()
            .current_dir(dir.path())
            .args(["invite", "globex"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("globex"));
    }

    #[test]
    fn test_invite_refuses_data_file_held_by_server() {
        let dir = create_temp_project();
        init_project(&dir);

        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.path().join(".ticktrek/data.lock"))
            .unwrap();
        fs2::FileExt::try_lock_exclusive(&lock).unwrap();

        ticktrek()
            .current_dir(dir.path())
            .args(["invite", "ticktrek-inc"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("in use"))
            .stderr(predicate::str::contains("POST /api/invites"));

        let data = read_data(&dir);
        assert!(data["organizations"][0]["inviteTokens"].as_array().unwrap().is_empty());

        // init only reads an existing data file
        ticktrek()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already present"));
    }
}

// =============================================================================
// Config
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_without_file() {
        let dir = create_temp_project();

        ticktrek()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("port = 3141"))
            .stdout(predicate::str::contains("ticktrek config init"));
    }

    #[test]
    fn test_config_show_applies_env() {
        let dir = create_temp_project();

        ticktrek()
            .current_dir(dir.path())
            .env("TICKTREK_PORT", "4555")
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("bind = 127.0.0.1:4555"));
    }

    #[test]
    fn test_config_show_hides_seed_password() {
        let dir = create_temp_project();
        init_project(&dir);

        ticktrek()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("seed_admin_password = (hidden)"))
            .stdout(predicate::str::contains("password123").not());
    }

    #[test]
    fn test_config_init_then_exists() {
        let dir = create_temp_project();

        ticktrek()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created ticktrek.toml"));

        assert!(dir.path().join(".ticktrek/ticktrek.toml").exists());

        ticktrek()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_without_file() {
        let dir = create_temp_project();

        ticktrek()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".ticktrek")).unwrap();
        fs::write(
            dir.path().join(".ticktrek/ticktrek.toml"),
            "[auth]\nsession_ttl_hours = 0\n",
        )
        .unwrap();

        ticktrek()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("session_ttl_hours"));
    }

    #[test]
    fn test_config_validate_rejects_bad_toml() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".ticktrek")).unwrap();
        fs::write(dir.path().join(".ticktrek/ticktrek.toml"), "[server\n").unwrap();

        ticktrek()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ticktrek.toml"));
    }
}
