//! Integration tests for the zen command tree
//!
//! Commands run in-process against a scripted transport, with credentials
//! kept in memory.

use std::sync::Arc;

use chrono::TimeZone;
use clap::Parser;
use tempfile::TempDir;
use zen::auth::{ProviderId, StorageType};
use zen::clock::ManualClock;
use zen::config::ZenConfig;
use zen::testing::fixtures::{self, FixtureRepo};
use zen::testing::MockTransport;
use zen::ErrorKind;
use zen_cli::commands::{AssetsCommand, AuthCommand, TaskCommand};
use zen_cli::{AppContext, Cli, Commands};

fn context(dir: &TempDir, repo: &FixtureRepo) -> (AppContext, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    repo.serve(&transport);

    let mut config = ZenConfig::default();
    config.assets = fixtures::asset_settings(dir.path());
    config.auth.storage_type = StorageType::Memory;
    config.auth.prompt_disabled = true;

    let clock = ManualClock::new(chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    (
        AppContext::new(config, transport.clone(), clock.shared()),
        transport,
    )
}

fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<zen::ZenError>())
        .map(zen::ZenError::kind)
}

#[test]
fn test_parses_nested_commands() {
    let cli = Cli::try_parse_from([
        "zen", "assets", "list", "--type", "template", "--tag", "ai", "--tag", "technical",
        "--offset", "10", "--limit", "25",
    ])
    .unwrap();
    match cli.command {
        Commands::Assets {
            command:
                AssetsCommand::List {
                    tags,
                    offset,
                    limit,
                    ..
                },
        } => {
            assert_eq!(tags, vec!["ai", "technical"]);
            assert_eq!((offset, limit), (10, 25));
        }
        other => panic!("unexpected command: {other:?}"),
    }

    let cli = Cli::try_parse_from(["zen", "-vv", "auth", "logout", "gitlab"]).unwrap();
    assert_eq!(cli.verbose, 2);
    assert!(matches!(
        cli.command,
        Commands::Auth {
            command: AuthCommand::Logout {
                provider: ProviderId::Gitlab
            }
        }
    ));

    let cli = Cli::try_parse_from([
        "zen", "task", "render", "feature-spec", "-d", "tasks/T-1", "--var", "ROLE=admin",
    ])
    .unwrap();
    match cli.command {
        Commands::Task {
            command: TaskCommand::Render { variables, .. },
        } => assert_eq!(variables[0].0, "ROLE"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_rejects_unknown_provider_and_type() {
    assert!(Cli::try_parse_from(["zen", "auth", "login", "bitbucket"]).is_err());
    assert!(Cli::try_parse_from(["zen", "assets", "list", "--type", "video"]).is_err());
}

#[tokio::test]
async fn test_task_render_writes_artifact() {
    let dir = TempDir::new().unwrap();
    let repo = FixtureRepo::new().template_with(
        "feature-spec",
        "# {{TASK_TITLE}} ({{ROLE}})\n",
        Vec::new(),
        |asset| asset.workflow_stages = vec!["04-design".into()],
    );
    let (ctx, _transport) = context(&dir, &repo);

    let task_dir = dir.path().join("TEST-001");
    std::fs::create_dir(&task_dir).unwrap();
    std::fs::write(
        task_dir.join("manifest.yaml"),
        "id: TEST-001\ntitle: Test Task\nowner: testuser\n",
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "zen",
        "task",
        "render",
        "feature-spec",
        "--task-dir",
        task_dir.to_str().unwrap(),
        "--var",
        "ROLE=admin",
    ])
    .unwrap();
    cli.command.execute(&ctx).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(task_dir.join("design/feature-spec.md")).unwrap(),
        "# Test Task (admin)\n"
    );
}

#[tokio::test]
async fn test_unknown_task_command_fails_with_suggestions() {
    let dir = TempDir::new().unwrap();
    let repo = FixtureRepo::new().template("feature-spec", "design", &[], "x");
    let (ctx, _transport) = context(&dir, &repo);
    let task_dir = dir.path().join("T-9");
    std::fs::create_dir(&task_dir).unwrap();
    std::fs::write(task_dir.join("manifest.yaml"), "id: T-9\n").unwrap();

    let err = Commands::Task {
        command: TaskCommand::Render {
            command: "feature".into(),
            task_dir,
            output: None,
            force: false,
            preview: false,
            variables: Vec::new(),
        },
    }
    .execute(&ctx)
    .await
    .unwrap_err();

    assert_eq!(kind_of(&err), Some(ErrorKind::AssetUnknown));
    assert_eq!(zen_cli::exit_code(&err), 1);
    assert!(zen_cli::error_message(&err).contains("feature-spec"));
}

#[tokio::test]
async fn test_login_without_secret_and_prompts_disabled_exits_with_auth_code() {
    let dir = TempDir::new().unwrap();
    let (ctx, _transport) = context(&dir, &FixtureRepo::new());

    let err = Commands::Auth {
        command: AuthCommand::Login {
            provider: ProviderId::Linear,
            token: None,
            email: None,
            validate: false,
        },
    }
    .execute(&ctx)
    .await
    .unwrap_err();

    assert_eq!(kind_of(&err), Some(ErrorKind::PromptDisabled));
    assert_eq!(zen_cli::exit_code(&err), 4);
}

#[tokio::test]
async fn test_get_saves_body_to_file() {
    let dir = TempDir::new().unwrap();
    let repo = FixtureRepo::new().template("readme", "docs", &[], "# Readme\n");
    let (ctx, transport) = context(&dir, &repo);
    let target = dir.path().join("out/readme.md");

    Commands::Assets {
        command: AssetsCommand::Get {
            name: "readme".into(),
            output: Some(target.clone()),
            no_verify: false,
            refresh: false,
        },
    }
    .execute(&ctx)
    .await
    .unwrap();

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "# Readme\n");
    assert_eq!(transport.count_for(&repo.asset_url("readme")), 1);
}
