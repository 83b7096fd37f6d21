//! End-to-end scenarios for the asset client and task renderer
//!
//! Every test runs against a scripted transport and a manual clock, so no
//! network access or wall-clock timing is involved.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use tempfile::TempDir;
use zen::assets::{AssetClient, AssetFilter, AssetType, GetOptions, SyncRequest, SyncStatus};
use zen::clock::{Clock, ManualClock};
use zen::config::TemplateSettings;
use zen::task::{RenderRequest, TaskRenderer};
use zen::template::TemplateEngine;
use zen::testing::fixtures::{self, FixtureRepo};
use zen::testing::MockTransport;
use zen::ErrorKind;

struct Scenario {
    dir: TempDir,
    clock: ManualClock,
    transport: Arc<MockTransport>,
    client: Arc<AssetClient>,
}

async fn scenario(repo: &FixtureRepo) -> Scenario {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    let transport = Arc::new(MockTransport::new());
    repo.serve(&transport);
    let client = AssetClient::open(
        &fixtures::asset_settings(dir.path()),
        transport.clone(),
        None,
        clock.shared(),
    )
    .await
    .unwrap();
    Scenario {
        dir,
        clock,
        transport,
        client: Arc::new(client),
    }
}

fn library() -> FixtureRepo {
    FixtureRepo::new()
        .template(
            "technical-spec",
            "documentation",
            &["ai", "technical"],
            "# Technical Spec\n\n{{TASK_TITLE}}\n",
        )
        .template("user-story", "planning", &["agile"], "As a {{ROLE}}\n")
}

#[tokio::test]
async fn test_first_fetch_downloads_manifest_and_body() {
    let s = scenario(&library()).await;

    let content = s
        .client
        .get("technical-spec", GetOptions::default().verify(true))
        .await
        .unwrap();

    assert!(!content.cached);
    assert_eq!(content.cache_age_seconds, 0);
    assert!(content.verified_hash.is_some());
    assert_eq!(s.transport.request_count(), 2);
    assert!(s.client.cache().contains("asset:technical-spec").await);
}

#[tokio::test]
async fn test_second_fetch_is_served_from_cache() {
    let s = scenario(&library()).await;
    let first = s
        .client
        .get("technical-spec", GetOptions::default())
        .await
        .unwrap();
    let requests = s.transport.request_count();

    s.clock.advance(chrono::Duration::seconds(30));
    let second = s
        .client
        .get("technical-spec", GetOptions::default())
        .await
        .unwrap();

    assert!(second.cached);
    assert_eq!(second.cache_age_seconds, 30);
    assert_eq!(second.body, first.body);
    assert_eq!(s.transport.request_count(), requests);
}

#[tokio::test]
async fn test_filtered_listing_pages_in_name_order() {
    let mut repo = FixtureRepo::new();
    for i in 0..75 {
        repo = repo.template(
            &format!("doc-{i:03}"),
            "documentation",
            &["ai", "technical"],
            "body",
        );
    }
    for i in 0..10 {
        repo = repo.template(&format!("plan-{i:03}"), "planning", &["agile"], "body");
        repo = repo.template(&format!("other-{i:03}"), "documentation", &["manual"], "body");
    }
    let s = scenario(&repo).await;

    let filter = AssetFilter::all()
        .with_type(AssetType::Template)
        .with_category("documentation")
        .with_tags(["ai", "technical"])
        .page(10, 25);
    let page = s.client.list(&filter).await.unwrap();

    assert_eq!(page.total, 75);
    assert!(page.has_more);
    assert_eq!(page.results.len(), 25);
    assert_eq!(page.results[0].name, "doc-010");
    assert_eq!(page.results[24].name, "doc-034");
    assert!(page.results.windows(2).all(|w| w[0].name < w[1].name));

    let tail = s
        .client
        .list(&filter.clone().page(70, 25))
        .await
        .unwrap();
    assert_eq!(tail.results.len(), 5);
    assert!(!tail.has_more);
}

#[tokio::test]
async fn test_concurrent_gets_share_one_download() {
    let repo = library();
    let s = scenario(&repo).await;
    s.client.list(&AssetFilter::all()).await.unwrap();
    s.transport.set_latency(Duration::from_millis(200));

    let (a, b) = tokio::join!(
        s.client.get("technical-spec", GetOptions::default()),
        s.client.get("technical-spec", GetOptions::default()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.body, b.body);
    assert_eq!(s.transport.count_for(&repo.asset_url("technical-spec")), 1);
}

#[tokio::test]
async fn test_branch_switch_reports_changes() {
    let mut main = FixtureRepo::new();
    for i in 0..8 {
        main = main.template(&format!("asset-{i}"), "general", &[], &format!("v1 {i}"));
    }
    let s = scenario(&main).await;
    s.client.list(&AssetFilter::all()).await.unwrap();

    let mut develop = main.clone().on_branch("develop");
    for i in 0..5 {
        develop = develop.template(&format!("asset-{i}"), "general", &[], &format!("v2 {i}"));
    }
    develop = develop
        .template("fresh-a", "general", &[], "new")
        .template("fresh-b", "general", &[], "new");
    develop.serve(&s.transport);

    s.clock.advance(chrono::Duration::minutes(5));
    let result = s
        .client
        .sync(SyncRequest {
            force: true,
            shallow: true,
            branch: Some("develop".into()),
        })
        .await
        .unwrap();

    assert_eq!(result.status, SyncStatus::Success);
    assert_eq!((result.added, result.updated, result.removed), (2, 5, 0));
    assert_eq!(result.diff.added, vec!["fresh-a", "fresh-b"]);
    assert!(result.refreshed);
    assert!(result.cache_size_mb > 0.0);
    assert_eq!(result.last_sync, Some(s.clock.now()));
    assert_eq!(result.branch, "develop");
    assert_eq!(s.client.branch(), "develop");

    let content = s.client.get("asset-0", GetOptions::default()).await.unwrap();
    assert_eq!(content.text().unwrap(), "v2 0");
}

#[tokio::test]
async fn test_sync_drops_compiled_templates_that_changed() {
    let s = scenario(&library()).await;
    let engine = TemplateEngine::new(TemplateSettings::default(), s.client.clone());
    let vars: zen::template::Variables =
        [("ROLE".to_string(), serde_json::json!("tester"))].into();

    let binding = engine.load_template("user-story").await.unwrap();
    assert_eq!(engine.render_template(&binding, &vars).unwrap(), "As a tester\n");

    library()
        .template("user-story", "planning", &["agile"], "As a {{ROLE}}, I want\n")
        .serve(&s.transport);
    s.client
        .sync(SyncRequest {
            force: true,
            shallow: true,
            ..SyncRequest::default()
        })
        .await
        .unwrap();

    let binding = engine.load_template("user-story").await.unwrap();
    assert_eq!(
        engine.render_template(&binding, &vars).unwrap(),
        "As a tester, I want\n"
    );

    let before = s.transport.request_count();
    engine.load_template("user-story").await.unwrap();
    assert_eq!(s.transport.request_count(), before);

    s.client.clear_cache().await.unwrap();
    engine.load_template("user-story").await.unwrap();
    assert!(s.transport.request_count() > before);
}

#[tokio::test]
async fn test_render_into_task_directory() {
    let repo = FixtureRepo::new().template_with(
        "feature-spec",
        "# {{TASK_TITLE}}\n**Owner:** {{OWNER_NAME}}",
        Vec::new(),
        |asset| asset.workflow_stages = vec!["04-design".into()],
    );
    let s = scenario(&repo).await;

    let task_dir = s.dir.path().join("TEST-001");
    std::fs::create_dir(&task_dir).unwrap();
    std::fs::write(
        task_dir.join("manifest.yaml"),
        "id: TEST-001\ntitle: Test Task\ntype: story\nowner: testuser\n",
    )
    .unwrap();

    let engine = Arc::new(TemplateEngine::new(
        TemplateSettings::default(),
        s.client.clone(),
    ));
    let renderer = TaskRenderer::new(s.client.clone(), engine, s.clock.shared());

    let request = RenderRequest {
        command: "feature-spec".into(),
        task_dir: task_dir.clone(),
        ..RenderRequest::default()
    };
    let outcome = renderer.render(&request).await.unwrap();

    let expected = task_dir.join("design").join("feature-spec.md");
    assert!(outcome.written);
    assert_eq!(outcome.output_path, expected);
    assert_eq!(
        std::fs::read_to_string(&expected).unwrap(),
        "# Test Task\n**Owner:** testuser"
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let file_mode = std::fs::metadata(&expected).unwrap().permissions().mode();
        let dir_mode = std::fs::metadata(task_dir.join("design"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o644);
        assert_eq!(dir_mode & 0o777, 0o755);
    }

    let err = renderer.render(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let preview = renderer
        .render(&RenderRequest {
            preview: true,
            ..request.clone()
        })
        .await
        .unwrap();
    assert!(!preview.written);
    assert_eq!(preview.content, "# Test Task\n**Owner:** testuser");
}

#[tokio::test]
async fn test_unknown_command_suggests_alternatives() {
    let repo = library().template("feature-spec", "design", &[], "x");
    let s = scenario(&repo).await;
    let task_dir = s.dir.path().join("T-2");
    std::fs::create_dir(&task_dir).unwrap();
    std::fs::write(task_dir.join("manifest.yaml"), "id: T-2\ntitle: Two\n").unwrap();

    let engine = Arc::new(TemplateEngine::new(
        TemplateSettings::default(),
        s.client.clone(),
    ));
    let renderer = TaskRenderer::new(s.client.clone(), engine, s.clock.shared());
    let err = renderer
        .render(&RenderRequest {
            command: "spec".into(),
            task_dir,
            ..RenderRequest::default()
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AssetUnknown);
    match err.root() {
        zen::ZenError::AssetUnknown { suggestions, .. } => {
            assert!(suggestions.contains(&"feature-spec".to_string()));
            assert!(suggestions.contains(&"technical-spec".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
