//! Integration tests for Convoy

use convoy::config::Config;
use std::path::Path;
use tempfile::TempDir;

/// Config rooted entirely inside `dir`
fn isolated_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.store.root = Some(dir.join("store"));
    config.workspace.root = Some(dir.join("ws"));
    config.general.audit_path = Some(dir.join("audit.log"));
    config
}

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let content = toml::to_string_pretty(&isolated_config(dir.path())).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}

mod cli_tests {
    use super::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use convoy::store::{FileEntry, SourceDescriptor, Store};
    use convoy::workspace::WorkspaceManager;
    use predicates::prelude::*;

    fn convoy(config: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("convoy");
        cmd.env_remove("RUST_LOG").arg("--config").arg(config);
        cmd
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("convoy")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("deployment execution engine"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("convoy")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("convoy"));
    }

    #[test]
    fn config_path_follows_flag() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        convoy(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        convoy(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[store]").and(predicate::str::contains("[executor]")));
    }

    #[test]
    fn invalid_config_is_reported() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        std::fs::write(&config, "[store]\ngc_older_than = \"whenever\"\n").unwrap();

        convoy(&config)
            .args(["cache", "stats"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn cache_stats_on_empty_store() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);

        convoy(&config)
            .args(["cache", "stats"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Objects:    0"));

        let output = convoy(&config)
            .args(["--format", "json", "cache", "stats"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(stats["object_count"], 0);
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        convoy(&config)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached objects."));
    }

    #[tokio::test]
    async fn cache_gc_dry_run_then_real() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        let digest = {
            let store = Store::open(temp.path().join("store")).await.unwrap();
            store
                .put(
                    &SourceDescriptor::new("modules/vpc", Some("1.0.0")),
                    vec![FileEntry::new("main.tf", "vpc")],
                )
                .await
                .unwrap()
        };

        convoy(&config)
            .args(["--format", "plain", "cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains(digest.as_str()));

        convoy(&config)
            .args(["cache", "gc", "--older-than", "0s", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Would remove 1 object(s)"));

        convoy(&config)
            .args(["cache", "gc", "--older-than", "0s"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 object(s)"));

        let store = Store::open(temp.path().join("store")).await.unwrap();
        assert_eq!(store.stats().await.object_count, 0);

        let audit = std::fs::read_to_string(temp.path().join("audit.log")).unwrap();
        assert!(audit.contains("store.gc"));
    }

    #[tokio::test]
    async fn cache_rm_by_reference() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        let source = SourceDescriptor::new("modules/vpc", Some("1.0.0"));
        {
            let store = Store::open(temp.path().join("store")).await.unwrap();
            store
                .put(&source, vec![FileEntry::new("main.tf", "vpc")])
                .await
                .unwrap();
        }

        convoy(&config)
            .args(["cache", "rm", "modules/vpc@1.0.0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("removed"));

        convoy(&config)
            .args(["cache", "rm", "modules/vpc@1.0.0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache object not found"));

        let store = Store::open(temp.path().join("store")).await.unwrap();
        assert_eq!(store.stats().await.object_count, 0);
        let audit = std::fs::read_to_string(temp.path().join("audit.log")).unwrap();
        assert!(audit.contains("store.remove"));
    }

    #[tokio::test]
    async fn cache_clear_asks_first() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        {
            let store = Store::open(temp.path().join("store")).await.unwrap();
            for name in ["a", "b"] {
                store
                    .put(
                        &SourceDescriptor::new(name, Some("1.0.0")),
                        vec![FileEntry::new("main.tf", name)],
                    )
                    .await
                    .unwrap();
            }
        }

        convoy(&config)
            .args(["cache", "clear"])
            .write_stdin("n\n")
            .assert()
            .success()
            .stdout(predicate::str::contains("Aborted."));
        let store = Store::open(temp.path().join("store")).await.unwrap();
        assert_eq!(store.stats().await.object_count, 2);

        convoy(&config)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cleared 2 object(s)"));
        let store = Store::open(temp.path().join("store")).await.unwrap();
        assert_eq!(store.stats().await.object_count, 0);

        convoy(&config)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached objects to clear."));
    }

    #[test]
    fn cache_gc_rejects_bad_threshold() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        convoy(&config)
            .args(["cache", "gc", "--older-than", "soon"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid duration"));
    }

    #[test]
    fn workspace_list_empty() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        convoy(&config)
            .args(["workspace", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No run workspaces."));
    }

    #[test]
    fn workspace_clean_requires_target() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        convoy(&config).args(["workspace", "clean"]).assert().failure();
    }

    #[tokio::test]
    async fn workspace_clean_all() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        let manager = WorkspaceManager::new(temp.path().join("ws"));
        for _ in 0..2 {
            let run = manager.new_run();
            manager.component_workspace(run, "api").await.unwrap();
        }

        convoy(&config)
            .args(["workspace", "clean", "--all", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Would remove 2 run(s)"));
        assert_eq!(manager.list_runs().await.unwrap().len(), 2);

        convoy(&config)
            .args(["workspace", "clean", "--all"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 2 run(s)"));
        assert!(manager.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn workspace_clean_single_run() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        let manager = WorkspaceManager::new(temp.path().join("ws"));
        let keep = manager.new_run();
        let drop = manager.new_run();
        manager.component_workspace(keep, "api").await.unwrap();
        manager.component_workspace(drop, "api").await.unwrap();

        convoy(&config)
            .args(["workspace", "clean", "--run", &drop.to_string()])
            .assert()
            .success();

        assert!(manager.run_path(keep).exists());
        assert!(!manager.run_path(drop).exists());
    }

    #[test]
    fn workspace_clean_unknown_run() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        convoy(&config)
            .args(["workspace", "clean", "--run", "not-a-run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Run not found"));
    }

    #[tokio::test]
    async fn workspace_list_json() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);
        let manager = WorkspaceManager::new(temp.path().join("ws"));
        let run = manager.new_run();
        manager.component_workspace(run, "db").await.unwrap();

        let output = convoy(&config)
            .args(["--format", "json", "workspace", "list"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let runs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(runs[0]["run_id"], run.to_string());
        assert_eq!(runs[0]["components"][0], "db");
    }
}

mod engine_tests {
    use super::*;
    use async_trait::async_trait;
    use convoy::executor::{
        BoxError, ComponentHandler, ComponentStatus, ExecutionContext, RunOutcome, SkipReason,
    };
    use convoy::graph::Component;
    use convoy::store::{LocalSourceProvider, SourceDescriptor, Store};
    use convoy::workspace::{Workspace, WorkspaceManager};
    use convoy::{Engine, EngineOptions};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    /// Records when each component ran and what it saw in its workspace
    #[derive(Default)]
    struct Tracker {
        fail: Vec<&'static str>,
        delay: Duration,
        spans: Mutex<HashMap<String, (Instant, Instant)>>,
        seen: Mutex<HashMap<String, Option<String>>>,
    }

    #[async_trait]
    impl ComponentHandler for Tracker {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            component: &Component,
            workspace: &Workspace,
        ) -> Result<(), BoxError> {
            let start = Instant::now();
            let content = std::fs::read_to_string(workspace.path.join("main.tf")).ok();
            self.seen
                .lock()
                .unwrap()
                .insert(component.name.clone(), content);
            tokio::time::sleep(self.delay).await;
            self.spans
                .lock()
                .unwrap()
                .insert(component.name.clone(), (start, Instant::now()));

            if self.fail.contains(&component.name.as_str()) {
                return Err(format!("{} could not be applied", component.name).into());
            }
            Ok(())
        }
    }

    struct Setup {
        temp: TempDir,
        store: Arc<Store>,
        workspaces: Arc<WorkspaceManager>,
    }

    async fn setup() -> Setup {
        let temp = TempDir::new().unwrap();
        let modules = temp.path().join("modules");
        for (name, body) in [("vpc", "vpc"), ("vpc-mirror", "vpc"), ("app", "app")] {
            std::fs::create_dir_all(modules.join(name)).unwrap();
            std::fs::write(modules.join(name).join("main.tf"), body).unwrap();
        }
        let store = Arc::new(Store::open(temp.path().join("store")).await.unwrap());
        let workspaces = Arc::new(WorkspaceManager::new(temp.path().join("ws")));
        Setup {
            temp,
            store,
            workspaces,
        }
    }

    fn engine(setup: &Setup, options: EngineOptions) -> Engine {
        Engine::new(setup.store.clone(), setup.workspaces.clone(), options).with_provider(
            Arc::new(LocalSourceProvider::new(setup.temp.path().join("modules"))),
        )
    }

    fn diamond() -> Vec<Component> {
        vec![
            Component::new("A", "terraform")
                .with_source(SourceDescriptor::new("vpc", Some("1.0.0"))),
            Component::new("B", "container").depends_on(["A"]),
            Component::new("C", "container").depends_on(["A"]),
            Component::new("D", "chart").depends_on(["B", "C"]),
        ]
    }

    #[tokio::test]
    async fn identical_sources_share_one_object() {
        let s = setup().await;
        let engine = engine(&s, EngineOptions::default());
        let tracker = Arc::new(Tracker::default());

        let components = vec![
            Component::new("east", "terraform")
                .with_source(SourceDescriptor::new("vpc", Some("1.0.0"))),
            Component::new("west", "terraform")
                .with_source(SourceDescriptor::new("vpc-mirror", Some("1.0.0"))),
            Component::new("web", "terraform")
                .with_source(SourceDescriptor::new("app", Some("2.0.0")))
                .depends_on(["east", "west"]),
        ];
        let result = engine
            .deploy(components, tracker.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert!(result.succeeded(), "{}", result.summary());
        let stats = s.store.stats().await;
        assert_eq!(stats.object_count, 2);
        assert_eq!(stats.reference_count, 3);

        let seen = tracker.seen.lock().unwrap();
        assert_eq!(seen["east"].as_deref(), Some("vpc"));
        assert_eq!(seen["west"].as_deref(), Some("vpc"));
        assert_eq!(seen["web"].as_deref(), Some("app"));
    }

    #[tokio::test]
    async fn failure_in_wave_two_skips_wave_three() {
        let s = setup().await;
        let engine = engine(&s, EngineOptions::default());
        let tracker = Arc::new(Tracker {
            fail: vec!["B"],
            ..Default::default()
        });

        let result = engine
            .deploy(diamond(), tracker.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome(), RunOutcome::Failed);
        assert_eq!(result.status("A"), Some(ComponentStatus::Succeeded));
        assert_eq!(result.status("B"), Some(ComponentStatus::Failed));
        assert_eq!(result.status("C"), Some(ComponentStatus::Succeeded));
        assert_eq!(
            result.status("D"),
            Some(ComponentStatus::Skipped(SkipReason::DependencyFailed))
        );
        assert!(!tracker.spans.lock().unwrap().contains_key("D"));

        let summary = result.summary();
        assert!(summary.contains("Failed in wave 2"));
        assert!(summary.contains("B: B could not be applied"));
        assert!(summary.contains("Succeeded waves: 1"));
        assert!(summary.contains("D (dependency failed)"));
    }

    #[tokio::test]
    async fn wave_members_run_concurrently() {
        let s = setup().await;
        let engine = engine(
            &s,
            EngineOptions {
                concurrency: 2,
                ..Default::default()
            },
        );
        let tracker = Arc::new(Tracker {
            delay: Duration::from_millis(100),
            ..Default::default()
        });

        let result = engine
            .deploy(diamond(), tracker.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.succeeded());

        let spans = tracker.spans.lock().unwrap();
        let (b_start, b_end) = spans["B"];
        let (c_start, c_end) = spans["C"];
        assert!(b_start < c_end && c_start < b_end, "B and C did not overlap");

        // Dependencies finished before dependents started
        assert!(spans["A"].1 <= b_start && spans["A"].1 <= c_start);
        assert!(b_end <= spans["D"].0 && c_end <= spans["D"].0);
    }

    #[tokio::test]
    async fn cleanup_removes_workspaces_and_unpins_objects() {
        let s = setup().await;
        let engine = engine(&s, EngineOptions::default());
        let result = engine
            .deploy(diamond(), Arc::new(Tracker::default()), CancellationToken::new())
            .await
            .unwrap();

        assert!(result.retained_path.is_none());
        assert!(!s.workspaces.run_path(result.run_id).exists());
        assert!(s.workspaces.list_runs().await.unwrap().is_empty());

        let objects = s.store.objects().await;
        assert!(objects.iter().all(|o| o.consumers.is_empty()));
        let gc = s.store.gc(Duration::ZERO, false).await.unwrap();
        assert_eq!(gc.candidates.len(), 1);
    }

    #[tokio::test]
    async fn retention_keeps_materialized_files() {
        let s = setup().await;
        let engine = engine(
            &s,
            EngineOptions {
                retain_workspaces: true,
                ..Default::default()
            },
        );
        let result = engine
            .deploy(diamond(), Arc::new(Tracker::default()), CancellationToken::new())
            .await
            .unwrap();

        let retained = result.retained_path.clone().unwrap();
        assert_eq!(
            std::fs::read_to_string(retained.join("A").join("main.tf")).unwrap(),
            "vpc"
        );
        let runs = s.workspaces.list_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].retained);

        // Live consumer keeps the object out of GC
        let gc = s.store.gc(Duration::ZERO, false).await.unwrap();
        assert!(gc.candidates.is_empty());
    }

    #[tokio::test]
    async fn filtered_sources_only_materialize_selected_files() {
        let s = setup().await;
        let module = s.temp.path().join("modules").join("filtered");
        std::fs::create_dir_all(module.join("tests")).unwrap();
        std::fs::write(module.join("main.tf"), "filtered").unwrap();
        std::fs::write(module.join("README.md"), "docs").unwrap();
        std::fs::write(module.join("tests").join("main_test.tf"), "test").unwrap();

        let engine = engine(
            &s,
            EngineOptions {
                retain_workspaces: true,
                ..Default::default()
            },
        );
        let source = SourceDescriptor::new("filtered", Some("1.0.0"))
            .with_include(["*.tf"])
            .with_exclude(["*_test.tf"]);
        let result = engine
            .deploy(
                vec![Component::new("net", "terraform").with_source(source)],
                Arc::new(Tracker::default()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let workspace = result.retained_path.clone().unwrap().join("net");
        assert!(workspace.join("main.tf").is_file());
        assert!(!workspace.join("README.md").exists());
        assert!(!workspace.join("tests").exists());
    }

    #[tokio::test]
    async fn runs_are_isolated_from_each_other() {
        let s = setup().await;
        let engine = Arc::new(engine(
            &s,
            EngineOptions {
                retain_workspaces: true,
                ..Default::default()
            },
        ));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .deploy(diamond(), Arc::new(Tracker::default()), CancellationToken::new())
                    .await
                    .unwrap()
            })
        };
        let second = engine
            .deploy(diamond(), Arc::new(Tracker::default()), CancellationToken::new())
            .await
            .unwrap();
        let first = first.await.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_ne!(first.retained_path, second.retained_path);
        assert_eq!(s.store.stats().await.object_count, 1);
    }
}
