mod common;

use std::collections::BTreeMap;

use common::*;
use orchestrator::{OrchestratorSettings, RunOutcome, SkipReason};
use pipeline::{AccessPolicy, Conclusion, PacError, RunConclusion, StatusPhase};

fn default_harness() -> Harness {
    Harness::new(
        FakeProvider::with_definitions(),
        FakeStore::new(vec![registration("ns1", "ns1", &["a", "b", "c", "d", "e"])]),
        FakeEngine::new(&["ns1"]),
    )
}

#[tokio::test]
async fn test_successful_pass_submits_labelled_run_and_bounds_history() {
    let harness = default_harness();
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();

    let RunOutcome::Completed {
        run,
        conclusion,
        registration,
    } = outcome
    else {
        panic!("expected a completed pass");
    };
    assert_eq!(run.name.as_str(), "app-pr-x7k2p");
    assert_eq!(run.namespace.as_str(), "ns1");
    assert_eq!(conclusion, RunConclusion::Succeeded);

    let names: Vec<&str> = registration.history.iter().map(|r| r.run_name.as_str()).collect();
    assert_eq!(names, vec!["b", "c", "d", "e", "app-pr-x7k2p"]);
    assert_eq!(harness.store.stored("app").history.len(), 5);

    let submissions = harness.engine.submissions();
    assert_eq!(submissions.len(), 1);
    let (namespace, candidate) = &submissions[0];
    assert_eq!(namespace.as_str(), "ns1");
    assert_eq!(candidate.name(), "app-pr-");
    let labels = candidate.labels();
    assert_eq!(labels["team"], "web");
    assert_eq!(labels["tekton.dev/pipeline-ascode-owner"], "org");
    assert_eq!(labels["tekton.dev/pipeline-ascode-repository"], "app");
    assert_eq!(labels["tekton.dev/pipeline-ascode-sha"], "5f2b9c1e");
    assert_eq!(labels["tekton.dev/pipeline-ascode-sender"], "org");
    assert_eq!(labels["tekton.dev/pipeline-ascode-branch"], "main");

    let yaml = candidate.to_yaml().unwrap();
    assert!(yaml.contains("5f2b9c1e"));
    assert!(yaml.contains("pipelineSpec"));
    assert!(yaml.contains("taskSpec"));
    assert!(!yaml.contains("pipelineRef"));

    let last = harness.provider.last();
    assert_eq!(last.phase, StatusPhase::Completed);
    assert_eq!(last.conclusion, Conclusion::Success);
    assert_eq!(
        last.details_url,
        "https://console.example/pipelineruns/ns1/app-pr-x7k2p"
    );
    assert!(last.message.contains("<td>test</td>"));
}

#[tokio::test]
async fn test_in_progress_statuses_precede_the_final_report() {
    let harness = default_harness();
    harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();

    let statuses = harness.provider.statuses();
    let phases: Vec<StatusPhase> = statuses.iter().map(|s| s.phase).collect();
    assert_eq!(
        phases,
        vec![
            StatusPhase::InProgress,
            StatusPhase::InProgress,
            StatusPhase::InProgress,
            StatusPhase::Completed,
        ]
    );
    assert!(statuses[1].message.contains("namespace <b>ns1</b>"));
    assert!(statuses[2].message.contains("tkn pr logs -f -n ns1 app-pr-x7k2p"));
}

#[tokio::test]
async fn test_hijack_attempt_fails_without_submission() {
    let harness = Harness::new(
        FakeProvider::with_definitions(),
        FakeStore::new(vec![registration("ns1", "ns2", &[])]),
        FakeEngine::new(&["ns1", "ns2"]),
    );
    let err = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        PacError::SecurityViolation {
            registration: "app".into(),
            owning_namespace: "ns1".into(),
            target_namespace: "ns2".into(),
        }
    );
    assert!(err.is_security_relevant());
    assert!(harness.engine.submissions().is_empty());

    let completed = harness.provider.completed();
    assert_eq!(completed.len(), 1);
    assert!(is_failure(&completed[0]));
    assert!(completed[0].message.contains("belongs to ns1"));
}

#[tokio::test]
async fn test_empty_definition_directory_is_skipped() {
    let harness = Harness::new(
        FakeProvider::default(),
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Skipped {
            reason: SkipReason::NoDefinitionDirectory
        }
    );
    let last = harness.provider.last();
    assert_eq!(last.conclusion, Conclusion::Skipped);
    assert!(last.message.contains(".tekton/"));
    assert!(harness.engine.submissions().is_empty());
}

#[tokio::test]
async fn test_directory_without_yaml_is_skipped() {
    let provider = FakeProvider {
        files: vec![("README.md".into(), "docs".into())],
        ..FakeProvider::default()
    };
    let harness = Harness::new(
        provider,
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Skipped {
            reason: SkipReason::NoDefinitionDirectory
        }
    );
}

#[tokio::test]
async fn test_denied_sender_is_skipped_before_matching() {
    let harness = Harness::new(
        FakeProvider::with_definitions(),
        // A hijacking registration would fail the pass if matching ran.
        FakeStore::new(vec![registration("ns1", "ns2", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("mallory"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Skipped {
            reason: SkipReason::AccessDenied
        }
    );
    let last = harness.provider.last();
    assert_eq!(last.conclusion, Conclusion::Skipped);
    assert_eq!(last.message, "User mallory is not allowed to run CI on this repo.");
}

#[tokio::test]
async fn test_allow_listed_and_member_senders_run() {
    let harness = default_harness();
    let outcome = harness
        .orchestrator()
        .with_policy(AccessPolicy::new(["bob"]))
        .run_with_reporting(&event("bob"))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let provider = FakeProvider {
        members: vec!["carol".into()],
        ..FakeProvider::with_definitions()
    };
    let harness = Harness::new(
        provider,
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("carol"))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
}

#[tokio::test]
async fn test_unregistered_repository_is_skipped() {
    let harness = Harness::new(
        FakeProvider::with_definitions(),
        FakeStore::new(vec![]),
        FakeEngine::new(&["ns1"]),
    );
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Skipped {
            reason: SkipReason::NotConfigured
        }
    );
    assert_eq!(
        harness.provider.last().message,
        "Could not find a configuration for this repository"
    );
}

#[tokio::test]
async fn test_default_branch_namespace_constrains_the_match() {
    let provider = FakeProvider {
        default_branch_config: Some("namespace: ns-ci\n".into()),
        ..FakeProvider::with_definitions()
    };
    let harness = Harness::new(
        provider,
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let err = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap_err();
    assert!(matches!(err, PacError::PolicyViolation { .. }));
    assert!(harness.engine.submissions().is_empty());
}

#[tokio::test]
async fn test_malformed_default_branch_config_fails_the_pass() {
    let provider = FakeProvider {
        default_branch_config: Some("namespace: [unterminated\n".into()),
        ..FakeProvider::with_definitions()
    };
    let harness = Harness::new(
        provider,
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let err = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap_err();
    assert!(matches!(err, PacError::MalformedInput { .. }));
    assert!(is_failure(&harness.provider.last()));
}

#[tokio::test]
async fn test_missing_namespace_fails_before_submission() {
    let harness = Harness::new(
        FakeProvider::with_definitions(),
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&[]),
    );
    let err = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PacError::NamespaceNotFound {
            namespace: "ns1".into()
        }
    );
    assert!(harness.engine.submissions().is_empty());
}

#[tokio::test]
async fn test_no_matching_candidate_reports_failure() {
    let mut ev = event("org");
    ev.trigger_target = "push".into();
    ev.event_type = "push".into();
    let harness = default_harness();
    let err = harness
        .orchestrator()
        .run_with_reporting(&ev)
        .await
        .unwrap_err();
    assert!(matches!(err, PacError::Selection { .. }));
    let last = harness.provider.last();
    assert!(is_failure(&last));
    assert!(last
        .message
        .starts_with("There was an issue validating the commit: "));
}

#[tokio::test]
async fn test_unresolvable_task_is_a_resolution_error() {
    let provider = FakeProvider {
        files: vec![
            ("pull-request.yaml".into(), PIPELINE_RUN.into()),
            ("pipeline.yaml".into(), PIPELINE.into()),
        ],
        ..FakeProvider::default()
    };
    let harness = Harness::new(
        provider,
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let err = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PacError::Resolution {
            kind: "Task".into(),
            name: "unit-test".into(),
            referenced_by: "app-pipeline".into(),
        }
    );
}

#[tokio::test]
async fn test_remote_tasks_from_configuration_are_merged() {
    let url = "https://catalog.example/unit-test.yaml";
    let provider = FakeProvider {
        files: vec![
            ("pull-request.yaml".into(), PIPELINE_RUN.into()),
            ("pipeline.yaml".into(), PIPELINE.into()),
            ("tekton.yaml".into(), format!("tasks:\n  - {url}\n")),
        ],
        ..FakeProvider::default()
    };
    let fetcher = FakeFetcher {
        documents: BTreeMap::from([(url.to_string(), TASK.to_string())]),
    };
    let harness = Harness::new(
        provider,
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    )
    .with_fetcher(fetcher);

    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    let yaml = harness.engine.submissions()[0].1.to_yaml().unwrap();
    assert!(yaml.contains("go test ./..."));
}

#[tokio::test]
async fn test_failed_run_completes_the_pass_with_failure_status() {
    let mut engine = FakeEngine::new(&["ns1"]);
    engine.conclusion = RunConclusion::Failed;
    let harness = Harness::new(
        FakeProvider::with_definitions(),
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        engine,
    );
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Completed {
            conclusion: RunConclusion::Failed,
            ..
        }
    ));
    let last = harness.provider.last();
    assert!(is_failure(&last));
    assert!(last.message.contains("has failed"));
    assert_eq!(
        harness.store.stored("app").history[0].status,
        Some(RunConclusion::Failed)
    );
}

#[tokio::test]
async fn test_ledger_conflict_is_surfaced_after_the_run() {
    let mut store = FakeStore::new(vec![registration("ns1", "ns1", &["a"])]);
    store.conflict_on_update = true;
    let harness = Harness::new(FakeProvider::with_definitions(), store, FakeEngine::new(&["ns1"]));
    let err = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap_err();

    assert!(err.is_bookkeeping());
    assert_eq!(harness.engine.submissions().len(), 1);
    assert_eq!(harness.store.stored("app").history.len(), 1);
    assert!(is_failure(&harness.provider.last()));
}

#[tokio::test]
async fn test_history_written_during_the_run_is_kept() {
    let harness = Harness::new(
        FakeProvider::with_definitions(),
        FakeStore::new(vec![registration("ns1", "ns1", &["a", "b", "c", "d"])]),
        FakeEngine::new(&["ns1"]),
    );
    harness.write_history_during_run("other-run");

    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let stored = harness.store.stored("app");
    let names: Vec<&str> = stored.history.iter().map(|r| r.run_name.as_str()).collect();
    assert_eq!(names, vec!["b", "c", "d", "other-run", "app-pr-x7k2p"]);
    // One bump from the other writer, one from ours.
    assert_eq!(stored.resource_version.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_directory_with_only_configuration_is_skipped() {
    let provider = FakeProvider {
        files: vec![("tekton.yaml".into(), "namespace: ns1\n".into())],
        ..FakeProvider::default()
    };
    let harness = Harness::new(
        provider,
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Skipped {
            reason: SkipReason::NoDefinitionDirectory
        }
    );
    let last = harness.provider.last();
    assert_eq!(last.conclusion, Conclusion::Skipped);
    assert!(harness.engine.submissions().is_empty());
}

#[tokio::test]
async fn test_missing_console_url_falls_back() {
    let mut engine = FakeEngine::new(&["ns1"]);
    engine.console_url = None;
    let harness = Harness::new(
        FakeProvider::with_definitions(),
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        engine,
    );
    let settings = OrchestratorSettings {
        fallback_details_url: "https://fallback.example".into(),
        ..OrchestratorSettings::default()
    };
    harness
        .orchestrator()
        .with_settings(settings)
        .run_with_reporting(&event("org"))
        .await
        .unwrap();
    assert_eq!(harness.provider.last().details_url, "https://fallback.example");
}

#[tokio::test]
async fn test_status_post_failures_do_not_change_the_result() {
    let provider = FakeProvider {
        fail_status_posts: true,
        ..FakeProvider::with_definitions()
    };
    let harness = Harness::new(
        provider,
        FakeStore::new(vec![registration("ns1", "ns1", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let outcome = harness
        .orchestrator()
        .run_with_reporting(&event("org"))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(harness.provider.statuses().len(), 4);
}

#[tokio::test]
async fn test_run_without_reporting_leaves_failure_to_the_caller() {
    let harness = Harness::new(
        FakeProvider::with_definitions(),
        FakeStore::new(vec![registration("ns1", "ns2", &[])]),
        FakeEngine::new(&["ns1"]),
    );
    let err = harness.orchestrator().run(&event("org")).await.unwrap_err();
    assert!(err.is_security_relevant());
    assert!(harness.provider.completed().is_empty());
}
