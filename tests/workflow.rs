//! Volume Workflow Integration Tests
//!
//! Drives discovered work items through the per-volume workflow against
//! the in-memory cloud and checks isolation, restarts and tagging.

mod common;

use std::sync::Arc;

use common::{fast_settings, instance, Call, FakeCloud, Faults};
use volsnap::core::{aggregate, discover, NameResolver, VolumeWorkflow};
use volsnap::domain::{
    DiscoveryFilter, InstanceState, OutcomeStatus, OverallStatus, RunDirectives, WorkItem,
    NAME_TAG,
};

const DATE: &str = "20240101";

async fn items(cloud: &FakeCloud) -> Vec<WorkItem> {
    discover(
        cloud,
        &NameResolver::new(),
        &DiscoveryFilter::default(),
        DATE,
        false,
    )
    .await
    .unwrap()
    .items
}

fn three_volume_cloud() -> FakeCloud {
    FakeCloud::new(vec![instance(
        "i-1",
        Some("web"),
        InstanceState::Running,
        &[
            ("/dev/xvda", "vol-1"),
            ("/dev/xvdb", "vol-2"),
            ("/dev/xvdc", "vol-3"),
        ],
    )])
}

fn workflow(cloud: Arc<FakeCloud>, directives: RunDirectives) -> VolumeWorkflow {
    VolumeWorkflow::new(cloud, directives, fast_settings(1))
}

fn stop() -> RunDirectives {
    RunDirectives {
        stop_before_snapshot: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failure_isolation() {
    let cloud = Arc::new(three_volume_cloud().with_faults(Faults {
        snapshot: ["vol-2".to_string()].into(),
        ..Default::default()
    }));
    let items = items(&cloud).await;

    let outcomes = workflow(cloud.clone(), RunDirectives::default())
        .run_all(items)
        .await;

    let statuses: Vec<OutcomeStatus> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Success,
            OutcomeStatus::Failed,
            OutcomeStatus::Success
        ]
    );

    let summary = aggregate(1, &outcomes);
    assert_eq!(summary.overall_status, OverallStatus::Partial);
    assert_eq!(summary.error_messages.len(), 1);
    assert!(summary.error_messages[0].contains("vol-2"));

    // The volume after the failure was still snapshotted
    assert!(cloud
        .calls()
        .contains(&Call::CreateSnapshot("vol-3".to_string())));
}

#[tokio::test]
async fn test_restart_after_failed_snapshot() {
    let cloud = Arc::new(
        FakeCloud::new(vec![instance(
            "i-1",
            Some("web"),
            InstanceState::Running,
            &[("/dev/xvda", "vol-1")],
        )])
        .with_faults(Faults {
            snapshot: ["vol-1".to_string()].into(),
            ..Default::default()
        }),
    );
    let items = items(&cloud).await;

    let outcomes = workflow(cloud.clone(), stop()).run_all(items).await;

    assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
    let calls: Vec<Call> = cloud
        .calls()
        .into_iter()
        .filter(|c| !matches!(c, Call::DescribeInstances | Call::SnapshotNames(_)))
        .collect();
    assert_eq!(
        calls,
        vec![
            Call::Stop("i-1".to_string()),
            Call::WaitStopped("i-1".to_string()),
            Call::CreateSnapshot("vol-1".to_string()),
            Call::Start("i-1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_stop_wait_failure_skips_snapshot() {
    let cloud = Arc::new(
        FakeCloud::new(vec![instance(
            "i-1",
            Some("web"),
            InstanceState::Running,
            &[("/dev/xvda", "vol-1")],
        )])
        .with_faults(Faults {
            stop_wait: ["i-1".to_string()].into(),
            ..Default::default()
        }),
    );
    let items = items(&cloud).await;

    let outcomes = workflow(cloud.clone(), stop()).run_all(items).await;

    assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
    let detail = outcomes[0].error_detail.as_deref().unwrap();
    assert!(detail.contains("error waiting for instance i-1 to stop"));
    assert!(outcomes[0].snapshot_id.is_none());

    let calls = cloud.calls();
    assert!(!calls.iter().any(|c| matches!(c, Call::CreateSnapshot(_))));
    assert!(calls.contains(&Call::Start("i-1".to_string())));
}

#[tokio::test]
async fn test_require_stopped() {
    let cloud = Arc::new(FakeCloud::new(vec![
        instance(
            "i-running",
            Some("web"),
            InstanceState::Running,
            &[("/dev/xvda", "vol-1")],
        ),
        instance(
            "i-stopped",
            Some("db"),
            InstanceState::Stopped,
            &[("/dev/xvda", "vol-2")],
        ),
    ]));
    let items = items(&cloud).await;

    let directives = RunDirectives {
        require_already_stopped: true,
        ..Default::default()
    };
    let outcomes = workflow(cloud.clone(), directives).run_all(items).await;

    assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
    assert!(outcomes[0]
        .error_detail
        .as_deref()
        .unwrap()
        .contains("required to be stopped but is running"));
    assert_eq!(outcomes[1].status, OutcomeStatus::Success);

    let calls = cloud.calls();
    assert!(!calls.contains(&Call::CreateSnapshot("vol-1".to_string())));
    assert!(calls.contains(&Call::CreateSnapshot("vol-2".to_string())));
    // Never stopped here, but both instances still get a start request
    assert!(!calls.iter().any(|c| matches!(c, Call::Stop(_))));
    assert!(calls.contains(&Call::Start("i-running".to_string())));
    assert!(calls.contains(&Call::Start("i-stopped".to_string())));
}

#[tokio::test]
async fn test_no_restart_without_stop_directives() {
    let cloud = Arc::new(three_volume_cloud());
    let items = items(&cloud).await;

    workflow(cloud.clone(), RunDirectives::default())
        .run_all(items)
        .await;

    assert!(!cloud
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Stop(_) | Call::WaitStopped(_) | Call::Start(_))));
}

#[tokio::test]
async fn test_start_failure_does_not_change_outcome() {
    let cloud = Arc::new(
        FakeCloud::new(vec![instance(
            "i-1",
            Some("web"),
            InstanceState::Running,
            &[("/dev/xvda", "vol-1")],
        )])
        .with_faults(Faults {
            start: ["i-1".to_string()].into(),
            ..Default::default()
        }),
    );
    let items = items(&cloud).await;

    let outcomes = workflow(cloud.clone(), stop()).run_all(items).await;
    assert_eq!(outcomes[0].status, OutcomeStatus::Success);
}

#[tokio::test]
async fn test_tag_throttle_keeps_snapshot_id() {
    let cloud = Arc::new(
        FakeCloud::new(vec![instance(
            "i-1",
            Some("web"),
            InstanceState::Running,
            &[("/dev/xvda", "vol-1")],
        )])
        .with_faults(Faults {
            tags_throttled: ["vol-1".to_string()].into(),
            ..Default::default()
        }),
    );
    let items = items(&cloud).await;

    let outcomes = workflow(cloud.clone(), RunDirectives::default())
        .run_all(items)
        .await;

    let outcome = &outcomes[0];
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(outcome
        .error_detail
        .as_deref()
        .unwrap()
        .contains("rate limited"));
    let snapshot_id = outcome.snapshot_id.clone().unwrap();
    assert_eq!(cloud.snapshots()[0].snapshot_id, snapshot_id);

    // One attempt only
    let tag_calls = cloud
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::CreateTags(_)))
        .count();
    assert_eq!(tag_calls, 1);
}

#[tokio::test]
async fn test_error_state_snapshot_is_failed() {
    let cloud = Arc::new(
        FakeCloud::new(vec![instance(
            "i-1",
            Some("web"),
            InstanceState::Running,
            &[("/dev/xvda", "vol-1")],
        )])
        .with_faults(Faults {
            snapshot_error_state: ["vol-1".to_string()].into(),
            ..Default::default()
        }),
    );
    let items = items(&cloud).await;

    let outcomes = workflow(cloud.clone(), RunDirectives::default())
        .run_all(items)
        .await;

    assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
    assert!(outcomes[0]
        .error_detail
        .as_deref()
        .unwrap()
        .contains("state: error"));
    assert!(outcomes[0].snapshot_id.is_some());
    assert!(!cloud
        .calls()
        .iter()
        .any(|c| matches!(c, Call::CreateTags(_))));
}

#[tokio::test]
async fn test_snapshot_tags_and_description() {
    let cloud = Arc::new(FakeCloud::new(vec![instance(
        "i-1",
        Some("web"),
        InstanceState::Running,
        &[("/dev/xvda", "vol-1")],
    )]));
    let items = items(&cloud).await;

    let directives = RunDirectives {
        protected: true,
        label: Some("nightly".to_string()),
        ..Default::default()
    };
    let outcomes = workflow(cloud.clone(), directives).run_all(items).await;
    assert_eq!(outcomes[0].status, OutcomeStatus::Success);

    let snapshot = &cloud.snapshots()[0];
    assert_eq!(snapshot.name(), Some("s20240101a-web-/dev/xvda"));
    assert!(snapshot.description.contains("[Instance ID = i-1]"));
    assert!(snapshot.description.ends_with("nightly"));

    let tag = |key: &str| {
        snapshot
            .tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.clone())
    };
    assert_eq!(tag("Env").as_deref(), Some("prod"));
    assert_eq!(tag("Scripted").as_deref(), Some("True"));
    assert_eq!(tag("State:Protected").as_deref(), Some("running:True"));
    assert!(!snapshot.tags.iter().any(|t| t.key.starts_with("aws:")));
}

#[tokio::test]
async fn test_outcome_conservation() {
    let cloud = Arc::new(
        FakeCloud::new(vec![
            instance(
                "i-1",
                Some("web"),
                InstanceState::Running,
                &[("/dev/xvda", "vol-1"), ("/dev/xvdb", "vol-2")],
            ),
            instance(
                "i-2",
                None,
                InstanceState::Running,
                &[("/dev/sda1", "vol-3"), ("/dev/sdb", "vol-4")],
            ),
            instance(
                "i-3",
                Some("db"),
                InstanceState::Running,
                &[("/dev/xvda", "vol-5")],
            ),
        ])
        .with_faults(Faults {
            stop_wait: ["i-3".to_string()].into(),
            snapshot: ["vol-1".to_string()].into(),
            snapshot_error_state: ["vol-2".to_string()].into(),
            tags_error: ["vol-4".to_string()].into(),
            ..Default::default()
        }),
    );
    let items = items(&cloud).await;
    let total = items.len();

    let outcomes = workflow(cloud.clone(), stop()).run_all(items).await;
    let summary = aggregate(3, &outcomes);

    assert_eq!(total, 5);
    assert_eq!(outcomes.len(), total);
    assert_eq!(summary.succeeded + summary.failed, summary.total_volumes);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 4);
    assert_eq!(summary.error_messages.len(), 4);
    assert_eq!(summary.overall_status, OverallStatus::Partial);
}

#[tokio::test]
async fn test_concurrent_runner_keeps_order_and_groups_instances() {
    let cloud = Arc::new(FakeCloud::new(
        (1..=4)
            .map(|n| {
                let a = format!("vol-{}a", n);
                let b = format!("vol-{}b", n);
                instance(
                    &format!("i-{}", n),
                    None,
                    InstanceState::Running,
                    &[("/dev/xvda", a.as_str()), ("/dev/xvdb", b.as_str())],
                )
            })
            .collect(),
    ));
    let items = items(&cloud).await;
    let expected: Vec<String> = items.iter().map(|i| i.volume_id.clone()).collect();

    let outcomes = VolumeWorkflow::new(cloud.clone(), stop(), fast_settings(3))
        .run_all(items)
        .await;

    let volumes: Vec<String> = outcomes
        .iter()
        .map(|o| o.work_item.volume_id.clone())
        .collect();
    assert_eq!(volumes, expected);
    assert!(outcomes.iter().all(|o| o.is_success()));

    // Within one instance, the second volume starts only after the first
    // one's restart
    let calls = cloud.calls();
    for n in 1..=4 {
        let position = |call: Call| calls.iter().position(|c| *c == call).unwrap();
        let first_start = position(Call::Start(format!("i-{}", n)));
        let second_snapshot = position(Call::CreateSnapshot(format!("vol-{}b", n)));
        assert!(first_start < second_snapshot);
    }
}

#[tokio::test]
async fn test_unnamed_instance_uses_instance_id() {
    let cloud = FakeCloud::new(vec![instance(
        "i-2",
        None,
        InstanceState::Running,
        &[("/dev/sda1", "vol-3")],
    )]);

    let items = items(&cloud).await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].instance_name, "s20240101a-i-2-/dev/sda1");
    let name_tags: Vec<&str> = items[0]
        .tags
        .iter()
        .filter(|t| t.key == NAME_TAG)
        .map(|t| t.value.as_str())
        .collect();
    assert_eq!(name_tags, vec!["s20240101a-i-2-/dev/sda1"]);
}

#[tokio::test]
async fn test_name_fault_fails_volume() {
    let cloud = Arc::new(FakeCloud::new(vec![instance(
        "i-1",
        Some("web"),
        InstanceState::Running,
        &[("/dev/xvda", "vol-1"), ("/dev/xvdb", "vol-2")],
    )]));
    for suffix in ('a'..='z').chain('A'..='Z') {
        cloud.add_named_snapshot("vol-1", &format!("s{}{}-web-/dev/xvda", DATE, suffix));
    }
    let items = items(&cloud).await;
    assert!(items[0].name_fault.is_some());

    let outcomes = workflow(cloud.clone(), RunDirectives::default())
        .run_all(items)
        .await;

    assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
    assert!(outcomes[0]
        .error_detail
        .as_deref()
        .unwrap()
        .contains("no snapshot name available"));
    assert_eq!(outcomes[1].status, OutcomeStatus::Success);
    assert!(!cloud
        .calls()
        .contains(&Call::CreateSnapshot("vol-1".to_string())));
}
