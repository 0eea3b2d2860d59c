mod common;

use common::{
    apply_ops, assert_well_formed, deployment, group_phases, id_of, inv, owned_by, prune_ops,
    secret, started_groups, wait_ops, Harness,
};
use kapply_core::{
    collect_events, ActionKind, ApplyOperation, CancelReason, ErrorKind, Event, GroupPhase,
    KindPhases, Options, PruneOperation, RunContext, WaitOperation,
};
use kapply_schema::{GroupKind, IdSet, Resource, ResourceSet};
use kapply_store::{
    InventoryInfo, InventoryPolicy, PollEvent, ScriptedPoller, Status, StoreOp, StorePoller,
};
use std::time::Duration;

fn waiting(timeout: Duration) -> Options {
    Options {
        reconcile_timeout: timeout,
        poll_interval: Duration::from_millis(10),
        emit_wait_events: true,
        ..Options::default()
    }
}

#[tokio::test]
async fn initial_apply_without_prune() {
    let h = Harness::new();
    let d1 = deployment("d1");
    let opts = Options {
        no_prune: true,
        ..Options::default()
    };

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![d1.clone()]),
        opts,
    ))
    .await;

    assert!(matches!(&events[0], Event::Init { groups } if groups.len() == 3));
    assert_eq!(
        group_phases(&events),
        vec![
            ("inventory-add-0".to_owned(), GroupPhase::Started),
            ("inventory-add-0".to_owned(), GroupPhase::Finished),
            ("apply-0".to_owned(), GroupPhase::Started),
            ("apply-0".to_owned(), GroupPhase::Finished),
            ("inventory-set-0".to_owned(), GroupPhase::Started),
            ("inventory-set-0".to_owned(), GroupPhase::Finished),
        ]
    );
    assert_eq!(apply_ops(&events), vec![("d1".to_owned(), ApplyOperation::Created)]);
    assert!(prune_ops(&events).is_empty());
    assert_well_formed(&events);

    let live = h.store.peek(&id_of(&d1)).unwrap();
    assert_eq!(live.owning_inventory(), Some("test"));
    assert_eq!(
        h.inventory.objects(&inv()).unwrap(),
        IdSet::from(vec![id_of(&d1)])
    );
}

#[tokio::test]
async fn apply_waits_for_current_status() {
    let d1 = deployment("d1");
    let s1 = secret("s1");
    let poller = ScriptedPoller::new();
    poller
        .push_status(id_of(&d1), Status::InProgress)
        .push_status(id_of(&s1), Status::Current)
        .push_status(id_of(&d1), Status::Current);
    let h = Harness::with_poller(poller);
    let opts = Options {
        emit_status_events: true,
        ..waiting(Duration::from_secs(10))
    };

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![d1.clone(), s1.clone()]),
        opts,
    ))
    .await;

    assert_eq!(
        started_groups(&events),
        vec!["inventory-add-0", "apply-0", "wait-0", "inventory-set-0"]
    );
    assert_eq!(
        apply_ops(&events),
        vec![
            ("d1".to_owned(), ApplyOperation::Created),
            ("s1".to_owned(), ApplyOperation::Created),
        ]
    );

    let statuses: Vec<(String, Status)> = events
        .iter()
        .filter_map(|e| match e {
            Event::Status { id, status, .. } => Some((id.name.clone(), *status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("d1".to_owned(), Status::InProgress),
            ("s1".to_owned(), Status::Current),
            ("d1".to_owned(), Status::Current),
        ]
    );

    // Status events fall inside the wait group.
    let wait_start = events
        .iter()
        .position(|e| matches!(e, Event::ActionGroup { group, phase: GroupPhase::Started, .. } if group == "wait-0"))
        .unwrap();
    let wait_end = events
        .iter()
        .position(|e| matches!(e, Event::ActionGroup { group, phase: GroupPhase::Finished, .. } if group == "wait-0"))
        .unwrap();
    for (i, e) in events.iter().enumerate() {
        if matches!(e, Event::Status { .. }) {
            assert!(wait_start < i && i < wait_end);
        }
    }

    assert_eq!(
        wait_ops(&events),
        vec![
            ("d1".to_owned(), WaitOperation::Pending),
            ("s1".to_owned(), WaitOperation::Pending),
            ("s1".to_owned(), WaitOperation::Reconciled),
            ("d1".to_owned(), WaitOperation::Reconciled),
        ]
    );
    assert_well_formed(&events);
    assert_eq!(h.poller.calls().len(), 1);
}

#[tokio::test]
async fn prune_all_owned_objects() {
    let h = Harness::new();
    let d1 = owned_by(deployment("d1"), "test");
    let s1 = owned_by(secret("s1"), "test");
    h.store.insert(d1.clone()).unwrap();
    h.store.insert(s1.clone()).unwrap();
    h.inventory
        .seed(&inv(), IdSet::from(vec![id_of(&d1), id_of(&s1)]));

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::new(),
        Options::default(),
    ))
    .await;

    assert!(apply_ops(&events).is_empty());
    assert_eq!(
        prune_ops(&events),
        vec![
            ("s1".to_owned(), PruneOperation::Pruned),
            ("d1".to_owned(), PruneOperation::Pruned),
        ]
    );
    assert!(!h.store.contains(&id_of(&d1)));
    assert!(!h.store.contains(&id_of(&s1)));
    assert!(h.inventory.objects(&inv()).unwrap().is_empty());
    assert_well_formed(&events);
}

#[tokio::test]
async fn prune_skips_object_owned_by_other_inventory() {
    let h = Harness::new();
    let d1 = owned_by(deployment("d1"), "other");
    h.store.insert(d1.clone()).unwrap();
    h.inventory.seed(&inv(), IdSet::from(vec![id_of(&d1)]));

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::new(),
        Options::default(),
    ))
    .await;

    assert_eq!(
        prune_ops(&events),
        vec![("d1".to_owned(), PruneOperation::Skipped)]
    );
    let skipped = events
        .iter()
        .find(|e| matches!(e, Event::Prune { .. }))
        .and_then(Event::error)
        .unwrap();
    assert_eq!(skipped.kind, ErrorKind::OwnershipConflict);
    assert!(h.store.contains(&id_of(&d1)));
    assert_eq!(
        h.inventory.objects(&inv()).unwrap(),
        IdSet::from(vec![id_of(&d1)])
    );
}

#[tokio::test]
async fn ownership_conflict_errors_object_without_blocking_wait() {
    let h = Harness::with_poller(ScriptedPoller::settling(Status::Current));
    let d1 = deployment("d1");
    h.store.insert(owned_by(d1.clone(), "other")).unwrap();

    let events = tokio::time::timeout(
        Duration::from_secs(5),
        collect_events(h.applier().run(
            RunContext::background(),
            inv(),
            ResourceSet::from(vec![d1.clone()]),
            waiting(Duration::from_secs(30)),
        )),
    )
    .await
    .expect("run must not block on the conflicting object");

    let apply = events
        .iter()
        .find(|e| matches!(e, Event::Apply { .. }))
        .unwrap();
    let Event::Apply {
        operation, error, ..
    } = apply
    else {
        unreachable!();
    };
    assert_eq!(*operation, ApplyOperation::Errored);
    assert_eq!(error.as_ref().unwrap().kind, ErrorKind::OwnershipConflict);

    assert_eq!(
        wait_ops(&events),
        vec![("d1".to_owned(), WaitOperation::Skipped)]
    );
    assert!(h.poller.calls().is_empty());
    assert_eq!(
        h.store.peek(&id_of(&d1)).unwrap().owning_inventory(),
        Some("other")
    );
    assert!(h.inventory.objects(&inv()).unwrap().is_empty());
    assert_well_formed(&events);
}

#[tokio::test]
async fn adopt_all_takes_over_foreign_object() {
    let h = Harness::new();
    let d1 = deployment("d1");
    h.store.insert(owned_by(d1.clone(), "other")).unwrap();
    let opts = Options {
        inventory_policy: InventoryPolicy::AdoptAll,
        ..Options::default()
    };

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![d1.clone()]),
        opts,
    ))
    .await;

    assert_eq!(apply_ops(&events), vec![("d1".to_owned(), ApplyOperation::Updated)]);
    assert_eq!(
        h.store.peek(&id_of(&d1)).unwrap().owning_inventory(),
        Some("test")
    );
}

#[tokio::test]
async fn second_apply_is_unchanged() {
    let h = Harness::new();
    let desired = ResourceSet::from(vec![deployment("d1"), secret("s1")]);

    collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        desired.clone(),
        Options::default(),
    ))
    .await;
    let writes = h.store.write_count();

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        desired,
        Options::default(),
    ))
    .await;

    assert_eq!(
        apply_ops(&events),
        vec![
            ("d1".to_owned(), ApplyOperation::Unchanged),
            ("s1".to_owned(), ApplyOperation::Unchanged),
        ]
    );
    assert_eq!(h.store.write_count(), writes);
}

#[tokio::test]
async fn changed_object_is_updated_and_dropped_object_pruned() {
    let h = Harness::new();
    collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![deployment("d1"), secret("s1")]),
        Options::default(),
    ))
    .await;

    let mut d1 = deployment("d1");
    d1.set_field(&["spec", "replicas"], serde_json::json!(3));
    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![d1.clone()]),
        Options::default(),
    ))
    .await;

    assert_eq!(apply_ops(&events), vec![("d1".to_owned(), ApplyOperation::Updated)]);
    assert_eq!(prune_ops(&events), vec![("s1".to_owned(), PruneOperation::Pruned)]);
    assert_eq!(
        started_groups(&events),
        vec!["inventory-add-0", "apply-0", "prune-0", "inventory-set-0"]
    );
    assert_eq!(
        h.inventory.objects(&inv()).unwrap(),
        IdSet::from(vec![id_of(&d1)])
    );
}

#[tokio::test]
async fn concurrent_write_errors_object_and_batch_continues() {
    let h = Harness::new();
    collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![deployment("d1")]),
        Options::default(),
    ))
    .await;
    assert_eq!(h.store.write_count(), 1);

    let mut d1 = deployment("d1");
    d1.set_field(&["spec", "replicas"], serde_json::json!(3));
    let d2 = deployment("d2");
    h.store.race_next_get(&id_of(&d1));
    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![d1.clone(), d2.clone()]),
        Options::default(),
    ))
    .await;

    assert_eq!(
        apply_ops(&events),
        vec![
            ("d1".to_owned(), ApplyOperation::Errored),
            ("d2".to_owned(), ApplyOperation::Created),
        ]
    );
    let conflict = events.iter().find_map(|e| match e {
        Event::Apply {
            error: Some(error), ..
        } => Some(error.kind),
        _ => None,
    });
    assert_eq!(conflict, Some(ErrorKind::StoreConflict));
    assert_well_formed(&events);

    // Only d2's create was written; d1 was not retried.
    assert_eq!(h.store.write_count(), 2);
    assert_eq!(
        h.store.peek(&id_of(&d1)).unwrap().field(&["spec", "replicas"]),
        Some(&serde_json::json!(1))
    );
    assert_eq!(
        h.inventory.objects(&inv()).unwrap(),
        IdSet::from(vec![id_of(&d1), id_of(&d2)])
    );
}

#[tokio::test]
async fn zero_poll_interval_still_reconciles() {
    let h = Harness::new();
    let s1 = secret("s1");
    let applier = kapply_core::Applier::new(
        h.store.clone(),
        h.inventory.clone(),
        std::sync::Arc::new(StorePoller::new(h.store.clone())),
    );
    let opts = Options {
        poll_interval: Duration::ZERO,
        ..waiting(Duration::from_secs(10))
    };

    let events = tokio::time::timeout(
        Duration::from_secs(5),
        collect_events(applier.run(
            RunContext::background(),
            inv(),
            ResourceSet::from(vec![s1]),
            opts,
        )),
    )
    .await
    .expect("wait must settle well before the reconcile timeout");

    assert_eq!(
        wait_ops(&events),
        vec![
            ("s1".to_owned(), WaitOperation::Pending),
            ("s1".to_owned(), WaitOperation::Reconciled),
        ]
    );
}

#[tokio::test]
async fn deadline_during_wait_finishes_group_and_keeps_ledger() {
    let h = Harness::new();
    let d1 = deployment("d1");
    let ctx = RunContext::with_timeout(Duration::from_millis(200));

    let events = tokio::time::timeout(
        Duration::from_secs(5),
        collect_events(h.applier().run(
            ctx.clone(),
            inv(),
            ResourceSet::from(vec![d1.clone()]),
            waiting(Duration::from_secs(60)),
        )),
    )
    .await
    .expect("event stream must close after the deadline");

    assert_eq!(ctx.err(), Some(CancelReason::DeadlineExceeded));
    assert_eq!(
        started_groups(&events),
        vec!["inventory-add-0", "apply-0", "wait-0"]
    );
    assert_eq!(
        wait_ops(&events),
        vec![
            ("d1".to_owned(), WaitOperation::Pending),
            ("d1".to_owned(), WaitOperation::Timeout),
        ]
    );
    assert_well_formed(&events);
    // The object was created but the ledger was never written.
    assert!(h.store.contains(&id_of(&d1)));
    assert!(h.inventory.objects(&inv()).is_none());
}

#[tokio::test]
async fn explicit_cancel_during_wait() {
    let h = Harness::new();
    let ctx = RunContext::background();
    let mut rx = h.applier().run(
        ctx.clone(),
        inv(),
        ResourceSet::from(vec![deployment("d1")]),
        waiting(Duration::from_secs(60)),
    );

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let entered_wait = matches!(
            &event,
            Event::ActionGroup { action: ActionKind::Wait, phase: GroupPhase::Started, .. }
        );
        events.push(event);
        if entered_wait {
            ctx.cancel();
        }
    }

    assert_eq!(ctx.err(), Some(CancelReason::Cancelled));
    assert!(matches!(
        events.last(),
        Some(Event::ActionGroup { group, phase: GroupPhase::Finished, .. }) if group == "wait-0"
    ));
    assert_well_formed(&events);
}

#[tokio::test]
async fn reconcile_timeout_finishes_wait_and_run_continues() {
    let h = Harness::new();
    let d1 = deployment("d1");

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![d1.clone()]),
        waiting(Duration::from_millis(100)),
    ))
    .await;

    assert!(wait_ops(&events).contains(&("d1".to_owned(), WaitOperation::Timeout)));
    assert_eq!(
        started_groups(&events).last().map(String::as_str),
        Some("inventory-set-0")
    );
    assert_eq!(
        h.inventory.objects(&inv()).unwrap(),
        IdSet::from(vec![id_of(&d1)])
    );
}

#[tokio::test]
async fn failed_status_ends_wait_for_object() {
    let d1 = deployment("d1");
    let poller = ScriptedPoller::new();
    poller.push_status(id_of(&d1), Status::Failed);
    let h = Harness::with_poller(poller);

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![d1]),
        waiting(Duration::from_secs(30)),
    ))
    .await;

    assert_eq!(
        wait_ops(&events),
        vec![
            ("d1".to_owned(), WaitOperation::Pending),
            ("d1".to_owned(), WaitOperation::Failed),
        ]
    );
}

#[tokio::test]
async fn prune_wait_observes_deletion() {
    let d1 = owned_by(deployment("d1"), "test");
    let poller = ScriptedPoller::new();
    poller
        .push_status(id_of(&d1), Status::Terminating)
        .push_status(id_of(&d1), Status::NotFound);
    let h = Harness::with_poller(poller);
    h.store.insert(d1.clone()).unwrap();
    h.inventory.seed(&inv(), IdSet::from(vec![id_of(&d1)]));

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::new(),
        waiting(Duration::from_secs(30)),
    ))
    .await;

    assert_eq!(
        started_groups(&events),
        vec!["inventory-add-0", "prune-0", "wait-0", "inventory-set-0"]
    );
    assert_eq!(
        wait_ops(&events),
        vec![
            ("d1".to_owned(), WaitOperation::Pending),
            ("d1".to_owned(), WaitOperation::Reconciled),
        ]
    );
}

#[tokio::test]
async fn status_feed_failure_stops_run() {
    let poller = ScriptedPoller::new();
    poller.push(PollEvent::Error("watch closed by server".to_owned()));
    let h = Harness::with_poller(poller);

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![deployment("d1")]),
        waiting(Duration::from_secs(30)),
    ))
    .await;

    let error = events
        .iter()
        .find_map(|e| match e {
            Event::Error { error } => Some(error),
            _ => None,
        })
        .unwrap();
    assert!(error.message.contains("watch closed"));
    assert_eq!(
        started_groups(&events),
        vec!["inventory-add-0", "apply-0", "wait-0"]
    );
    assert_well_formed(&events);
    assert!(h.inventory.objects(&inv()).is_none());
}

#[tokio::test]
async fn inventory_object_in_desired_set_is_invalid_input() {
    let h = Harness::new();
    let inventory_object = Resource::new("v1", "ConfigMap", "default", "inventory-obj");

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![deployment("d1"), inventory_object]),
        Options::default(),
    ))
    .await;

    assert_eq!(events.len(), 1);
    let Event::Error { error } = &events[0] else {
        panic!("expected a single error event, got {events:?}");
    };
    assert_eq!(error.kind, ErrorKind::InvalidInput);
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn ledger_of_another_inventory_id_is_invalid_input() {
    let h = Harness::new();
    h.inventory.seed(
        &InventoryInfo::new("inventory-obj", "default", "someone-else"),
        IdSet::new(),
    );

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![deployment("d1")]),
        Options::default(),
    ))
    .await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].error().unwrap().kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn failed_new_object_is_not_recorded() {
    let h = Harness::new();
    let d1 = deployment("d1");
    let d2 = deployment("d2");
    h.store
        .inject_fault(StoreOp::Create, &id_of(&d2), "quota exceeded");

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![d1.clone(), d2]),
        Options::default(),
    ))
    .await;

    assert_eq!(
        apply_ops(&events),
        vec![
            ("d1".to_owned(), ApplyOperation::Created),
            ("d2".to_owned(), ApplyOperation::Errored),
        ]
    );
    assert_eq!(
        h.inventory.objects(&inv()).unwrap(),
        IdSet::from(vec![id_of(&d1)])
    );
}

#[tokio::test]
async fn unidentifiable_object_is_reported_and_others_applied() {
    let h = Harness::new();
    let nameless = Resource::new("v1", "ConfigMap", "default", "");

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![nameless, deployment("d1")]),
        Options::default(),
    ))
    .await;

    assert!(matches!(events[0], Event::Init { .. }));
    assert_eq!(events[1].error().unwrap().kind, ErrorKind::Unsupported);
    assert_eq!(apply_ops(&events), vec![("d1".to_owned(), ApplyOperation::Created)]);
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let h = Harness::new();
    let old = owned_by(secret("old"), "test");
    h.store.insert(old.clone()).unwrap();
    h.inventory.seed(&inv(), IdSet::from(vec![id_of(&old)]));
    let opts = Options {
        dry_run: true,
        reconcile_timeout: Duration::from_secs(30),
        ..Options::default()
    };

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![deployment("d1")]),
        opts,
    ))
    .await;

    assert_eq!(apply_ops(&events), vec![("d1".to_owned(), ApplyOperation::Created)]);
    assert_eq!(prune_ops(&events), vec![("old".to_owned(), PruneOperation::Pruned)]);
    assert!(!started_groups(&events).iter().any(|g| g.starts_with("wait")));
    assert_eq!(h.store.write_count(), 0);
    assert!(h.store.contains(&id_of(&old)));
    assert_eq!(h.inventory.save_count(), 0);
}

#[tokio::test]
async fn kind_phases_split_apply_into_batches() {
    let h = Harness::new();
    let ns = Resource::new("v1", "Namespace", "", "default");
    let applier = h
        .applier()
        .with_ordering(KindPhases::new().then([GroupKind::new("", "Namespace")]));

    let events = collect_events(applier.run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![deployment("d1"), ns]),
        Options::default(),
    ))
    .await;

    let in_group = |group: &str| -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Apply { group: g, id, .. } if g == group => Some(id.name.clone()),
                _ => None,
            })
            .collect()
    };
    assert_eq!(in_group("apply-0"), vec!["default"]);
    assert_eq!(in_group("apply-1"), vec!["d1"]);
    assert_well_formed(&events);
}

#[tokio::test]
async fn ledger_save_failure_is_reported() {
    let h = Harness::new();
    h.inventory.fail_saves(true);

    let events = collect_events(h.applier().run(
        RunContext::background(),
        inv(),
        ResourceSet::from(vec![deployment("d1")]),
        Options::default(),
    ))
    .await;

    let last_error = events.iter().rev().find_map(Event::error).unwrap();
    assert_eq!(last_error.kind, ErrorKind::Store);
    assert_well_formed(&events);
}
