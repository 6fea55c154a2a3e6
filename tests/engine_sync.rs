mod support;

use support::{note, partition, reminder, TestEnv, DEFAULT_LIST};
use tasklink::config::SyncConfig;
use tasklink::report::{RunMode, SyncAction};
use tasklink::store::{FailOn, MemoryTaskStore};
use tasklink::task::TaskStatus;
use tasklink::Error;

#[test]
fn new_source_task_gets_a_dest_counterpart_and_a_link() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders = MemoryTaskStore::new("rem");

    let report = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("sync");
    assert_eq!(report.counts.created_dest, 1);
    assert!(report.persisted);

    let created = reminders.get("rem-1").expect("dest counterpart");
    assert_eq!(created.text, "Buy milk");
    assert_eq!(created.container, DEFAULT_LIST);

    let links = env.partition_links("personal");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].source_id, "n1");
    assert_eq!(links[0].dest_id, "rem-1");
    assert!(links[0].last_synced.is_some());
}

#[test]
fn second_pass_is_idempotent() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks(
        "vault",
        [note("n1", "Buy milk"), note("n2", "Water plants")],
    );
    let mut reminders = MemoryTaskStore::with_tasks(
        "rem",
        [reminder("r-call", "Call mom", DEFAULT_LIST)],
    );

    let first = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("first pass");
    assert_eq!(first.counts.created_dest, 2);
    assert_eq!(first.counts.created_source, 1);

    let imported = vault
        .tasks()
        .find(|task| task.text == "Call mom")
        .expect("imported task");
    assert!(imported.tags.iter().any(|tag| tag == "from-reminders"));
    assert_eq!(imported.container, "Inbox.md");

    let link_bytes = env.link_bytes().expect("link file");
    let writes = (vault.writes(), reminders.writes());

    let second = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("second pass");
    assert!(second.is_quiet(), "unexpected actions: {:?}", second.actions);
    assert_eq!(second.counts.preserved, 3);
    assert_eq!((vault.writes(), reminders.writes()), writes);
    assert_eq!(env.link_bytes().expect("link file"), link_bytes);
}

#[test]
fn existing_pair_is_matched_instead_of_duplicated() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders =
        MemoryTaskStore::with_tasks("rem", [reminder("r1", "buy milk", DEFAULT_LIST)]);

    let report = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("sync");
    assert_eq!(report.counts.matched, 1);
    assert_eq!(report.creations(), 0);
    assert_eq!(reminders.len(), 1);
    assert_eq!(env.partition_links("personal")[0].dest_id, "r1");
}

#[test]
fn dry_run_writes_nothing() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders =
        MemoryTaskStore::with_tasks("rem", [reminder("r1", "Call mom", DEFAULT_LIST)]);

    let report = engine
        .run(&mut vault, &mut reminders, RunMode::DryRun)
        .expect("dry run");
    assert_eq!(report.counts.created_dest, 1);
    assert_eq!(report.counts.created_source, 1);
    assert!(!report.persisted);
    assert!(report.actions.iter().any(|action| matches!(
        action,
        SyncAction::CreateDest { dest_id: None, .. }
    )));

    assert_eq!(vault.writes(), 0);
    assert_eq!(reminders.writes(), 0);
    assert!(env.link_bytes().is_none());
}

#[test]
fn evaluate_leaves_stores_untouched() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders = MemoryTaskStore::new("rem");

    let report = engine
        .run(&mut vault, &mut reminders, RunMode::Evaluate)
        .expect("evaluate");
    assert_eq!(report.counts.created_dest, 1);
    assert!(!report.persisted);
    assert_eq!(reminders.writes(), 0);
    assert!(env.link_bytes().is_none());
}

#[test]
fn store_failure_aborts_without_touching_links() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders = MemoryTaskStore::new("rem");
    engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("first pass");
    let before = env.link_bytes().expect("link file");

    vault.insert(note("n2", "Walk dog"));
    reminders.fail_on(FailOn::Create);
    let err = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect_err("create failure");
    assert!(matches!(err, Error::StoreUnavailable { .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(env.link_bytes().expect("link file"), before);
}

#[test]
fn listing_failure_aborts_before_any_write() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders = MemoryTaskStore::new("rem");
    reminders.fail_on(FailOn::List);

    let err = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect_err("list failure");
    assert!(matches!(err, Error::StoreUnavailable { .. }));
    assert!(env.link_bytes().is_none());
    assert_eq!(vault.writes(), 0);
}

#[test]
fn completion_flows_to_the_older_side() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let earlier = chrono::Utc::now() - chrono::Duration::hours(1);
    let mut vault = MemoryTaskStore::with_tasks(
        "vault",
        [note("n1", "Buy milk").with_modified_at(earlier)],
    );
    let mut reminders = MemoryTaskStore::new("rem");
    engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("first pass");

    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    reminders.edit("rem-1", |task| {
        task.status = TaskStatus::Done;
        task.modified_at = Some(later);
    });

    let report = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("second pass");
    assert_eq!(report.counts.updated_source, 1);
    assert_eq!(report.counts.updated_dest, 0);
    assert_eq!(vault.get("n1").expect("source").status, TaskStatus::Done);
}

#[test]
fn deleted_source_propagates_to_dest() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders = MemoryTaskStore::new("rem");
    engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("first pass");

    vault.remove("n1");
    let report = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("second pass");
    assert_eq!(report.counts.deleted_dest, 1);
    assert_eq!(report.counts.created_source, 0);
    assert!(reminders.is_empty());
    assert!(env.partition_links("personal").is_empty());
}

#[test]
fn deletion_propagation_can_be_disabled() {
    let env = TestEnv::new();
    let sync = SyncConfig {
        propagate_deletions: false,
        ..SyncConfig::default()
    };
    let engine = env.engine_with(partition("personal"), sync);
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders = MemoryTaskStore::new("rem");
    engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("first pass");

    vault.remove("n1");
    let report = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("second pass");
    assert_eq!(report.counts.deleted_dest, 0);
    assert!(reminders.get("rem-1").is_some());
    // The surviving reminder comes back into the vault.
    assert_eq!(report.counts.created_source, 1);
}

#[test]
fn completed_tasks_are_not_given_counterparts() {
    let env = TestEnv::new();
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks(
        "vault",
        [note("n1", "Old chore").with_status(TaskStatus::Done)],
    );
    let mut reminders = MemoryTaskStore::with_tasks(
        "rem",
        [reminder("r1", "Finished", DEFAULT_LIST).with_status(TaskStatus::Done)],
    );

    let report = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("sync");
    assert_eq!(report.creations(), 0);
    assert_eq!(vault.writes() + reminders.writes(), 0);
}

#[test]
fn corrupt_link_file_is_reported_and_rewritten() {
    let env = TestEnv::new();
    env.write_file("links.json", "{ not json");
    let engine = env.engine(partition("personal"));
    let mut vault = MemoryTaskStore::with_tasks("vault", [note("n1", "Buy milk")]);
    let mut reminders = MemoryTaskStore::new("rem");

    let report = engine
        .run(&mut vault, &mut reminders, RunMode::Apply)
        .expect("sync");
    assert_eq!(report.issues.len(), 1);
    assert_eq!(env.partition_links("personal").len(), 1);
}
