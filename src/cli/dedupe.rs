//! tasklink dedupe command implementation

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::cli::LoadedConfig;
use crate::dedup::{DedupReport, DeleteReport, Deduplicator};
use crate::error::Result;
use crate::link::LinkSet;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::routing::TagRouter;
use crate::storage::{LinkStore, PartitionScope};
use crate::store::{JsonTaskFile, TaskFilter, TaskStore};

pub struct DedupeOptions {
    pub loaded: LoadedConfig,
    pub partition: Option<String>,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub delete: bool,
    pub dry_run: bool,
    pub output: OutputOptions,
}

#[derive(Serialize)]
struct DedupeResult {
    partition_id: String,
    #[serde(flatten)]
    report: DedupReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<DeleteReport>,
}

pub fn run(options: DedupeOptions) -> Result<()> {
    let config = &options.loaded.config;
    let partition = options.loaded.partition(options.partition.as_deref())?;
    let router = TagRouter::for_partition(partition);

    let timeout = config.lock_timeout_ms;
    let mut source = JsonTaskFile::new("source", &options.source).with_lock_timeout(timeout);
    let mut dest = JsonTaskFile::new("dest", &options.dest).with_lock_timeout(timeout);

    let sources = source.list(&TaskFilter::all().open_only())?;
    let dests = dest.list(&TaskFilter::in_containers(router.containers()).open_only())?;

    let link_store = LinkStore::new(options.loaded.link_file(), timeout);
    let scope = PartitionScope::new(
        partition.id.clone(),
        sources.iter().map(|t| t.id.clone()),
        dests.iter().map(|t| t.id.clone()),
    );
    let loaded_links = link_store.load_partition(&scope)?;

    let dedup = Deduplicator::new();
    let report = dedup.analyze(&sources, &dests, &loaded_links.links);

    let deleted = if options.delete {
        let targets: Vec<_> = report
            .clusters
            .iter()
            .flat_map(|cluster| dedup.plan_deletions(cluster))
            .collect();
        let mut links = LinkSet::from_links(loaded_links.links.clone());
        let deleted = dedup.delete(
            &targets,
            &mut source,
            &mut dest,
            &mut links,
            &HashSet::new(),
            options.dry_run,
        )?;
        if !options.dry_run && deleted.links_removed > 0 {
            link_store.persist(&scope, &links.into_vec())?;
        }
        Some(deleted)
    } else {
        None
    };

    let mut human = HumanOutput::new(format!(
        "tasklink dedupe: {} duplicate cluster(s) in {}",
        report.clusters.len(),
        partition.id
    ));
    human.push_summary("tasks", report.total_tasks.to_string());
    human.push_summary("duplicates", report.duplicate_task_count.to_string());
    for cluster in &report.clusters {
        human.push_detail(format!(
            "\"{}\": {} source, {} dest, {} linked",
            cluster.key,
            cluster.source_tasks.len(),
            cluster.dest_tasks.len(),
            cluster.linked.len()
        ));
    }
    if let Some(deleted) = &deleted {
        let verb = if deleted.dry_run { "would delete" } else { "deleted" };
        human.push_summary(
            verb,
            format!(
                "{} source, {} dest",
                deleted.source_deleted.len(),
                deleted.dest_deleted.len()
            ),
        );
    } else if !report.clusters.is_empty() {
        human.push_next_step("tasklink dedupe --delete --dry-run");
    }
    if let Some(message) = &loaded_links.corrupt {
        human.push_warning(format!("link file unreadable, links ignored: {message}"));
    }

    let result = DedupeResult {
        partition_id: partition.id.clone(),
        report,
        deleted,
    };
    emit_success(options.output, "dedupe", &result, Some(&human))
}
