//! tasklink sync command implementation

use std::path::PathBuf;

use crate::cli::LoadedConfig;
use crate::engine::SyncEngine;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::report::{RunMode, SyncReport};
use crate::store::JsonTaskFile;

pub struct SyncOptions {
    pub loaded: LoadedConfig,
    pub partition: Option<String>,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub dry_run: bool,
    pub evaluate: bool,
    pub dedupe: bool,
    pub output: OutputOptions,
}

pub fn run(mut options: SyncOptions) -> Result<()> {
    if options.dedupe {
        options.loaded.config.sync.dedupe = true;
    }
    let partition = options.loaded.partition(options.partition.as_deref())?;
    let engine = SyncEngine::new(
        &options.loaded.config,
        &partition.id,
        options.loaded.link_file(),
    )?;

    let timeout = options.loaded.config.lock_timeout_ms;
    let mut source = JsonTaskFile::new("source", &options.source).with_lock_timeout(timeout);
    let mut dest = JsonTaskFile::new("dest", &options.dest).with_lock_timeout(timeout);

    let mode = if options.dry_run {
        RunMode::DryRun
    } else if options.evaluate {
        RunMode::Evaluate
    } else {
        RunMode::Apply
    };

    let report = engine.run(&mut source, &mut dest, mode)?;
    let human = render(&report);
    emit_success(options.output, "sync", &report, Some(&human))
}

fn render(report: &SyncReport) -> HumanOutput {
    let header = if report.is_quiet() && report.issues.is_empty() {
        format!("tasklink sync: {} up to date", report.partition_id)
    } else {
        format!("tasklink sync: {} ({})", report.partition_id, report.mode)
    };
    let counts = &report.counts;

    let mut human = HumanOutput::new(header);
    human.push_summary(
        "tasks",
        format!("{} source, {} dest", counts.source_tasks, counts.dest_tasks),
    );
    human.push_summary(
        "links",
        format!(
            "{} ({} kept, {} matched, {} remapped, {} dropped)",
            report.links, counts.preserved, counts.matched, counts.remapped, counts.links_dropped
        ),
    );
    human.push_summary(
        "created",
        format!("{} source, {} dest", counts.created_source, counts.created_dest),
    );
    human.push_summary(
        "updated",
        format!("{} source, {} dest", counts.updated_source, counts.updated_dest),
    );
    if counts.moved > 0 {
        human.push_summary("moved", counts.moved.to_string());
    }
    if counts.deleted_dest > 0 {
        human.push_summary("deleted", counts.deleted_dest.to_string());
    }
    if counts.deleted_duplicates > 0 {
        human.push_summary("duplicates removed", counts.deleted_duplicates.to_string());
    }

    for action in &report.actions {
        human.push_detail(action.to_string());
    }
    for issue in &report.issues {
        human.push_warning(issue.to_string());
    }
    match report.mode {
        RunMode::DryRun if !report.is_quiet() => {
            human.push_next_step("tasklink sync (without --dry-run) to apply");
        }
        RunMode::Evaluate if !report.is_quiet() => {
            human.push_next_step("tasklink sync to apply store changes");
        }
        _ => {}
    }
    human
}
