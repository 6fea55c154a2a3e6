//! tasklink links command implementation

use serde::Serialize;

use crate::cli::LoadedConfig;
use crate::error::Result;
use crate::link::SyncLink;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::storage::LinkStore;

pub struct LinksOptions {
    pub loaded: LoadedConfig,
    pub partition: Option<String>,
    pub output: OutputOptions,
}

#[derive(Serialize)]
struct LinksResult {
    path: String,
    count: usize,
    legacy: usize,
    links: Vec<SyncLink>,
}

pub fn run(options: LinksOptions) -> Result<()> {
    let path = options.loaded.link_file();
    let store = LinkStore::new(&path, options.loaded.config.lock_timeout_ms);
    let mut links = store.load_strict()?;
    if let Some(partition) = &options.partition {
        links.retain(|link| link.belongs_to(partition));
    }

    let legacy = links.iter().filter(|link| link.is_legacy()).count();
    let mut human = HumanOutput::new(format!("tasklink links: {} link(s)", links.len()));
    human.push_summary("file", path.display().to_string());
    if let Some(partition) = &options.partition {
        human.push_summary("partition", partition.clone());
    }
    for link in &links {
        human.push_detail(format!(
            "[{}] {} <-> {} ({:.2})",
            link.partition_id.as_deref().unwrap_or("legacy"),
            link.source_id,
            link.dest_id,
            link.score
        ));
    }
    if legacy > 0 {
        human.push_warning(format!(
            "{legacy} legacy link(s) without a partition; the next sync adopts them"
        ));
    }

    let result = LinksResult {
        path: path.display().to_string(),
        count: links.len(),
        legacy,
        links,
    };
    emit_success(options.output, "links", &result, Some(&human))
}
