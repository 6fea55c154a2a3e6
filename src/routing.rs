//! Tag-based routing of tasks to dest containers.
//!
//! A route maps a tag to a container. Nested tags (`work/urgent`) match the
//! route for their parent (`work`); when several routes match, the longest
//! route tag wins, then configuration order.

use serde::{Deserialize, Serialize};

use crate::config::PartitionConfig;
use crate::text::normalize_tag;

/// Whether untagged tasks in a routed container are imported into the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Only tasks already mirrored from the vault participate
    #[default]
    ExistingOnly,
    /// Every open task in the container is imported
    FullImport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRoute {
    pub tag: String,
    #[serde(alias = "target_container")]
    pub container: String,
    #[serde(default)]
    pub import_mode: ImportMode,
}

impl TagRoute {
    pub fn new(tag: impl Into<String>, container: impl Into<String>, import_mode: ImportMode) -> Self {
        Self {
            tag: tag.into(),
            container: container.into(),
            import_mode,
        }
    }
}

/// Outcome of routing a set of tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// A tag route claimed the task
    Routed { tag: String, container: String },
    /// No route matched; the partition default applies
    Default(String),
    /// No route matched and the partition has no default container
    Miss,
}

impl RouteDecision {
    pub fn container(&self) -> Option<&str> {
        match self {
            RouteDecision::Routed { container, .. } => Some(container),
            RouteDecision::Default(container) => Some(container),
            RouteDecision::Miss => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagRouter {
    routes: Vec<TagRoute>,
    default_container: Option<String>,
}

impl TagRouter {
    pub fn new(routes: Vec<TagRoute>, default_container: Option<String>) -> Self {
        Self {
            routes,
            default_container,
        }
    }

    pub fn for_partition(partition: &PartitionConfig) -> Self {
        Self::new(partition.routes.clone(), partition.default_container.clone())
    }

    pub fn default_container(&self) -> Option<&str> {
        self.default_container.as_deref()
    }

    /// Route the most specific matching tag, falling back to the default.
    pub fn route(&self, tags: &[String]) -> RouteDecision {
        match self.best_route(tags) {
            Some(route) => RouteDecision::Routed {
                tag: normalize_tag(&route.tag),
                container: route.container.clone(),
            },
            None => match &self.default_container {
                Some(container) => RouteDecision::Default(container.clone()),
                None => RouteDecision::Miss,
            },
        }
    }

    /// The route claiming a container, if any.
    pub fn route_for_container(&self, container: &str) -> Option<&TagRoute> {
        self.routes.iter().find(|route| route.container == container)
    }

    /// Tag a task imported from `container` should carry in the vault.
    pub fn reverse_tag(&self, container: &str) -> Option<String> {
        self.route_for_container(container)
            .map(|route| normalize_tag(&route.tag))
    }

    /// Whether unlinked open tasks found in `container` are imported.
    pub fn imports_from(&self, container: &str) -> bool {
        match self.route_for_container(container) {
            Some(route) => route.import_mode == ImportMode::FullImport,
            None => true,
        }
    }

    /// Every dest container this partition reads from.
    pub fn containers(&self) -> Vec<String> {
        let mut containers: Vec<String> = Vec::new();
        if let Some(default) = &self.default_container {
            containers.push(default.clone());
        }
        for route in &self.routes {
            if !containers.contains(&route.container) {
                containers.push(route.container.clone());
            }
        }
        containers
    }

    fn best_route(&self, tags: &[String]) -> Option<&TagRoute> {
        let task_tags: Vec<String> = tags.iter().map(|tag| normalize_tag(tag)).collect();
        let mut best: Option<&TagRoute> = None;
        let mut best_len = 0;
        for route in &self.routes {
            let route_tag = normalize_tag(&route.tag);
            if route_tag.is_empty() {
                continue;
            }
            let matched = task_tags.iter().any(|tag| tag_matches(tag, &route_tag));
            if matched && route_tag.len() > best_len {
                best_len = route_tag.len();
                best = Some(route);
            }
        }
        best
    }
}

fn tag_matches(task_tag: &str, route_tag: &str) -> bool {
    task_tag == route_tag
        || task_tag
            .strip_prefix(route_tag)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TagRouter {
        TagRouter::new(
            vec![
                TagRoute::new("#work", "Work", ImportMode::FullImport),
                TagRoute::new("work/urgent", "Urgent", ImportMode::ExistingOnly),
                TagRoute::new("home", "Home", ImportMode::ExistingOnly),
            ],
            Some("Reminders".to_string()),
        )
    }

    #[test]
    fn longest_tag_wins() {
        let decision = router().route(&["home".to_string(), "#work/urgent".to_string()]);
        assert_eq!(
            decision,
            RouteDecision::Routed {
                tag: "work/urgent".to_string(),
                container: "Urgent".to_string()
            }
        );
    }

    #[test]
    fn nested_tag_matches_parent_route() {
        let decision = router().route(&["work/meetings".to_string()]);
        assert_eq!(decision.container(), Some("Work"));
        let decision = router().route(&["workshop".to_string()]);
        assert_eq!(decision, RouteDecision::Default("Reminders".to_string()));
    }

    #[test]
    fn equal_length_routes_use_config_order() {
        let router = TagRouter::new(
            vec![
                TagRoute::new("aa", "First", ImportMode::ExistingOnly),
                TagRoute::new("bb", "Second", ImportMode::ExistingOnly),
            ],
            None,
        );
        let decision = router.route(&["bb".to_string(), "aa".to_string()]);
        assert_eq!(decision.container(), Some("First"));
    }

    #[test]
    fn miss_without_default() {
        let router = TagRouter::new(Vec::new(), None);
        assert_eq!(router.route(&["x".to_string()]), RouteDecision::Miss);
    }

    #[test]
    fn reverse_routing_and_import_mode() {
        let router = router();
        assert_eq!(router.reverse_tag("Work").as_deref(), Some("work"));
        assert_eq!(router.reverse_tag("Reminders"), None);
        assert!(router.imports_from("Work"));
        assert!(!router.imports_from("Home"));
        assert!(router.imports_from("Reminders"));
        assert_eq!(router.containers(), vec!["Reminders", "Work", "Urgent", "Home"]);
    }
}
