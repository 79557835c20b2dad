//! Narrowing discovered repositories to the configured selection.

use crate::config::{MigrateConfig, MigrateType};
use crate::source::SourceRepository;
use crate::types::PlatformKind;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of applying the selection.
#[derive(Debug, Default)]
pub struct Selection {
    /// Repositories to migrate, in discovery order.
    pub repos: Vec<Arc<dyn SourceRepository>>,
    /// Discovered repositories dropped as duplicates.
    pub duplicates: usize,
    /// Configured entries that matched nothing.
    pub not_found: Vec<String>,
}

/// Trim entries, drop blanks and duplicates; returns the list and the duplicate count.
pub fn normalize_entries(entries: &[String]) -> (Vec<String>, usize) {
    let mut seen = HashSet::new();
    let mut list = Vec::new();
    let mut duplicates = 0;
    for entry in entries {
        let entry = entry.trim().trim_matches('/').trim_end_matches(".git");
        if entry.is_empty() {
            continue;
        }
        if seen.insert(entry.to_string()) {
            list.push(entry.to_string());
        } else {
            duplicates += 1;
        }
    }
    (list, duplicates)
}

/// Drop repositories whose path was already seen.
pub fn dedup_repositories(repos: Vec<Arc<dyn SourceRepository>>) -> (Vec<Arc<dyn SourceRepository>>, usize) {
    let mut seen = HashSet::new();
    let before = repos.len();
    let unique: Vec<_> = repos
        .into_iter()
        .filter(|r| seen.insert(r.record().repo_path.clone()))
        .collect();
    let dropped = before - unique.len();
    (unique, dropped)
}

/// Apply repository-mode and project-mode filters for platforms whose
/// discovery does not already honour them.
pub fn select(repos: Vec<Arc<dyn SourceRepository>>, config: &MigrateConfig) -> Selection {
    let (repos, duplicates) = dedup_repositories(repos);
    if duplicates > 0 {
        warn!(duplicates, "Dropped duplicate repositories from discovery");
    }
    let platform = config.source.platform;
    let mut selection = Selection {
        repos,
        duplicates,
        not_found: Vec::new(),
    };

    match config.migrate.migrate_type {
        MigrateType::Repo if !matches!(platform, PlatformKind::Coding | PlatformKind::Common) => {
            let (wanted, repeated) = normalize_entries(&config.source.repo);
            if repeated > 0 {
                warn!(repeated, "Duplicate entries in source.repo");
            }
            let available: HashSet<String> = selection
                .repos
                .iter()
                .map(|r| r.record().repo_path.clone())
                .collect();
            selection.not_found = wanted
                .iter()
                .filter(|w| !available.contains(*w))
                .cloned()
                .collect();
            let wanted: HashSet<String> = wanted.into_iter().collect();
            selection
                .repos
                .retain(|r| wanted.contains(&r.record().repo_path));
        }
        MigrateType::Project if !matches!(platform, PlatformKind::Coding | PlatformKind::GitLab) => {
            let (projects, _) = normalize_entries(&config.source.project);
            selection.not_found = projects
                .iter()
                .filter(|p| {
                    !selection
                        .repos
                        .iter()
                        .any(|r| in_project(&r.record().repo_path, p))
                })
                .cloned()
                .collect();
            selection
                .repos
                .retain(|r| projects.iter().any(|p| in_project(&r.record().repo_path, p)));
        }
        _ => {}
    }

    for missing in &selection.not_found {
        warn!(entry = %missing, "Configured entry not found on the source platform");
    }
    info!(
        selected = selection.repos.len(),
        not_found = selection.not_found.len(),
        "Repository selection ready"
    );
    selection
}

fn in_project(repo_path: &str, project: &str) -> bool {
    repo_path
        .strip_prefix(project)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BasicRepository;
    use crate::types::RepositoryRecord;

    fn repos(paths: &[&str]) -> Vec<Arc<dyn SourceRepository>> {
        paths
            .iter()
            .map(|p| {
                Arc::new(BasicRepository::new(RepositoryRecord::new(*p), String::new()))
                    as Arc<dyn SourceRepository>
            })
            .collect()
    }

    fn config(yaml_migrate: &str, extra_source: &str) -> MigrateConfig {
        MigrateConfig::from_yaml_str(&format!(
            "source:\n  platform: gitlab\n  url: https://gitlab.example.com\n  token: x\n{extra_source}target:\n  token: t\n  root_organization: acme\nmigrate:\n{yaml_migrate}"
        ))
        .unwrap()
    }

    fn paths(selection: &Selection) -> Vec<String> {
        selection
            .repos
            .iter()
            .map(|r| r.record().repo_path.clone())
            .collect()
    }

    #[test]
    fn test_normalize_entries() {
        let entries = vec![
            " a/b ".to_string(),
            "a/b".to_string(),
            "".to_string(),
            "c/d.git".to_string(),
        ];
        let (list, duplicates) = normalize_entries(&entries);
        assert_eq!(list, vec!["a/b", "c/d"]);
        assert_eq!(duplicates, 1);
    }

    #[test]
    fn test_team_mode_only_dedups() {
        let selection = select(repos(&["a/x", "a/y", "a/x"]), &config("  type: team\n", ""));
        assert_eq!(paths(&selection), vec!["a/x", "a/y"]);
        assert_eq!(selection.duplicates, 1);
    }

    #[test]
    fn test_repo_mode_filters_and_reports_missing() {
        let cfg = config("  type: repo\n", "  repo: [a/x, ' a/x', b/z]\n");
        let selection = select(repos(&["a/x", "a/y"]), &cfg);
        assert_eq!(paths(&selection), vec!["a/x"]);
        assert_eq!(selection.not_found, vec!["b/z"]);
    }

    #[test]
    fn test_project_mode_matches_whole_segments() {
        let mut cfg = config("  type: team\n", "");
        cfg.source.platform = PlatformKind::GitHub;
        cfg.migrate.migrate_type = MigrateType::Project;
        cfg.source.project = vec!["team".to_string(), "ghost".to_string()];

        let selection = select(repos(&["team/a", "teammate/b", "team/sub/c"]), &cfg);
        assert_eq!(paths(&selection), vec!["team/a", "team/sub/c"]);
        assert_eq!(selection.not_found, vec!["ghost"]);
    }

    #[test]
    fn test_gitlab_project_mode_is_left_to_discovery() {
        let cfg = config("  type: project\n", "  project: [team]\n");
        let selection = select(repos(&["other/a"]), &cfg);
        assert_eq!(paths(&selection), vec!["other/a"]);
    }
}
