use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use git2::{Delta, DiffOptions, Repository};

/// Read-only view of the workspace repository, used to observe what an
/// agent did when its output does not say.
pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::discover(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Tracker for `project_dir`, or `None` when it is not inside a repository.
    pub fn open(project_dir: &Path) -> Option<Self> {
        Self::new(project_dir).ok()
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Full sha of HEAD, `None` on an unborn branch.
    pub fn head_sha(&self) -> Option<String> {
        self.head_commit().map(|c| c.id().to_string())
    }

    /// Abbreviated id of HEAD when it differs from `before`.
    pub fn new_commit_since(&self, before: Option<&str>) -> Option<String> {
        let head = self.head_commit()?;
        if before == Some(head.id().to_string().as_str()) {
            return None;
        }
        let short = head.as_object().short_id().ok()?;
        short.as_str().map(str::to_string)
    }

    /// Paths that differ between `before` and the working tree (index and
    /// untracked files included). With no `before` commit, every untracked
    /// or staged file counts.
    pub fn changed_paths_since(&self, before: Option<&str>) -> Result<BTreeSet<String>> {
        let before_tree = match before {
            Some(sha) => {
                let oid = git2::Oid::from_str(sha)?;
                Some(self.repo.find_commit(oid)?.tree()?)
            }
            None => None,
        };

        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);

        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(before_tree.as_ref(), Some(&mut opts))?;

        let mut paths = BTreeSet::new();
        diff.foreach(
            &mut |delta, _progress| {
                let file = match delta.status() {
                    Delta::Deleted => delta.old_file(),
                    _ => delta.new_file(),
                };
                if let Some(path) = file.path() {
                    paths.insert(path.to_string_lossy().to_string());
                }
                true
            },
            None,
            None,
            None,
        )?;

        Ok(paths)
    }
}
