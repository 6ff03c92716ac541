// Local repository access for sandbox sync

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub mod error;

pub use error::{GitError, Result};

/// Local working-tree changes relative to a base commit.
#[derive(Debug, Clone, Default)]
pub struct PatchFile {
    /// Commit the patch was taken against; `None` in a repo with no commits.
    pub base: Option<String>,
    /// Binary-safe patch covering the index, working tree and untracked files.
    pub patch: Vec<u8>,
    /// Every path the patch touches.
    pub changed_paths: Vec<String>,
    /// Changed paths tracked by large-file storage.
    pub lfs_files: Vec<String>,
}

impl PatchFile {
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty()
    }

    pub fn has_lfs_changes(&self) -> bool {
        !self.lfs_files.is_empty()
    }
}

pub trait VersionControl {
    /// Root of the working tree.
    fn root(&self) -> &Path;

    /// `None` when HEAD is detached.
    fn current_branch(&self) -> Result<Option<String>>;

    fn head_commit(&self) -> Result<Option<String>>;

    fn generate_patch(&self) -> Result<PatchFile>;

    /// Paths changed locally since the base commit, including untracked files.
    fn changed_paths(&self) -> Result<Vec<String>>;
}

pub struct GitRepository {
    root: PathBuf,
}

impl GitRepository {
    pub fn discover(path: &Path) -> Result<Self> {
        let repo = git2::Repository::discover(path)
            .map_err(|_| GitError::NotAGitRepo(path.to_path_buf()))?;
        let root = repo.workdir().ok_or(GitError::BareRepository)?.to_path_buf();
        Ok(Self { root })
    }

    fn open(&self) -> Result<git2::Repository> {
        Ok(git2::Repository::open(&self.root)?)
    }

    /// The commit local changes are measured against: the merge-base with
    /// the upstream branch when there is one, otherwise HEAD.
    fn base_commit<'r>(repo: &'r git2::Repository) -> Result<Option<git2::Commit<'r>>> {
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let head_commit = head.peel_to_commit()?;

        let upstream_base = head
            .shorthand()
            .filter(|_| head.is_branch())
            .and_then(|name| repo.find_branch(name, git2::BranchType::Local).ok())
            .and_then(|branch| branch.upstream().ok())
            .and_then(|upstream| upstream.get().target())
            .and_then(|upstream| repo.merge_base(head_commit.id(), upstream).ok());

        match upstream_base {
            Some(oid) if oid != head_commit.id() => Ok(Some(repo.find_commit(oid)?)),
            _ => Ok(Some(head_commit)),
        }
    }

    fn diff_against_base<'r>(
        repo: &'r git2::Repository,
        base: Option<&git2::Commit<'r>>,
        with_content: bool,
    ) -> Result<git2::Diff<'r>> {
        let tree = base.map(|c| c.tree()).transpose()?;

        let mut opts = git2::DiffOptions::new();
        opts.include_untracked(true);
        opts.recurse_untracked_dirs(true);
        if with_content {
            opts.show_untracked_content(true);
            opts.show_binary(true);
        }

        Ok(repo.diff_tree_to_workdir_with_index(tree.as_ref(), Some(&mut opts))?)
    }

    fn delta_paths(diff: &git2::Diff<'_>) -> Vec<String> {
        let mut paths = BTreeSet::new();
        for delta in diff.deltas() {
            for path in [delta.old_file().path(), delta.new_file().path()]
                .into_iter()
                .flatten()
            {
                paths.insert(path.to_string_lossy().to_string());
            }
        }
        paths.into_iter().collect()
    }

    fn is_lfs_tracked(repo: &git2::Repository, path: &str) -> Result<bool> {
        let filter = repo.get_attr(
            Path::new(path),
            "filter",
            git2::AttrCheckFlags::FILE_THEN_INDEX,
        )?;
        Ok(filter == Some("lfs"))
    }
}

impl VersionControl for GitRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let repo = self.open()?;
        let branch = match repo.head() {
            Ok(head) if head.is_branch() => head.shorthand().map(str::to_string),
            Ok(_) => None,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                let head = repo.find_reference("HEAD")?;
                head.symbolic_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"))
                    .map(str::to_string)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(branch)
    }

    fn head_commit(&self) -> Result<Option<String>> {
        let repo = self.open()?;
        let commit = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?.id().to_string()),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        Ok(commit)
    }

    fn generate_patch(&self) -> Result<PatchFile> {
        let repo = self.open()?;
        let base = Self::base_commit(&repo)?;
        let diff = Self::diff_against_base(&repo, base.as_ref(), true)?;

        let changed_paths = Self::delta_paths(&diff);
        let mut lfs_files = Vec::new();
        for path in &changed_paths {
            if Self::is_lfs_tracked(&repo, path)? {
                lfs_files.push(path.clone());
            }
        }

        let mut patch = Vec::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin() as u8);
            }
            patch.extend_from_slice(line.content());
            true
        })?;

        Ok(PatchFile {
            base: base.map(|c| c.id().to_string()),
            patch,
            changed_paths,
            lfs_files,
        })
    }

    fn changed_paths(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let base = Self::base_commit(&repo)?;
        let diff = Self::diff_against_base(&repo, base.as_ref(), false)?;
        Ok(Self::delta_paths(&diff))
    }
}
