// Git error types

use std::path::PathBuf;

#[derive(Debug)]
pub enum GitError {
    NotAGitRepo(PathBuf),
    BareRepository,
    Git2Error(git2::Error),
    IoError(std::io::Error),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::NotAGitRepo(path) => {
                write!(f, "{} is not in a git repository", path.display())
            }
            GitError::BareRepository => write!(f, "Bare repositories have no working tree to sync"),
            GitError::Git2Error(err) => write!(f, "Git error: {}", err),
            GitError::IoError(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for GitError {}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        GitError::Git2Error(err)
    }
}

impl From<std::io::Error> for GitError {
    fn from(err: std::io::Error) -> Self {
        GitError::IoError(err)
    }
}

pub type Result<T> = std::result::Result<T, GitError>;
