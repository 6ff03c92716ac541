//! Session key encoding
//!
//! A session key identifies "this directory, on this branch, with this config
//! file" as a single string: `cwd:branch:config_file`. Directory paths may
//! contain colons, so decoding always splits from the right.

/// Branch name recorded when the repository has no current branch.
pub const DETACHED_BRANCH: &str = "detached";

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub cwd: String,
    pub branch: String,
    pub config_file: String,
}

impl SessionKey {
    pub fn new(cwd: &str, branch: &str, config_file: &str) -> Self {
        Self {
            cwd: cwd.to_string(),
            branch: normalize_branch(branch).to_string(),
            config_file: config_file.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        encode(&self.cwd, &self.branch, &self.config_file)
    }

    pub fn decode(key: &str) -> Self {
        let (cwd, branch, config_file) = decode(key);
        Self {
            cwd,
            branch,
            config_file,
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

pub fn normalize_branch(branch: &str) -> &str {
    if branch.is_empty() {
        DETACHED_BRANCH
    } else {
        branch
    }
}

pub fn encode(cwd: &str, branch: &str, config_file: &str) -> String {
    format!(
        "{cwd}{SEPARATOR}{}{SEPARATOR}{config_file}",
        normalize_branch(branch)
    )
}

/// Splits a key back into `(cwd, branch, config_file)`.
///
/// Keys with fewer than two separators are not rejected: the fields that
/// cannot be found come back empty, leading fields first. Stored keys written
/// by older or newer versions therefore still load instead of poisoning the
/// whole store.
pub fn decode(key: &str) -> (String, String, String) {
    let Some((rest, config_file)) = key.rsplit_once(SEPARATOR) else {
        return (String::new(), String::new(), key.to_string());
    };

    let Some((cwd, branch)) = rest.rsplit_once(SEPARATOR) else {
        return (String::new(), rest.to_string(), config_file.to_string());
    };

    (cwd.to_string(), branch.to_string(), config_file.to_string())
}

/// The prefix every key for `cwd` on `branch` starts with.
pub fn cwd_branch_prefix(cwd: &str, branch: &str) -> String {
    format!("{cwd}{SEPARATOR}{}{SEPARATOR}", normalize_branch(branch))
}
