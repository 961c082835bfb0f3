//! Project resolution (C9, spec §4.9): derive a stable identifier for the
//! workspace calling into the store, so memories and tasks can be scoped to
//! "this repo" without the caller having to invent an id itself.
//!
//! Grounded on `sync/git.rs`'s use of `git2` to talk to a repository --
//! reused here for `Repository::discover`, which already walks upward
//! through parent directories and already resolves a worktree's `gitdir:`
//! pointer file the way the spec's manual walk would, so there is no need
//! to re-implement that walk by hand.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Resolved project identity: a stable id plus, when derivable, a
/// human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    pub project_id: String,
    pub project_name: Option<String>,
}

/// Derive a project identity for `cwd`: the normalized `origin` remote URL
/// if `cwd` sits inside a git repository with one configured, otherwise the
/// normalized filesystem path.
pub fn detect(cwd: &Path) -> ProjectIdentity {
    if let Some(url) = origin_url(cwd) {
        let normalized = normalize_remote_url(&url);
        return ProjectIdentity {
            project_id: hash_id(&normalized),
            project_name: project_name_from_url(&normalized),
        };
    }

    let normalized = normalize_path(cwd);
    ProjectIdentity {
        project_id: hash_id(&normalized),
        project_name: None,
    }
}

/// Find `cwd`'s repository (if any) and its `origin` remote URL.
fn origin_url(cwd: &Path) -> Option<String> {
    let repo = git2::Repository::discover(cwd).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    remote.url().map(|s| s.to_string())
}

/// Normalize a git remote URL so that SSH and HTTPS forms of the same
/// repository hash to the same project id (spec §4.9 step 3, invariant
/// tested in §8: "normalize(SSH form) = normalize(HTTPS form)").
pub fn normalize_remote_url(url: &str) -> String {
    let trimmed = url.trim();
    let stripped = trimmed.strip_prefix("ssh://").unwrap_or(trimmed);

    // git@host:path -> https://host/path
    let rewritten = match stripped.split_once('@') {
        Some((_, after_at)) if !stripped.contains("://") => match after_at.split_once(':') {
            Some((host, path)) => format!("https://{host}/{path}"),
            None => stripped.to_string(),
        },
        _ => stripped.to_string(),
    };

    let with_scheme = if rewritten.contains("://") {
        rewritten
    } else {
        format!("https://{rewritten}")
    };

    let without_git_suffix = with_scheme
        .strip_suffix(".git")
        .unwrap_or(&with_scheme)
        .to_string();
    let without_trailing_slash = without_git_suffix
        .strip_suffix('/')
        .unwrap_or(&without_git_suffix)
        .to_string();

    lowercase_host(&without_trailing_slash)
}

/// Lowercase only the scheme + host portion of a URL, preserving path case,
/// and drop any `user@`/`user:pass@` userinfo from the authority so that
/// `ssh://git@host/path` and the scp-like `git@host:path` rewrite converge
/// on the same normalized form.
fn lowercase_host(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_lowercase();
    };
    let (scheme, rest) = url.split_at(scheme_end + 3);
    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    let host = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    format!("{}{}{}", scheme.to_lowercase(), host.to_lowercase(), path)
}

/// Normalize a filesystem path for the no-remote fallback (spec §4.9 step 4).
pub fn normalize_path(cwd: &Path) -> String {
    let s = cwd.to_string_lossy().replace('\\', "/");
    let s = s.strip_suffix('/').unwrap_or(&s);
    s.to_lowercase()
}

/// First 64 bits of a SHA-256 digest over `input`, as lowercase hex.
fn hash_id(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Last path component of a normalized URL, with any trailing `.git`
/// already stripped by `normalize_remote_url`.
fn project_name_from_url(normalized_url: &str) -> Option<String> {
    normalized_url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_and_https_normalize_identically() {
        let ssh = normalize_remote_url("git@github.com:rustlang/rust.git");
        let https = normalize_remote_url("https://github.com/rustlang/rust.git");
        assert_eq!(ssh, https);
        assert_eq!(ssh, "https://github.com/rustlang/rust");
    }

    #[test]
    fn test_ssh_scheme_prefix_stripped() {
        let a = normalize_remote_url("ssh://git@github.com/rustlang/rust.git");
        let b = normalize_remote_url("git@github.com:rustlang/rust.git");
        assert_eq!(a, b);
    }

    #[test]
    fn test_trailing_slash_stripped() {
        let a = normalize_remote_url("https://github.com/rustlang/rust/");
        let b = normalize_remote_url("https://github.com/rustlang/rust");
        assert_eq!(a, b);
    }

    #[test]
    fn test_host_lowercased_path_case_preserved() {
        let url = normalize_remote_url("https://GitHub.com/RustLang/Rust.git");
        assert_eq!(url, "https://github.com/RustLang/Rust");
    }

    #[test]
    fn test_project_name_derived_from_last_segment() {
        let url = normalize_remote_url("git@github.com:rustlang/rust.git");
        assert_eq!(project_name_from_url(&url), Some("rust".to_string()));
    }

    #[test]
    fn test_same_normalized_url_hashes_identically() {
        let a = hash_id(&normalize_remote_url("git@github.com:foo/bar.git"));
        let b = hash_id(&normalize_remote_url("https://github.com/foo/bar"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16); // 64 bits = 16 hex chars
    }

    #[test]
    fn test_path_fallback_normalizes_separators_and_case() {
        let a = normalize_path(Path::new("C:\\Users\\Dev\\Project\\"));
        assert_eq!(a, "c:/users/dev/project");
    }

    #[test]
    fn test_detect_without_git_falls_back_to_path() {
        let dir = std::env::temp_dir().join("codemem-project-test-no-git");
        let _ = std::fs::create_dir_all(&dir);
        let identity = detect(&dir);
        assert!(identity.project_name.is_none());
        assert_eq!(identity.project_id.len(), 16);
    }
}
