//! In-place configuration file mutation.
//!
//! Edits line-oriented config files (`redis.conf`, `postgresql.conf`,
//! `pg_hba.conf`, dotenv files) by upserting key/value directives. The
//! first mutating write takes a one-time backup next to the file; repeat
//! edits never overwrite it, so the backup always preserves the pre-run
//! state. Re-applying a directive that is already present byte-identically
//! is a no-op that touches neither the file nor the backup.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigFileError;

/// How a directive's key and value are joined on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// `key value` (redis.conf, pg_hba.conf style).
    SpaceSeparated,
    /// `key=value` (postgresql.conf, dotenv style).
    EqualsSeparated,
}

impl MatchPolicy {
    fn render(self, key: &str, value: &str) -> String {
        match self {
            Self::SpaceSeparated => format!("{key} {value}"),
            Self::EqualsSeparated => format!("{key}={value}"),
        }
    }

    /// Whether a trimmed line's leading token is exactly `key`.
    ///
    /// Anchored at the line start so commented-out directives and keys that
    /// merely share a prefix never match.
    fn line_matches(self, line: &str, key: &str) -> bool {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix(key) else {
            return false;
        };
        match self {
            Self::SpaceSeparated => rest.starts_with(|c: char| c == ' ' || c == '\t'),
            Self::EqualsSeparated => {
                rest.trim_start().starts_with('=')
                    || rest.starts_with(|c: char| c == ' ' || c == '\t')
            }
        }
    }
}

/// Where a directive that is not already present gets inserted.
///
/// Files like `pg_hba.conf` resolve rules first match wins, so a new rule
/// appended after an existing catch-all would never take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertAt {
    /// End of file (dotenv, redis.conf).
    #[default]
    End,
    /// Before the first line whose leading token is one of these.
    BeforeFirstOf(&'static [&'static str]),
}

/// One directive to upsert into a file.
#[derive(Debug, Clone)]
pub struct ConfigPatch {
    pub key: String,
    pub value: String,
    pub policy: MatchPolicy,
    pub insert_at: InsertAt,
}

impl ConfigPatch {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, policy: MatchPolicy) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            policy,
            insert_at: InsertAt::End,
        }
    }

    /// Insert a missing directive before the first line starting with one
    /// of `tokens` instead of appending.
    #[must_use]
    pub const fn inserted_before(mut self, tokens: &'static [&'static str]) -> Self {
        self.insert_at = InsertAt::BeforeFirstOf(tokens);
        self
    }
}

/// Backup path convention: the original path with `.backup` appended.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

/// Locate a config file among candidate paths, copying a `.example`
/// template into place when the file itself is missing but a template
/// exists alongside the first candidate.
///
/// # Errors
///
/// Returns [`ConfigFileError::NotFound`] listing every candidate tried.
pub fn locate(name: &str, candidates: &[PathBuf]) -> Result<PathBuf, ConfigFileError> {
    for candidate in candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }
    if let Some(first) = candidates.first() {
        let mut template = first.as_os_str().to_owned();
        template.push(".example");
        let template = PathBuf::from(template);
        if template.is_file() {
            fs::copy(&template, first).map_err(|source| ConfigFileError::Io {
                path: first.clone(),
                source,
            })?;
            return Ok(first.clone());
        }
    }
    Err(ConfigFileError::NotFound {
        name: name.to_string(),
        tried: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Upsert a batch of directives into a file.
///
/// Existing directive lines are replaced in place with indentation
/// preserved; missing directives are appended. The file is only rewritten
/// when the resulting content differs, and the pre-run backup is taken
/// exactly once, before the first actual change.
///
/// # Errors
///
/// Returns [`ConfigFileError::Io`] when the file cannot be read, backed
/// up, or rewritten.
pub fn upsert(path: &Path, patches: &[ConfigPatch]) -> Result<bool, ConfigFileError> {
    let io_err = |source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    };
    let original = fs::read_to_string(path).map_err(io_err)?;
    let updated = apply_patches(&original, patches);

    if updated == original {
        return Ok(false);
    }

    let backup = backup_path(path);
    if !backup.exists() {
        fs::copy(path, &backup).map_err(io_err)?;
    }
    fs::write(path, updated).map_err(io_err)?;
    Ok(true)
}

/// Set unix permissions on a file.
///
/// # Errors
///
/// Returns [`ConfigFileError::Io`] when the file's metadata cannot be
/// updated.
pub fn apply_mode(path: &Path, mode: u32) -> Result<(), ConfigFileError> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn apply_patches(content: &str, patches: &[ConfigPatch]) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let trailing_newline = content.is_empty() || content.ends_with('\n');

    for patch in patches {
        let rendered = patch.policy.render(&patch.key, &patch.value);
        let mut replaced = false;
        for line in &mut lines {
            if patch.policy.line_matches(line, &patch.key) {
                let indent_len = line.len() - line.trim_start().len();
                let indent = &line[..indent_len];
                *line = format!("{indent}{rendered}");
                replaced = true;
                break;
            }
        }
        if !replaced {
            match patch.insert_at {
                InsertAt::End => lines.push(rendered),
                InsertAt::BeforeFirstOf(tokens) => {
                    let anchor = lines.iter().position(|line| {
                        line.split_whitespace()
                            .next()
                            .is_some_and(|first| tokens.contains(&first))
                    });
                    match anchor {
                        Some(index) => lines.insert(index, rendered),
                        None => lines.push(rendered),
                    }
                }
            }
        }
    }

    let mut out = lines.join("\n");
    if trailing_newline || !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn replaces_existing_directive_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "redis.conf", "port 6379\nbind 0.0.0.0\nsave 60 1\n");

        let changed = upsert(&path, &[ConfigPatch::new(
            "bind",
            "127.0.0.1",
            MatchPolicy::SpaceSeparated,
        )])
        .unwrap();

        assert!(changed);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "port 6379\nbind 127.0.0.1\nsave 60 1\n"
        );
    }

    #[test]
    fn appends_missing_directive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "app.env", "PORT=4000\n");

        upsert(&path, &[ConfigPatch::new(
            "APP_HOST",
            "10.0.0.5",
            MatchPolicy::EqualsSeparated,
        )])
        .unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "PORT=4000\nAPP_HOST=10.0.0.5\n"
        );
    }

    #[test]
    fn commented_directive_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "postgresql.conf", "#listen_addresses = 'localhost'\n");

        upsert(&path, &[ConfigPatch::new(
            "listen_addresses",
            "'*'",
            MatchPolicy::EqualsSeparated,
        )])
        .unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "#listen_addresses = 'localhost'\nlisten_addresses='*'\n"
        );
    }

    #[test]
    fn key_prefix_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "redis.conf", "bind-source lo\n");

        upsert(&path, &[ConfigPatch::new(
            "bind",
            "127.0.0.1",
            MatchPolicy::SpaceSeparated,
        )])
        .unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "bind-source lo\nbind 127.0.0.1\n"
        );
    }

    #[test]
    fn ordered_insert_precedes_existing_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "pg_hba.conf",
            "# TYPE  DATABASE  USER  METHOD\nlocal   all   all   peer\nhost    all   all   127.0.0.1/32   scram-sha-256\n",
        );

        upsert(&path, &[ConfigPatch::new(
            "local   all   platform",
            "md5",
            MatchPolicy::SpaceSeparated,
        )
        .inserted_before(&["local", "host"])])
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let inserted = content.lines().position(|l| l.contains("platform")).unwrap();
        let catch_all = content
            .lines()
            .position(|l| l.starts_with("local   all   all"))
            .unwrap();
        assert!(inserted < catch_all);
    }

    #[test]
    fn ordered_insert_appends_when_no_anchor_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "pg_hba.conf", "# comments only\n");

        upsert(&path, &[ConfigPatch::new(
            "local   all   platform",
            "md5",
            MatchPolicy::SpaceSeparated,
        )
        .inserted_before(&["local", "host"])])
        .unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# comments only\nlocal   all   platform md5\n"
        );
    }

    #[test]
    fn indentation_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "redis.conf", "  bind 0.0.0.0\n");

        upsert(&path, &[ConfigPatch::new(
            "bind",
            "127.0.0.1",
            MatchPolicy::SpaceSeparated,
        )])
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "  bind 127.0.0.1\n");
    }

    #[test]
    fn identical_reapply_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "redis.conf", "bind 127.0.0.1\n");

        let changed = upsert(&path, &[ConfigPatch::new(
            "bind",
            "127.0.0.1",
            MatchPolicy::SpaceSeparated,
        )])
        .unwrap();

        assert!(!changed);
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn backup_is_taken_once_and_preserves_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "redis.conf", "bind 0.0.0.0\n");

        upsert(&path, &[ConfigPatch::new(
            "bind",
            "127.0.0.1",
            MatchPolicy::SpaceSeparated,
        )])
        .unwrap();
        upsert(&path, &[ConfigPatch::new(
            "bind",
            "10.0.0.1",
            MatchPolicy::SpaceSeparated,
        )])
        .unwrap();

        assert_eq!(
            fs::read_to_string(backup_path(&path)).unwrap(),
            "bind 0.0.0.0\n"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "bind 10.0.0.1\n");
    }

    #[test]
    fn locate_prefers_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let existing = write_file(&dir, "redis.conf", "port 6379\n");
        let missing = dir.path().join("other.conf");

        let found = locate("redis.conf", &[missing, existing.clone()]).unwrap();
        assert_eq!(found, existing);
    }

    #[test]
    fn locate_copies_example_template() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, ".env.example", "PORT=4000\n");
        let target = dir.path().join(".env");

        let found = locate(".env", std::slice::from_ref(&target)).unwrap();
        assert_eq!(found, target);
        assert_eq!(fs::read_to_string(&target).unwrap(), "PORT=4000\n");
    }

    #[test]
    fn locate_reports_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.conf");
        let b = dir.path().join("b.conf");

        let err = locate("thing.conf", &[a.clone(), b.clone()]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(&a.display().to_string()));
        assert!(message.contains(&b.display().to_string()));
    }
}
