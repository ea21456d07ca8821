//! Vault scanner: walks the note vault and reads matching files.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::VaultConfig;
use crate::models::Note;

/// Scan the vault root and return all matching notes, sorted by path.
///
/// Paths in the result are vault-relative with `/` separators so index
/// `source` fields stay stable across platforms. Unreadable files are
/// logged and skipped; they never abort the scan.
pub fn scan_vault(config: &VaultConfig) -> Result<Vec<Note>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Vault root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/.obsidian/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/kb/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut notes = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => notes.push(Note {
                path: rel_str,
                content,
            }),
            Err(e) => {
                warn!("skipping unreadable file {}: {}", path.display(), e);
            }
        }
    }

    // Sort for deterministic ordering
    notes.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(notes)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn vault_config(root: PathBuf) -> VaultConfig {
        VaultConfig {
            root,
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
        }
    }

    #[test]
    fn test_scan_finds_markdown_sorted() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("zeta.md"), "z").unwrap();
        std::fs::write(tmp.path().join("alpha.md"), "a").unwrap();
        std::fs::write(tmp.path().join("sub/nested.md"), "n").unwrap();
        std::fs::write(tmp.path().join("ignored.txt"), "t").unwrap();

        let notes = scan_vault(&vault_config(tmp.path().to_path_buf())).unwrap();
        let paths: Vec<&str> = notes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["alpha.md", "sub/nested.md", "zeta.md"]);
    }

    #[test]
    fn test_scan_skips_default_excluded_dirs() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".obsidian")).unwrap();
        std::fs::create_dir_all(tmp.path().join("kb/index")).unwrap();
        std::fs::write(tmp.path().join(".obsidian/config.md"), "x").unwrap();
        std::fs::write(tmp.path().join("kb/index/cache.md"), "x").unwrap();
        std::fs::write(tmp.path().join("note.md"), "hello").unwrap();

        let notes = scan_vault(&vault_config(tmp.path().to_path_buf())).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].path, "note.md");
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let config = vault_config(tmp.path().join("does-not-exist"));
        assert!(scan_vault(&config).is_err());
    }
}
