use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::docx::package::DEFAULT_COMPRESSION_LEVEL;

pub const CONFIG_FILENAME: &str = "docx-editor.toml";
pub const CONFIG_ENV: &str = "DOCX_EDITOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub comments: CommentsSection,
    #[serde(default)]
    pub sweep: SweepSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ArchiveSection {
    /// Deflate level used when repacking (0-9).
    #[serde(default)]
    pub compression_level: Option<i64>,
    #[serde(default)]
    pub backup_suffix: Option<String>,
    /// Re-indent every XML part on each mutation, not only the parts that changed.
    #[serde(default)]
    pub reformat_all_parts: Option<bool>,
    #[serde(default)]
    pub verify_after_repack: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CommentsSection {
    #[serde(default)]
    pub default_author: Option<String>,
    /// Delay between a compliant verdict and the comment's removal.
    #[serde(default)]
    pub deletion_delay_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct SweepSection {
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Resolved settings with every default applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditorSettings {
    pub config_path: Option<PathBuf>,

    pub compression_level: i64,
    pub backup_suffix: String,
    pub reformat_all_parts: bool,
    pub verify_after_repack: bool,

    pub default_author: String,
    pub deletion_delay: Duration,

    pub sweep_interval: Duration,
    pub sweep_dry_run: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default(), None)
    }
}

impl EditorSettings {
    pub fn from_config(cfg: &AppConfig, config_path: Option<PathBuf>) -> Self {
        let backup_suffix = cfg
            .archive
            .backup_suffix
            .as_deref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ".backup".to_string());
        let default_author = cfg
            .comments
            .default_author
            .as_deref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Anonymous".to_string());
        Self {
            config_path,
            compression_level: cfg
                .archive
                .compression_level
                .unwrap_or(DEFAULT_COMPRESSION_LEVEL)
                .clamp(0, 9),
            backup_suffix,
            reformat_all_parts: cfg.archive.reformat_all_parts.unwrap_or(true),
            verify_after_repack: cfg.archive.verify_after_repack.unwrap_or(true),
            default_author,
            deletion_delay: Duration::from_secs(cfg.comments.deletion_delay_secs.unwrap_or(300)),
            sweep_interval: Duration::from_secs(cfg.sweep.interval_secs.unwrap_or(60).max(1)),
            sweep_dry_run: cfg.sweep.dry_run.unwrap_or(false),
        }
    }

    /// Explicit path, then `DOCX_EDITOR_CONFIG`, then a `docx-editor.toml` found upwards
    /// from the working directory. No file at all means defaults.
    pub fn load(explicit: Option<PathBuf>, workdir: &Path) -> anyhow::Result<Self> {
        let cfg_file = explicit
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            }
        }
        Ok(Self::from_config(&file_cfg, cfg_file.filter(|p| p.exists())))
    }

    pub fn backup_path(&self, archive: &Path) -> PathBuf {
        let mut s = archive.as_os_str().to_os_string();
        s.push(&self.backup_suffix);
        PathBuf::from(s)
    }
}

pub const DEFAULT_CONFIG_TOML: &str = r#"# docx-editor configuration

[archive]
# Deflate level for repacked archives (0-9).
compression_level = 6
# Suffix of the snapshot taken before each mutation.
backup_suffix = ".backup"
# Re-indent every XML part on each mutation (false: only the parts that changed).
reformat_all_parts = true
# Re-read the repacked archive and compare binary parts before committing.
verify_after_repack = true

[comments]
default_author = "Anonymous"
# Seconds between a compliant verdict and the comment's removal.
deletion_delay_secs = 300

[sweep]
interval_secs = 60
dry_run = false
"#;

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{
        find_file_upwards, init_default_config, load_config, AppConfig, EditorSettings,
        CONFIG_FILENAME,
    };

    #[test]
    fn defaults_match_the_written_default_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("init");
        let from_file = EditorSettings::from_config(&load_config(&path).expect("load"), None);
        assert_eq!(from_file, EditorSettings::default());
        assert_eq!(from_file.deletion_delay, Duration::from_secs(300));
        assert_eq!(from_file.compression_level, 6);
    }

    #[test]
    fn init_does_not_overwrite_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[sweep]\ninterval_secs = 5\n").expect("write");
        init_default_config(dir.path(), false).expect("init");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "[sweep]\ninterval_secs = 5\n"
        );
        init_default_config(dir.path(), true).expect("force");
        assert!(std::fs::read_to_string(&path).expect("read").contains("[archive]"));
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let cfg: AppConfig = toml::from_str(
            "[archive]\ncompression_level = 42\nbackup_suffix = \" \"\n[comments]\ndefault_author = \"Reviewer\"\n",
        )
        .expect("toml");
        let s = EditorSettings::from_config(&cfg, None);
        assert_eq!(s.compression_level, 9);
        assert_eq!(s.backup_suffix, ".backup");
        assert_eq!(s.default_author, "Reviewer");
        assert!(s.reformat_all_parts);
        assert_eq!(s.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn config_is_found_in_a_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        init_default_config(dir.path(), false).expect("init");
        let found = find_file_upwards(&nested, CONFIG_FILENAME, 4).expect("found");
        assert_eq!(found, dir.path().join(CONFIG_FILENAME));
        assert!(find_file_upwards(&nested, CONFIG_FILENAME, 1).is_none());
    }

    #[test]
    fn backup_path_appends_suffix() {
        let s = EditorSettings::default();
        assert_eq!(
            s.backup_path(std::path::Path::new("/tmp/a.docx")),
            std::path::PathBuf::from("/tmp/a.docx.backup")
        );
    }
}
