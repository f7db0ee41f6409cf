use anyhow::{bail, Context, Result};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "GIF_FIT_CONFIG";
const APP_DIR: &str = "gif-fit";
const CONFIG_FILE: &str = "config.toml";
const LOCAL_CONFIG_FILE: &str = "gif-fit.toml";

pub const MIN_MAX_SIZE_MB: u32 = 1;
pub const MAX_MAX_SIZE_MB: u32 = 100;

/// Optional defaults read from a TOML file. Never written back.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub max_size_mb: Option<u32>,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Default(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::Cli(path) | ConfigSource::Env(path) | ConfigSource::Default(path) => path,
        }
    }
}

impl Config {
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let cfg: Config = toml::from_str(contents)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;
        if let Some(mb) = cfg.max_size_mb {
            if !(MIN_MAX_SIZE_MB..=MAX_MAX_SIZE_MB).contains(&mb) {
                bail!(
                    "Invalid configuration file {}: max_size_mb must be between {} and {} (got {})",
                    path.display(),
                    MIN_MAX_SIZE_MB,
                    MAX_MAX_SIZE_MB,
                    mb
                );
            }
        }
        Ok(cfg)
    }
}

/// Loads the first configuration found: the CLI path, then
/// `$GIF_FIT_CONFIG`, then the default locations. A CLI or env path that
/// does not exist is an error; missing defaults are skipped.
pub fn load(path_override: Option<&Path>) -> Result<Option<(Config, ConfigSource)>> {
    if let Some(path) = path_override {
        return read(ConfigSource::Cli(path.to_path_buf())).map(Some);
    }

    if let Some(env_path) = env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
        return read(ConfigSource::Env(PathBuf::from(env_path))).map(Some);
    }

    for candidate in default_config_candidates() {
        if candidate.is_file() {
            return read(ConfigSource::Default(candidate)).map(Some);
        }
    }

    debug!("No configuration file found; using built-in defaults.");
    Ok(None)
}

fn read(source: ConfigSource) -> Result<(Config, ConfigSource)> {
    let path = source.path();
    let contents = fs::read_to_string(path).with_context(|| {
        format!("Failed to read configuration file at {}", path.display())
    })?;
    let cfg = Config::parse(&contents, path)?;
    Ok((cfg, source))
}

fn default_config_candidates() -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    let mut push_unique = |path: PathBuf, out: &mut Vec<PathBuf>| {
        if !path.as_os_str().is_empty() && seen.insert(path.clone()) {
            out.push(path);
        }
    };

    if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME").filter(|val| !val.is_empty()) {
        push_unique(
            PathBuf::from(xdg_config).join(APP_DIR).join(CONFIG_FILE),
            &mut out,
        );
    }

    if let Some(home) = detect_home_dir() {
        push_unique(home.join(".config").join(APP_DIR).join(CONFIG_FILE), &mut out);
        push_unique(home.join(LOCAL_CONFIG_FILE), &mut out);
    }

    if let Ok(current_dir) = env::current_dir() {
        push_unique(current_dir.join(LOCAL_CONFIG_FILE), &mut out);
    }

    push_unique(
        PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE),
        &mut out,
    );

    out
}

fn detect_home_dir() -> Option<PathBuf> {
    if let Some(home) = env::var_os("HOME").filter(|val| !val.is_empty()) {
        return Some(PathBuf::from(home));
    }

    #[cfg(unix)]
    {
        use std::ffi::CStr;

        unsafe {
            let uid = libc::getuid();
            let pwd = libc::getpwuid(uid);
            if pwd.is_null() {
                return None;
            }
            let dir_ptr = (*pwd).pw_dir;
            if dir_ptr.is_null() {
                return None;
            }
            if let Ok(path_str) = CStr::from_ptr(dir_ptr).to_str() {
                if !path_str.is_empty() {
                    return Some(PathBuf::from(path_str));
                }
            }
        }
    }

    #[cfg(windows)]
    {
        if let Some(profile) = env::var_os("USERPROFILE").filter(|val| !val.is_empty()) {
            return Some(PathBuf::from(profile));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_all_keys() {
        let cfg = Config::parse(
            "max_size_mb = 8\nffmpeg = \"/opt/ffmpeg/bin/ffmpeg\"\nffprobe = \"/opt/ffmpeg/bin/ffprobe\"\n",
            Path::new("config.toml"),
        )
        .unwrap();
        assert_eq!(cfg.max_size_mb, Some(8));
        assert_eq!(cfg.ffmpeg, Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")));
        assert_eq!(cfg.ffprobe, Some(PathBuf::from("/opt/ffmpeg/bin/ffprobe")));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = Config::parse("# nothing here\n", Path::new("config.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(Config::parse("max_attempts = 9\n", Path::new("config.toml")).is_err());
    }

    #[test]
    fn rejects_out_of_range_size() {
        let err = Config::parse("max_size_mb = 0\n", Path::new("config.toml")).unwrap_err();
        assert!(err.to_string().contains("between 1 and 100"));
        assert!(Config::parse("max_size_mb = 101\n", Path::new("config.toml")).is_err());
    }

    #[test]
    fn cli_path_wins_and_must_exist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "max_size_mb = 12\n").unwrap();

        let (cfg, source) = load(Some(&path)).unwrap().expect("config loaded");
        assert_eq!(cfg.max_size_mb, Some(12));
        assert_eq!(source, ConfigSource::Cli(path.clone()));

        assert!(load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn default_candidates_are_unique_and_named() {
        let candidates = default_config_candidates();
        let unique: BTreeSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
        assert!(candidates
            .iter()
            .all(|path| path.ends_with(CONFIG_FILE) || path.ends_with(LOCAL_CONFIG_FILE)));
    }
}
