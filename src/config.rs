//! Configuration management for monkey
//!
//! Handles TOML config file parsing and the hotkey string syntax.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::capture::BackendKind;
use crate::error::{MonkeyError, Result};
use crate::hotkey::{Binding, Hotkey, Key, Modifier, WindowFilter};

/// Shells known to swallow Super unless every window grabs it.
const SUPER_HUNGRY_SHELLS: &[&str] = &["gnome-shell", "cinnamon", "unity"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellWorkaround {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub hotkey: String,
    pub target: String,
    /// Regex over window title or class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_in: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// X display to connect to; `$DISPLAY` when unset.
    #[serde(default)]
    pub display: Option<String>,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub shell_workaround: ShellWorkaround,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default, rename = "binding")]
    pub bindings: Vec<BindingConfig>,
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Config {
            display: None,
            backend: BackendKind::default(),
            shell_workaround: ShellWorkaround::default(),
            debounce_ms: default_debounce_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            bindings: Vec::new(),
        }
    }
}

pub fn config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("monkey");
    path.push("config.toml");
    path
}

impl Config {
    /// Read `path` (or the default location). A missing file means
    /// defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
        match fs::read_to_string(&path) {
            Ok(content) => Config::parse(&content)
                .map_err(|e| MonkeyError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Result<Config> {
        toml::from_str(content).map_err(|e| MonkeyError::Config(e.to_string()))
    }

    /// Parsed bindings. The first invalid entry fails the whole list.
    pub fn bindings(&self) -> Result<Vec<Binding>> {
        self.bindings
            .iter()
            .map(|entry| {
                Ok(Binding {
                    hotkey: parse_hotkey(&entry.hotkey)?,
                    filter: entry.only_in.as_deref().map(WindowFilter::new).transpose()?,
                    target: entry.target.clone(),
                })
            })
            .collect()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Whether Super bindings must be grabbed on every window.
    pub fn super_workaround(&self) -> bool {
        match self.shell_workaround {
            ShellWorkaround::Always => true,
            ShellWorkaround::Never => false,
            ShellWorkaround::Auto => detect_super_hungry_shell(),
        }
    }
}

fn detect_super_hungry_shell() -> bool {
    let mut system = System::new();
    system.refresh_processes();
    let found = system
        .processes()
        .values()
        .find(|p| SUPER_HUNGRY_SHELLS.contains(&p.name()));
    if let Some(process) = found {
        tracing::info!(shell = process.name(), "Desktop shell needs Super grabbed on every window");
    }
    found.is_some()
}

/// Parse `"ctrl+alt+t"`, `"super+<f5>"`, `"super+f5"` or `"<code38>"`.
pub fn parse_hotkey(s: &str) -> Result<Hotkey> {
    let lower = s.trim().to_lowercase();
    if lower.is_empty() {
        return Err(MonkeyError::Config("Empty hotkey".to_string()));
    }

    // A literal '+' key leaves an empty last part.
    let (mods, key) = match lower.strip_suffix("++") {
        Some(rest) => (rest, "+"),
        None => lower.rsplit_once('+').unwrap_or(("", lower.as_str())),
    };
    if key.is_empty() {
        return Err(MonkeyError::Config(format!("No key specified in {:?}", s)));
    }

    let modifiers = mods
        .split('+')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(parse_modifier)
        .collect::<Result<Vec<_>>>()?;

    Ok(Hotkey::new(modifiers, parse_key(key.trim())?))
}

pub fn parse_modifier(s: &str) -> Result<Modifier> {
    match s {
        "ctrl" | "control" => Ok(Modifier::Control),
        "alt" => Ok(Modifier::Alt),
        "altgr" | "alt_gr" => Ok(Modifier::AltGr),
        "shift" => Ok(Modifier::Shift),
        "super" | "win" | "cmd" => Ok(Modifier::Super),
        "hyper" => Ok(Modifier::Hyper),
        "meta" => Ok(Modifier::Meta),
        _ => Err(MonkeyError::Config(format!("Unknown modifier: {}", s))),
    }
}

fn parse_key(s: &str) -> Result<Key> {
    let key = if s.chars().count() > 1 && !s.starts_with('<') {
        Key::parse(&format!("<{}>", s))
    } else {
        Key::parse(s)
    };
    key.map_err(|_| MonkeyError::Config(format!("Unknown key: {}", s)))
}
