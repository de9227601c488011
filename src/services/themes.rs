//! Theme discovery for THEME_LIST / THEME_CONTENTS
//!
//! Themes are files in a directory; the backend lists them and hands out
//! their raw text. Interpreting them is up to the window.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::server::ThemeInfo;

/// File extensions recognised as themes
const THEME_EXTENSIONS: &[&str] = &["toml", "css", "json"];

#[derive(Error, Debug)]
pub enum ThemeError {
    #[error("Theme not found: {0}")]
    NotFound(String),
    #[error("Failed to read theme: {0}")]
    Read(#[from] std::io::Error),
}

/// Themes stored in a directory
#[derive(Debug, Clone, Default)]
pub struct ThemeStore {
    dir: Option<PathBuf>,
}

impl ThemeStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// List the themes in the directory, sorted by id.
    ///
    /// A missing or unset directory yields an empty list.
    pub fn list(&self) -> Result<Vec<ThemeInfo>, ThemeError> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(Vec::new());
        };
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut themes = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(theme) = theme_info(&path) {
                themes.push(theme);
            }
        }
        themes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(themes)
    }

    /// Raw contents of the theme with `theme_id`
    pub fn contents(&self, theme_id: &str) -> Result<String, ThemeError> {
        let theme = self
            .list()?
            .into_iter()
            .find(|theme| theme.id == theme_id)
            .ok_or_else(|| ThemeError::NotFound(theme_id.to_string()))?;
        Ok(std::fs::read_to_string(theme.path)?)
    }
}

fn theme_info(path: &Path) -> Option<ThemeInfo> {
    if !path.is_file() {
        return None;
    }
    let extension = path.extension()?.to_str()?;
    if !THEME_EXTENSIONS.contains(&extension) {
        return None;
    }
    let id = path.file_name()?.to_str()?.to_string();
    if id.starts_with('.') {
        return None;
    }
    let name = path.file_stem()?.to_str()?.replace(['-', '_'], " ");

    Some(ThemeInfo {
        id,
        name,
        path: path.display().to_string(),
    })
}
