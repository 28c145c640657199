use super::LabelResolver;
use directories::BaseDirs;
use std::path::{Path, PathBuf};

const SYSTEM_APPLICATION_DIRS: &[&str] = &["/usr/local/share/applications", "/usr/share/applications"];

/// Resolves labels from freedesktop `.desktop` entries named after the identifier.
pub struct DesktopEntryResolver {
    dirs: Vec<PathBuf>,
}

impl DesktopEntryResolver {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// `extra` first, then the user's data dir, then the system-wide locations.
    pub fn with_standard_dirs(extra: &[PathBuf]) -> Self {
        let mut dirs = extra.to_vec();
        if let Some(base) = BaseDirs::new() {
            dirs.push(base.data_dir().join("applications"));
        }
        dirs.extend(SYSTEM_APPLICATION_DIRS.iter().map(PathBuf::from));
        Self::new(dirs)
    }

    fn candidates(&self, identifier: &str) -> Vec<PathBuf> {
        let lower = identifier.to_lowercase();
        let mut names = vec![format!("{identifier}.desktop")];
        if lower != identifier {
            names.push(format!("{lower}.desktop"));
        }

        self.dirs
            .iter()
            .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
            .collect()
    }
}

impl LabelResolver for DesktopEntryResolver {
    fn resolve_label(&self, identifier: &str) -> Option<String> {
        if identifier.is_empty() || identifier.contains(['/', '\\']) {
            return None;
        }
        self.candidates(identifier)
            .iter()
            .find_map(|path| read_entry_name(path))
    }
}

/// The unlocalized `Name=` key of the `[Desktop Entry]` group.
fn read_entry_name(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let mut in_entry_group = false;

    for line in contents.lines().map(str::trim) {
        if line.starts_with('[') {
            in_entry_group = line == "[Desktop Entry]";
            continue;
        }
        if !in_entry_group {
            continue;
        }
        if let Some(value) = line.strip_prefix("Name=") {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}
