//! Where mirrored notes land on the local filesystem.

use std::path::{Path, PathBuf};

/// Directory under the storage root used when no override is configured.
pub const EXPORT_SUBDIR: &str = "notes-export";
/// Directory under the export root holding the note files.
pub const NOTES_SUBDIR: &str = "notes";

/// Resolved export locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    /// Root the drive's `/notes` subtree is mirrored into.
    pub base_root: PathBuf,
    /// `base_root/notes`, where the `.md` files end up.
    pub notes_root: PathBuf,
}

impl ExportPaths {
    pub fn from_base(base_root: impl Into<PathBuf>) -> Self {
        let base_root = base_root.into();
        let notes_root = base_root.join(NOTES_SUBDIR);
        Self {
            base_root,
            notes_root,
        }
    }

    /// The override if given, else `<storage_dir>/notes-export`.
    pub fn resolve(storage_dir: &Path, override_dir: Option<&Path>) -> Self {
        match override_dir {
            Some(dir) => Self::from_base(dir),
            None => Self::from_base(storage_dir.join(EXPORT_SUBDIR)),
        }
    }
}

/// Expand a leading `~` to the home directory, when one is known.
pub fn expand_home(path: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}

/// Interpret a user-supplied export directory: `~` is expanded and
/// relative paths are taken from `cwd`.
pub fn resolve_user_dir(value: &str, cwd: &Path) -> PathBuf {
    let expanded = expand_home(value.trim());
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}
