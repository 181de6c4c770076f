use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Errors for resolving the home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("no user home directory (HOME / USERPROFILE / APPDATA unset)")]
    HomeMissing,
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform user directory: `%APPDATA%` on Windows, `$HOME` elsewhere.
fn platform_base() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = env::var_os("APPDATA").or_else(|| env::var_os("USERPROFILE"));
    #[cfg(not(target_os = "windows"))]
    let var = env::var_os("HOME");

    var.filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Resolve the server home directory.
///
/// A configured value may start with `~` and must be absolute after
/// expansion. Without one, `<user dir>/<default_subdir>` is used. With
/// `create`, the directory is created when missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    resolve_with_base(config_home, default_subdir, create, platform_base())
}

fn resolve_with_base(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
    base: Option<PathBuf>,
) -> Result<PathBuf, HomeDirError> {
    let path = match config_home.filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => {
            let expanded = match raw.strip_prefix('~') {
                Some(rest) => {
                    let base = base.ok_or(HomeDirError::HomeMissing)?;
                    let rest = rest.trim_start_matches(['/', '\\']);
                    if rest.is_empty() {
                        base
                    } else {
                        base.join(rest)
                    }
                }
                None => PathBuf::from(&raw),
            };
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(
                    expanded.to_string_lossy().into_owned(),
                ));
            }
            expanded
        }
        None => base.ok_or(HomeDirError::HomeMissing)?.join(default_subdir),
    };

    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

/// `path` relative to `home` unless already absolute.
pub fn under_home(home: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        home.join(p)
    }
}
