//! Executable path validation and child PATH construction.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Platform-specific PATH separator
#[cfg(unix)]
const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";

/// Validate an executable path.
///
/// Returns Ok(()) if:
/// - Path is absolute
/// - File exists
/// - File is executable (Unix) or spawnable
pub fn validate_exe_path(exe_path: &str) -> Result<(), String> {
    let path = Path::new(exe_path);

    if !path.is_absolute() {
        return Err(format!("executable path must be absolute: {exe_path}"));
    }

    if !path.exists() {
        return Err(format!("executable not found: {exe_path}"));
    }

    if !path.is_file() {
        return Err(format!("executable path is not a file: {exe_path}"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(path) {
            Ok(metadata) => {
                if metadata.permissions().mode() & 0o111 == 0 {
                    return Err(format!("file is not executable: {exe_path}"));
                }
            }
            Err(e) => return Err(format!("failed to check permissions: {e}")),
        }
    }

    Ok(())
}

/// Resolve a command to an absolute executable path.
///
/// Absolute paths are validated directly; bare names are looked up on the
/// current PATH.
pub fn resolve_command(command: &str) -> Result<PathBuf, String> {
    let path = Path::new(command);
    if path.is_absolute() {
        validate_exe_path(command)?;
        return Ok(path.to_path_buf());
    }

    which::which(command).map_err(|e| format!("command not resolvable: {command}: {e}"))
}

/// Build the PATH value for a child process.
///
/// The child environment is otherwise fully explicit; PATH is provided so
/// interpreted servers (npx scripts, shebang wrappers) can find their
/// interpreters. Entries: the executable's own directory, then the current
/// process PATH, deduplicated.
pub fn build_effective_path(exe_path: &Path) -> OsString {
    let mut path_entries = Vec::new();

    if let Some(exe_dir) = exe_path.parent() {
        if let Some(dir_str) = exe_dir.to_str() {
            path_entries.push(dir_str.to_string());
        }
    }

    if let Some(current_path) = env::var_os("PATH") {
        if let Some(current_path_str) = current_path.to_str() {
            for entry in current_path_str.split(PATH_SEPARATOR) {
                if !entry.is_empty() {
                    path_entries.push(entry.to_string());
                }
            }
        }
    }

    // Deduplicate while preserving order
    let mut seen = std::collections::HashSet::new();
    let deduped: Vec<String> = path_entries
        .into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect();

    OsString::from(deduped.join(PATH_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_exe_path_rejects_relative() {
        let result = validate_exe_path("node");
        assert!(result.unwrap_err().contains("absolute"));
    }

    #[test]
    fn validate_exe_path_rejects_nonexistent() {
        let result = validate_exe_path("/nonexistent/path/to/exe");
        assert!(result.unwrap_err().contains("not found"));
    }

    #[test]
    #[cfg(unix)]
    fn resolve_command_finds_sh() {
        let resolved = resolve_command("sh").unwrap();
        assert!(resolved.is_absolute());
    }

    #[test]
    fn build_effective_path_includes_exe_dir() {
        let path = build_effective_path(Path::new("/opt/tools/bin/mcp-server"));
        assert!(path.to_str().unwrap().contains("/opt/tools/bin"));
    }

    #[test]
    fn build_effective_path_deduplicates() {
        let path = build_effective_path(Path::new("/usr/bin/env"));
        let path_str = path.to_str().unwrap();
        let entries: Vec<&str> = path_str.split(PATH_SEPARATOR).collect();
        let count = entries.iter().filter(|&&e| e == "/usr/bin").count();
        assert_eq!(count, 1);
    }
}
