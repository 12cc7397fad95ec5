use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// The first `max` characters, with no marker. Used for prompt excerpts.
pub fn char_prefix(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandRunResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|s| s.success())
    }
}

pub fn run_command_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<CommandRunResult, String> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to start command: {}", e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Failed to capture stdout".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "Failed to capture stderr".to_string())?;

    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(stdout);
        let _ = reader.read_to_end(&mut buf);
        buf
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(stderr);
        let _ = reader.read_to_end(&mut buf);
        buf
    });

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    let _ = child.kill();
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(format!("Failed to wait for command: {}", e)),
        }
    };
    let elapsed = start.elapsed();

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
        elapsed,
    })
}

/// Join a relative path onto `root`, refusing absolute paths and `..`.
///
/// Unlike a canonicalizing resolver this works for trees that do not exist
/// yet, which is what sandbox and test-dir writes need.
pub fn join_within(root: &Path, candidate: &str) -> Result<PathBuf, String> {
    let candidate_path = Path::new(candidate);
    if candidate.trim().is_empty() {
        return Err("Path is empty".to_string());
    }
    if candidate_path.is_absolute() || candidate.starts_with('/') || candidate.starts_with('\\') {
        return Err(format!("Absolute paths are not allowed: {}", candidate));
    }
    let mut joined = root.to_path_buf();
    for component in candidate_path.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("Parent traversal is not allowed: {}", candidate));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("Absolute paths are not allowed: {}", candidate));
            }
        }
    }
    Ok(joined)
}

/// Repo-relative path with forward slashes, or `None` if `path` is outside `root`.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Lexically resolve `.` and `..` in a forward-slash path.
/// Returns `None` when the path climbs above its root.
pub fn normalize_relative(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Write through a sibling temp file and rename into place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
    std::fs::write(&tmp, contents)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_char_prefix_respects_boundaries() {
        assert_eq!(char_prefix("héllo", 2), "hé");
        assert_eq!(char_prefix("abc", 10), "abc");
    }

    #[test]
    fn test_join_within_rejects_escape() {
        let root = Path::new("/sandbox");
        assert!(join_within(root, "../etc/passwd").is_err());
        assert!(join_within(root, "/etc/passwd").is_err());
        assert!(join_within(root, "").is_err());
        assert_eq!(
            join_within(root, "./src/a.test.ts").unwrap(),
            PathBuf::from("/sandbox/src/a.test.ts")
        );
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize_relative("src/a/../b.ts").as_deref(), Some("src/b.ts"));
        assert_eq!(normalize_relative("./src/./b.ts").as_deref(), Some("src/b.ts"));
        assert_eq!(normalize_relative("../b.ts"), None);
    }

    #[test]
    fn test_relative_slash_path() {
        let root = Path::new("/repo");
        assert_eq!(
            relative_slash_path(root, Path::new("/repo/src/a.ts")).as_deref(),
            Some("src/a.ts")
        );
        assert_eq!(relative_slash_path(root, Path::new("/other/a.ts")), None);
    }

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_with_timeout_kills_slow_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_command_with_timeout(&mut cmd, Duration::from_millis(200)).unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_with_timeout_captures_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2"]);
        let result = run_command_with_timeout(&mut cmd, Duration::from_secs(5)).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }
}
