//! Per-request filesystem sandbox and path policy.
//!
//! Every filesystem-touching tool receives a base directory resolved as
//! `workdir/users/<user_id>/projects/<project_id>`. Absent a project, tools
//! fail closed. Path arguments are sanitized component-wise: absolute paths,
//! drive letters, `..` traversal, and symlinks that escape the base are all
//! rejected. Non-existent descendants are allowed so tools can create files,
//! but escapes through existing symlinks are not.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Commands the CLI tool refuses to run regardless of arguments.
const DENIED_BINARIES: &[&str] = &[
    "rm", "rmdir", "mkfs", "dd", "sudo", "su", "shutdown", "reboot", "halt", "poweroff", "chown",
    "chmod", "mount", "umount", "kill", "killall",
];

/// Returns `true` when a tool argument looks like a filesystem path.
///
/// Heuristic per the dispatch layer: contains a separator, starts with a
/// dot, or carries a Windows drive letter.
#[must_use]
pub fn looks_path_like(arg: &str) -> bool {
    if arg.contains('/') || arg.contains('\\') {
        return true;
    }
    if arg.starts_with('.') {
        return true;
    }
    has_drive_letter(arg)
}

fn has_drive_letter(arg: &str) -> bool {
    let bytes = arg.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn valid_id_component(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A sandboxed base directory; the effective root for every filesystem tool.
#[derive(Debug, Clone)]
pub struct Sandbox {
    base: PathBuf,
}

impl Sandbox {
    /// Pin a sandbox to an existing or to-be-created base directory.
    ///
    /// The directory is created if missing and canonicalized so later
    /// containment checks compare real paths.
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        std::fs::create_dir_all(base)
            .map_err(|e| Error::backend(format!("create sandbox base: {e}")))?;
        let base = base
            .canonicalize()
            .map_err(|e| Error::backend(format!("resolve sandbox base: {e}")))?;
        Ok(Self { base })
    }

    /// Resolve the per-request base under `workdir`.
    ///
    /// Fails closed when the request carries no project.
    pub fn for_project(
        workdir: impl AsRef<Path>,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Self> {
        let Some(project_id) = project_id else {
            return Err(Error::invalid("no project selected; filesystem tools are disabled"));
        };
        if !valid_id_component(user_id) {
            return Err(Error::invalid(format!("invalid user id {user_id:?}")));
        }
        if !valid_id_component(project_id) {
            return Err(Error::invalid(format!("invalid project id {project_id:?}")));
        }
        Self::new(
            workdir
                .as_ref()
                .join("users")
                .join(user_id)
                .join("projects")
                .join(project_id),
        )
    }

    /// The canonical base directory.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Sanitize a relative path and return its absolute location inside the
    /// base.
    ///
    /// Descends component-wise: each existing prefix that is a symlink is
    /// resolved and checked against the base, so a link pointing outside the
    /// sandbox cannot be traversed even when the final target does not exist
    /// yet. Rejection happens before any syscall touches a path outside the
    /// base.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        if raw.is_empty() {
            return Err(Error::invalid("empty path"));
        }
        let path = Path::new(raw);
        if path.is_absolute() || has_drive_letter(raw) {
            return Err(Error::invalid(format!(
                "absolute path {raw:?} is outside the sandbox"
            )));
        }

        let mut resolved = self.base.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    self.check_symlink(&resolved, raw)?;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::invalid(format!(
                        "path {raw:?} rejected: traversal outside the sandbox"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::invalid(format!(
                        "absolute path {raw:?} is outside the sandbox"
                    )));
                }
            }
        }
        Ok(resolved)
    }

    /// If `candidate` exists and is a symlink, its target must stay inside
    /// the base.
    fn check_symlink(&self, candidate: &Path, raw: &str) -> Result<()> {
        let Ok(meta) = std::fs::symlink_metadata(candidate) else {
            // Non-existent descendants are fine; the tool may create them.
            return Ok(());
        };
        if !meta.file_type().is_symlink() {
            return Ok(());
        }
        let target = candidate
            .canonicalize()
            .map_err(|e| Error::invalid(format!("unresolvable symlink in {raw:?}: {e}")))?;
        if target.starts_with(&self.base) {
            Ok(())
        } else {
            Err(Error::invalid(format!(
                "path {raw:?} rejected: symlink escapes the sandbox"
            )))
        }
    }
}

/// Policy applied to the binary named in a CLI invocation.
#[derive(Debug, Clone)]
pub struct BinaryPolicy {
    deny: HashSet<String>,
}

impl Default for BinaryPolicy {
    fn default() -> Self {
        Self {
            deny: DENIED_BINARIES.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl BinaryPolicy {
    /// Extend the deny-list.
    pub fn deny(&mut self, binary: impl Into<String>) {
        self.deny.insert(binary.into());
    }

    /// Validate a command name: no separators, not on the deny-list.
    pub fn check(&self, command: &str) -> Result<()> {
        if command.is_empty() {
            return Err(Error::invalid("empty command"));
        }
        if command.contains('/') || command.contains('\\') {
            return Err(Error::invalid(format!(
                "command {command:?} rejected: path-qualified binaries are not allowed"
            )));
        }
        if self.deny.contains(command) {
            return Err(Error::invalid(format!("command {command:?} is deny-listed")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sb = Sandbox::new(dir.path()).unwrap();
        (dir, sb)
    }

    #[test]
    fn path_like_detection() {
        assert!(looks_path_like("a/b"));
        assert!(looks_path_like(".hidden"));
        assert!(looks_path_like("..\\x"));
        assert!(looks_path_like("C:stuff"));
        assert!(!looks_path_like("plain-word"));
    }

    #[test]
    fn resolves_relative_paths_inside_base() {
        let (_dir, sb) = sandbox();
        let p = sb.resolve("notes/today.txt").unwrap();
        assert!(p.starts_with(sb.base()));
        assert!(p.ends_with("notes/today.txt"));
    }

    #[test]
    fn rejects_traversal() {
        let (_dir, sb) = sandbox();
        let err = sb.resolve("../../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
        assert!(err.to_string().contains("traversal"));
    }

    #[test]
    fn rejects_absolute_and_drive_paths() {
        let (_dir, sb) = sandbox();
        assert!(sb.resolve("/etc/passwd").is_err());
        assert!(sb.resolve("C:\\Windows").is_err());
    }

    #[test]
    fn rejects_embedded_parent_components() {
        let (_dir, sb) = sandbox();
        assert!(sb.resolve("a/../../b").is_err());
    }

    #[test]
    fn allows_nonexistent_descendants() {
        let (_dir, sb) = sandbox();
        assert!(sb.resolve("brand/new/file.txt").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let (_dir, sb) = sandbox();
        std::os::unix::fs::symlink(outside.path(), sb.base().join("leak")).unwrap();

        let err = sb.resolve("leak/secret.txt").unwrap_err();
        assert!(err.to_string().contains("symlink"));
    }

    #[cfg(unix)]
    #[test]
    fn allows_symlink_inside_base() {
        let (_dir, sb) = sandbox();
        std::fs::create_dir(sb.base().join("real")).unwrap();
        std::os::unix::fs::symlink(sb.base().join("real"), sb.base().join("alias")).unwrap();

        assert!(sb.resolve("alias/file.txt").is_ok());
    }

    #[test]
    fn project_resolution_fails_closed() {
        let workdir = tempfile::tempdir().unwrap();
        assert!(Sandbox::for_project(workdir.path(), "u1", None).is_err());

        let sb = Sandbox::for_project(workdir.path(), "u1", Some("p1")).unwrap();
        assert!(sb.base().ends_with("users/u1/projects/p1"));
    }

    #[test]
    fn project_resolution_rejects_hostile_ids() {
        let workdir = tempfile::tempdir().unwrap();
        assert!(Sandbox::for_project(workdir.path(), "../u1", Some("p1")).is_err());
        assert!(Sandbox::for_project(workdir.path(), "u1", Some("p/../1")).is_err());
    }

    #[test]
    fn binary_policy_blocks_separators_and_denied() {
        let policy = BinaryPolicy::default();
        assert!(policy.check("echo").is_ok());
        assert!(policy.check("/bin/echo").is_err());
        assert!(policy.check("rm").is_err());

        let mut custom = BinaryPolicy::default();
        custom.deny("curl");
        assert!(custom.check("curl").is_err());
    }
}
