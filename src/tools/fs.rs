//! Sandboxed filesystem tools: read, write, patch, delete, list.
//!
//! Every path argument passes through [`Sandbox::resolve`]; a request
//! without a sandbox fails closed before any filesystem syscall.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::tool::{Tool, ToolContext};

/// Cap on file content returned to the model.
const READ_CAP: usize = 256 * 1024;

fn path_schema(extra: Value) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "Path relative to the project root"
            }
        },
        "required": ["path"]
    });
    if let (Value::Object(base), Value::Object(more)) = (&mut schema["properties"], extra) {
        base.extend(more);
    }
    schema
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

/// Read a file inside the sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file from the project workspace"
    }

    fn schema(&self) -> Value {
        path_schema(json!({}))
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: PathArgs = serde_json::from_value(args)?;
        let path = ctx.sandbox()?.resolve(&args.path)?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::invalid(format!("read {:?}: {e}", args.path)))?;
        let truncated = bytes.len() > READ_CAP;
        let slice = if truncated { &bytes[..READ_CAP] } else { &bytes };
        let content = String::from_utf8_lossy(slice).into_owned();

        Ok(json!({
            "ok": true,
            "path": args.path,
            "content": content,
            "size": bytes.len(),
            "truncated": truncated,
        }))
    }
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

/// Write (create or replace) a file inside the sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Create or replace a text file in the project workspace"
    }

    fn schema(&self) -> Value {
        path_schema(json!({
            "content": {"type": "string", "description": "Full file content"}
        }))
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: WriteArgs = serde_json::from_value(args)?;
        let path = ctx.sandbox()?.resolve(&args.path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend(format!("create parent dirs: {e}")))?;
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|e| Error::backend(format!("write {:?}: {e}", args.path)))?;

        Ok(json!({
            "ok": true,
            "path": args.path,
            "bytes": args.content.len(),
        }))
    }
}

#[derive(Deserialize)]
struct PatchArgs {
    path: String,
    find: String,
    replace: String,
}

/// Exact-match patch of a file inside the sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePatchTool;

#[async_trait]
impl Tool for FilePatchTool {
    fn name(&self) -> &str {
        "file_patch"
    }

    fn description(&self) -> &str {
        "Replace the first exact occurrence of a string in a file"
    }

    fn schema(&self) -> Value {
        path_schema(json!({
            "find": {"type": "string", "description": "Exact text to find"},
            "replace": {"type": "string", "description": "Replacement text"}
        }))
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: PatchArgs = serde_json::from_value(args)?;
        if args.find.is_empty() {
            return Err(Error::invalid("'find' must not be empty"));
        }
        let path = ctx.sandbox()?.resolve(&args.path)?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::invalid(format!("read {:?}: {e}", args.path)))?;
        let Some(at) = content.find(&args.find) else {
            return Err(Error::invalid(format!(
                "pattern not found in {:?}",
                args.path
            )));
        };

        let mut patched = String::with_capacity(content.len());
        patched.push_str(&content[..at]);
        patched.push_str(&args.replace);
        patched.push_str(&content[at + args.find.len()..]);
        tokio::fs::write(&path, patched.as_bytes())
            .await
            .map_err(|e| Error::backend(format!("write {:?}: {e}", args.path)))?;

        Ok(json!({
            "ok": true,
            "path": args.path,
            "replaced": 1,
        }))
    }
}

/// Delete a file inside the sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDeleteTool;

#[async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> &str {
        "file_delete"
    }

    fn description(&self) -> &str {
        "Delete a file from the project workspace"
    }

    fn schema(&self) -> Value {
        path_schema(json!({}))
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: PathArgs = serde_json::from_value(args)?;
        let path = ctx.sandbox()?.resolve(&args.path)?;

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Error::invalid(format!("delete {:?}: {e}", args.path)))?;
        Ok(json!({"ok": true, "path": args.path}))
    }
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    path: Option<String>,
}

/// Non-recursive directory listing inside the sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory in the project workspace (non-recursive)"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the project root; omit for the root"
                }
            }
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: ListArgs = serde_json::from_value(args)?;
        let sandbox = ctx.sandbox()?;
        let dir = match args.path.as_deref() {
            Some(rel) if !rel.is_empty() => sandbox.resolve(rel)?,
            _ => sandbox.base().to_path_buf(),
        };

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::invalid(format!("list {:?}: {e}", args.path)))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| Error::backend(e.to_string()))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| Error::backend(e.to_string()))?;
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": meta.is_dir(),
                "size": meta.len(),
            }));
        }
        // Directories first, then names ascending.
        entries.sort_by(|a, b| {
            let a_dir = a["is_dir"].as_bool().unwrap_or(false);
            let b_dir = b["is_dir"].as_bool().unwrap_or(false);
            b_dir
                .cmp(&a_dir)
                .then_with(|| a["name"].as_str().cmp(&b["name"].as_str()))
        });

        Ok(json!({"ok": true, "entries": entries}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;

    fn ctx() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ToolContext::new();
        ctx.sandbox = Some(Sandbox::new(dir.path()).unwrap());
        (dir, ctx)
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let (_dir, ctx) = ctx();

        FileWriteTool
            .call(&ctx, json!({"path": "notes/today.txt", "content": "hello"}))
            .await
            .unwrap();
        let read = FileReadTool
            .call(&ctx, json!({"path": "notes/today.txt"}))
            .await
            .unwrap();
        assert_eq!(read["content"], "hello");
        assert_eq!(read["truncated"], false);
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_io() {
        let (_dir, ctx) = ctx();
        let err = FileReadTool
            .call(&ctx, json!({"path": "../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("traversal"));
    }

    #[tokio::test]
    async fn missing_sandbox_fails_closed() {
        let ctx = ToolContext::new();
        let err = FileReadTool
            .call(&ctx, json!({"path": "a.txt"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn patch_replaces_first_occurrence() {
        let (_dir, ctx) = ctx();
        FileWriteTool
            .call(&ctx, json!({"path": "a.txt", "content": "one two one"}))
            .await
            .unwrap();

        FilePatchTool
            .call(&ctx, json!({"path": "a.txt", "find": "one", "replace": "ONE"}))
            .await
            .unwrap();
        let read = FileReadTool.call(&ctx, json!({"path": "a.txt"})).await.unwrap();
        assert_eq!(read["content"], "ONE two one");

        let err = FilePatchTool
            .call(&ctx, json!({"path": "a.txt", "find": "absent", "replace": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn delete_and_list() {
        let (_dir, ctx) = ctx();
        FileWriteTool
            .call(&ctx, json!({"path": "keep.txt", "content": "k"}))
            .await
            .unwrap();
        FileWriteTool
            .call(&ctx, json!({"path": "sub/nested.txt", "content": "n"}))
            .await
            .unwrap();
        FileWriteTool
            .call(&ctx, json!({"path": "gone.txt", "content": "g"}))
            .await
            .unwrap();

        FileDeleteTool
            .call(&ctx, json!({"path": "gone.txt"}))
            .await
            .unwrap();

        let listing = ListDirTool.call(&ctx, json!({})).await.unwrap();
        let names: Vec<&str> = listing["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        // Directory first, then file names ascending.
        assert_eq!(names, vec!["sub", "keep.txt"]);
    }
}
