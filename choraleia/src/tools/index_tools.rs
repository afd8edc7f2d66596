//! Code-index tools over the host filesystem: repo map, symbol search, file
//! outline, function listing. Built on the ripgrep library stack plus
//! gitignore-aware walking; these always run on the local site, where the
//! checkout lives.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use grep_regex::RegexMatcher;
use grep_searcher::sinks::UTF8;
use grep_searcher::{BinaryDetection, SearcherBuilder};
use serde_json::{json, Value};

use super::schema::required_str;
use super::{
    Tool, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolInvocation, ToolRegistry,
    ToolRuntimeEnv, ToolScope,
};

const MAX_MAP_ENTRIES: usize = 500;
const MAX_SEARCH_HITS: usize = 200;

pub fn register(registry: &mut ToolRegistry, _ctx: &ToolContext) -> Result<(), ToolError> {
    registry.register(Arc::new(RepomapTool))?;
    registry.register(Arc::new(SearchSymbolTool))?;
    registry.register(Arc::new(FileOutlineTool))?;
    registry.register(Arc::new(ListFunctionsTool))?;
    Ok(())
}

fn dir_arg(args: &Value) -> Result<&str, ToolError> {
    let path = required_str(args, "path")?;
    if !Path::new(path).is_dir() {
        return Err(ToolError::InvalidArguments(format!(
            "not a directory: {}",
            path
        )));
    }
    Ok(path)
}

/// Declaration patterns per extension family. Coarse by design; the model
/// reads the matched lines, not a parse tree.
fn outline_pattern(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "rs" => r"^\s*(pub\s+)?(async\s+)?(fn|struct|enum|trait|impl|mod|type|const|static)\s+\w+|^\s*impl\b",
        "go" => r"^\s*(func|type|const|var)\s+\w+",
        "py" => r"^\s*(def|class)\s+\w+",
        "js" | "jsx" | "ts" | "tsx" => {
            r"^\s*(export\s+)?(default\s+)?(async\s+)?(function|class|interface|type|const|enum)\s+\w+"
        }
        "java" | "kt" => r"^\s*(public|private|protected|internal)?\s*(static\s+)?(class|interface|enum|fun|void|\w+)\s+\w+\s*\(",
        "c" | "h" | "cpp" | "hpp" | "cc" => r"^\w[\w\s\*]*\s+\**\w+\s*\([^;]*$|^\s*(struct|class|enum)\s+\w+",
        _ => r"^\s*(pub\s+)?(async\s+)?(fn|func|def|function|class|struct|enum|trait|interface)\s+\w+",
    }
}

fn function_pattern(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "rs" => r"^\s*(pub\s+)?(async\s+)?fn\s+\w+",
        "go" => r"^\s*func\s+(\(\w+\s+\*?\w+\)\s+)?\w+",
        "py" => r"^\s*(async\s+)?def\s+\w+",
        "js" | "jsx" | "ts" | "tsx" => {
            r"^\s*(export\s+)?(default\s+)?(async\s+)?function\s+\w+|^\s*\w+\s*=\s*(async\s*)?\(.*\)\s*=>"
        }
        _ => r"^\s*(pub\s+)?(async\s+)?(fn|func|def|function)\s+\w+",
    }
}

/// Runs a line-oriented regex search over one file, collecting
/// `line_number\tline` rows.
fn grep_file(path: &Path, pattern: &str, hits: &mut Vec<String>) -> Result<(), ToolError> {
    let matcher = RegexMatcher::new(pattern)
        .map_err(|e| ToolError::InvalidArguments(format!("pattern: {}", e)))?;
    let mut searcher = SearcherBuilder::new()
        .binary_detection(BinaryDetection::quit(b'\x00'))
        .line_number(true)
        .build();
    searcher
        .search_path(
            &matcher,
            path,
            UTF8(|line_number, line| {
                hits.push(format!("  {}\t{}", line_number, line.trim_end()));
                Ok(true)
            }),
        )
        .map_err(|e| ToolError::Execution(format!("search {}: {}", path.display(), e)))?;
    Ok(())
}

pub struct RepomapTool;

#[async_trait]
impl Tool for RepomapTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "repomap",
                name: "Repository map",
                description: "Map a source tree: files with sizes, gitignore-aware, directories first.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Root directory."}
                    },
                    "required": ["path"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let root = dir_arg(&args)?.to_string();
        tokio::task::spawn_blocking(move || {
            let mut out = String::new();
            let mut count = 0usize;
            for entry in ignore::WalkBuilder::new(&root).hidden(true).build() {
                let entry = entry.map_err(|e| ToolError::Execution(e.to_string()))?;
                let depth = entry.depth();
                if depth == 0 {
                    continue;
                }
                if count >= MAX_MAP_ENTRIES {
                    out.push_str("... (map truncated)\n");
                    break;
                }
                let indent = "  ".repeat(depth - 1);
                let name = entry.file_name().to_string_lossy();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    out.push_str(&format!("{}{}/\n", indent, name));
                } else {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    out.push_str(&format!("{}{} ({} B)\n", indent, name, size));
                }
                count += 1;
            }
            Ok(out)
        })
        .await
        .map_err(|e| ToolError::Execution(format!("walk task: {}", e)))?
    }
}

pub struct SearchSymbolTool;

#[async_trait]
impl Tool for SearchSymbolTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "search_symbol",
                name: "Search symbol",
                description: "Search a source tree for a symbol (word match) or a regex pattern; \
                              returns file, line number and line.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "symbol": {"type": "string", "description": "Symbol name or regex."},
                        "regex": {"type": "boolean", "default": false}
                    },
                    "required": ["path", "symbol"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let root = dir_arg(&args)?.to_string();
        let symbol = required_str(&args, "symbol")?.to_string();
        let is_regex = args.get("regex").and_then(Value::as_bool).unwrap_or(false);
        let pattern = if is_regex {
            symbol
        } else {
            format!(r"\b{}\b", regex::escape(&symbol))
        };
        tokio::task::spawn_blocking(move || {
            let matcher = RegexMatcher::new(&pattern)
                .map_err(|e| ToolError::InvalidArguments(format!("pattern: {}", e)))?;
            let mut searcher = SearcherBuilder::new()
                .binary_detection(BinaryDetection::quit(b'\x00'))
                .line_number(true)
                .build();
            let mut out = String::new();
            let mut hits = 0usize;
            for entry in ignore::WalkBuilder::new(&root).hidden(true).build() {
                let entry = entry.map_err(|e| ToolError::Execution(e.to_string()))?;
                if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                if hits >= MAX_SEARCH_HITS {
                    break;
                }
                let path = entry.path().to_path_buf();
                let path_display = path.display().to_string();
                let result = searcher.search_path(
                    &matcher,
                    &path,
                    UTF8(|line_number, line| {
                        out.push_str(&format!("{}:{}: {}\n", path_display, line_number, line.trim_end()));
                        hits += 1;
                        Ok(hits < MAX_SEARCH_HITS)
                    }),
                );
                if let Err(e) = result {
                    tracing::debug!("search {}: {}", path_display, e);
                }
            }
            if hits >= MAX_SEARCH_HITS {
                out.push_str("... (results truncated)\n");
            }
            if out.is_empty() {
                out.push_str("no matches\n");
            }
            Ok(out)
        })
        .await
        .map_err(|e| ToolError::Execution(format!("search task: {}", e)))?
    }
}

pub struct FileOutlineTool;

#[async_trait]
impl Tool for FileOutlineTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "file_outline",
                name: "File outline",
                description: "Top-level declarations of one source file with line numbers.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Source file path."}
                    },
                    "required": ["path"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?.to_string();
        tokio::task::spawn_blocking(move || {
            let file = Path::new(&path);
            if !file.is_file() {
                return Err(ToolError::InvalidArguments(format!("not a file: {}", path)));
            }
            let mut hits = Vec::new();
            grep_file(file, outline_pattern(&path), &mut hits)?;
            if hits.is_empty() {
                return Ok("no declarations found\n".to_string());
            }
            Ok(hits.join("\n") + "\n")
        })
        .await
        .map_err(|e| ToolError::Execution(format!("outline task: {}", e)))?
    }
}

pub struct ListFunctionsTool;

#[async_trait]
impl Tool for ListFunctionsTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "list_functions",
                name: "List functions",
                description: "Function and method declarations of one source file with line numbers.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Source file path."}
                    },
                    "required": ["path"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?.to_string();
        tokio::task::spawn_blocking(move || {
            let file = Path::new(&path);
            if !file.is_file() {
                return Err(ToolError::InvalidArguments(format!("not a file: {}", path)));
            }
            let mut hits = Vec::new();
            grep_file(file, function_pattern(&path), &mut hits)?;
            if hits.is_empty() {
                return Ok("no functions found\n".to_string());
            }
            Ok(hits.join("\n") + "\n")
        })
        .await
        .map_err(|e| ToolError::Execution(format!("functions task: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolInvocation;

    fn fixture_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lib.rs"),
            "pub fn alpha() {}\n\nstruct Beta;\n\nasync fn gamma(x: u32) -> u32 { x }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha appears here too\n").unwrap();
        dir
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn outline_and_functions_find_declarations() {
        let dir = fixture_dir();
        let path = dir.path().join("lib.rs").display().to_string();
        let ctx = ToolInvocation::for_workspace(None);

        let outline = FileOutlineTool
            .invoke(json!({"path": path}), &ctx)
            .await
            .unwrap();
        assert!(outline.contains("fn alpha"));
        assert!(outline.contains("struct Beta"));

        let functions = ListFunctionsTool
            .invoke(json!({"path": path}), &ctx)
            .await
            .unwrap();
        assert!(functions.contains("fn alpha"));
        assert!(functions.contains("fn gamma"));
        assert!(!functions.contains("struct Beta"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn search_symbol_word_match() {
        let dir = fixture_dir();
        let ctx = ToolInvocation::for_workspace(None);
        let out = SearchSymbolTool
            .invoke(
                json!({"path": dir.path().display().to_string(), "symbol": "alpha"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.contains("lib.rs"));
        assert!(out.contains("notes.txt"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repomap_lists_files_with_sizes() {
        let dir = fixture_dir();
        let ctx = ToolInvocation::for_workspace(None);
        let out = RepomapTool
            .invoke(json!({"path": dir.path().display().to_string()}), &ctx)
            .await
            .unwrap();
        assert!(out.contains("lib.rs"));
        assert!(out.contains("B)"));
    }
}
