use serde_json::Value;

pub mod calculator;
pub mod shell;

pub use calculator::CalculatorTool;
pub use shell::ShellTool;

use crate::agent::ToolRegistry;
use std::path::Path;

pub fn extract_string_arg(args: &Value, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
        .map(|s| s.to_string())
}

pub fn extract_u64_arg_opt(args: &Value, key: &str, default: u64) -> u64 {
    args.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

/// Registry holding every built-in tool. Which of them a loop may call is
/// decided per request by its allow-list.
pub fn builtin_registry(workspace_dir: &Path) -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(CalculatorTool)
        .with_tool(ShellTool::new(workspace_dir))
}
