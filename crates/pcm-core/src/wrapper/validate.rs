//! Tool lookup and argument validation.

use pcm_common::{Error, Result};
use pcm_config::{ToolConfig, WrapperConfig};
use std::path::Path;

/// Look up a configured tool with a usable executable.
pub fn tool_config<'a>(config: &'a WrapperConfig, tool_name: &str) -> Result<&'a ToolConfig> {
    let tool = config.tools.get(tool_name).ok_or_else(|| {
        Error::config(format!(
            "Tool '{}' is not configured. Available tools: {:?}",
            tool_name,
            config.tool_names()
        ))
    })?;
    if tool.executable_path.trim().is_empty() {
        return Err(Error::config(format!(
            "Tool '{}' has no executable_path configured",
            tool_name
        )));
    }
    Ok(tool)
}

/// Check caller arguments against the tool's rules.
///
/// `required_args` entries must appear verbatim. `file_exists` indices
/// refer to caller arguments; indices past the end are skipped.
pub fn validate_args(tool_name: &str, tool: &ToolConfig, args: &[String]) -> Result<()> {
    let rules = &tool.validation_rules;

    if let Some(required) = &rules.required_args {
        for arg in &required.args {
            if !args.contains(arg) {
                return Err(Error::validation(
                    format!(
                        "Required argument '{}' missing for tool '{}'",
                        arg, tool_name
                    ),
                    "args",
                    format!("{:?}", args),
                ));
            }
        }
    }

    if let Some(files) = &rules.file_exists {
        for path in files.indices.iter().filter_map(|&i| args.get(i)) {
            if !Path::new(path).exists() {
                return Err(Error::validation(
                    format!("File does not exist: {}", path),
                    "file_path",
                    path.clone(),
                ));
            }
        }
    }

    Ok(())
}

/// Validate caller arguments and prepend the tool's defaults.
pub fn prepare_args(tool_name: &str, tool: &ToolConfig, args: &[String]) -> Result<Vec<String>> {
    validate_args(tool_name, tool, args)?;
    Ok(tool
        .default_args
        .iter()
        .chain(args.iter())
        .cloned()
        .collect())
}
