pub mod diagnostics;
pub mod execute_query;
pub mod explore;

use rmcp::model::{Annotated, CallToolResult, RawContent, RawTextContent, Tool};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Create an error CallToolResult with the given message
pub fn create_error_result(message: String) -> CallToolResult {
    CallToolResult {
        content: vec![Annotated {
            raw: RawContent::Text(RawTextContent {
                text: message,
                meta: None,
            }),
            annotations: None,
        }],
        is_error: Some(true),
        meta: None,
        structured_content: None,
    }
}

/// Create a success CallToolResult with the given content
pub fn create_success_result(content: String) -> CallToolResult {
    CallToolResult {
        content: vec![Annotated {
            raw: RawContent::Text(RawTextContent {
                text: content,
                meta: None,
            }),
            annotations: None,
        }],
        is_error: Some(false),
        meta: None,
        structured_content: None,
    }
}

/// Build a tool from a JSON schema object
fn build_tool(name: &str, title: &str, description: &str, schema: Value) -> Tool {
    let input_schema = match schema {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Tool {
        name: name.to_string().into(),
        description: Some(description.to_string().into()),
        input_schema: Arc::new(input_schema),
        annotations: None,
        icons: None,
        output_schema: None,
        title: Some(title.to_string()),
    }
}

/// Required, non-empty string argument
fn required_str<'a>(
    arguments: Option<&'a Map<String, Value>>,
    name: &str,
) -> Result<&'a str, String> {
    let value = arguments
        .and_then(|args| args.get(name))
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("{} parameter is required", name))?;

    if value.trim().is_empty() {
        return Err(format!("{} cannot be empty", name));
    }
    Ok(value)
}

#[cfg(test)]
pub(crate) fn result_text(result: &CallToolResult) -> String {
    match &result.content[0].raw {
        RawContent::Text(text) => text.text.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_helpers() {
        let ok = create_success_result("done".to_string());
        assert_eq!(ok.is_error, Some(false));
        assert_eq!(result_text(&ok), "done");

        let err = create_error_result("boom".to_string());
        assert_eq!(err.is_error, Some(true));
        assert_eq!(result_text(&err), "boom");
    }

    #[test]
    fn test_required_str() {
        let args = json!({"database": "shop", "blank": "  "});
        let map = args.as_object();

        assert_eq!(required_str(map, "database").unwrap(), "shop");
        assert_eq!(
            required_str(map, "missing").unwrap_err(),
            "missing parameter is required"
        );
        assert_eq!(required_str(map, "blank").unwrap_err(), "blank cannot be empty");
        assert!(required_str(None, "database").is_err());
    }
}
