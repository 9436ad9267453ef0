use serde::Serialize;
use serde_json::Value;

/// Summary of the agent's most recent activity, shown in the dashboard sidebar.
///
/// Tool names, ids and result fields are copied from the record as they are,
/// whatever their JSON type, so an unexpected shape still reaches the
/// dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CurrentAction {
    Tool {
        #[serde(skip_serializing_if = "Option::is_none")]
        tool: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    Thinking {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    ToolStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        tool: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    ToolResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        subtype: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
}
