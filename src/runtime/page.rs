//! Session page resolution

use crate::model::Tool;
use crate::tools::{ToolBinding, ToolRegistry};
use crate::transport::{SessionDirectory, TransportError};

/// What a session page is opened for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTarget {
    /// Resume a stored session
    Existing { session_id: String },
    /// Start a conversation with a tool; the session is created on first send
    New { tool_id: String },
}

/// A resolved page: the tool and how to drive it
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPage {
    pub tool: Tool,
    pub binding: ToolBinding,
    pub session_id: Option<String>,
}

/// Look up the session (if any) and its tool, then pick the binding.
///
/// The history limit configured on `registry` ends up in the context of a
/// conversation binding.
pub async fn open_page<D: SessionDirectory + ?Sized>(
    api: &D,
    registry: &ToolRegistry,
    target: PageTarget,
) -> Result<ToolPage, TransportError> {
    let (tool_id, session_id) = match target {
        PageTarget::Existing { session_id } => {
            let session = api.get_session(&session_id).await?;
            tracing::debug!(%session_id, tool_id = %session.tool_id, "Resolved session");
            (session.tool_id, Some(session.id))
        }
        PageTarget::New { tool_id } => (tool_id, None),
    };

    let tool = api.get_tool(&tool_id).await?;
    let binding = registry.resolve(&tool);
    tracing::info!(tool = %tool.name, session_id = ?session_id, "Opened session page");

    Ok(ToolPage {
        tool,
        binding,
        session_id,
    })
}
