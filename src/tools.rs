//! Tool registry
//!
//! Maps a tool's `name` tag to the kind of page that drives it. Tags with no
//! registered kind resolve to [`ToolBinding::Unsupported`] rather than an
//! error, so the page can still render a fallback.

use crate::config::DEFAULT_HISTORY_LIMIT;
use crate::model::Tool;
use crate::state_machine::SessionContext;
use std::collections::HashMap;

/// Tool kinds this client knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Retrieval-augmented question answering over a conversation
    QuestionAnswering,
}

impl ToolKind {
    pub const ALL: [ToolKind; 1] = [ToolKind::QuestionAnswering];

    /// Tag as stored in `Tool::name`
    pub fn tag(self) -> &'static str {
        match self {
            ToolKind::QuestionAnswering => "question_answering",
        }
    }
}

/// What a page should do for a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolBinding {
    /// Drive a conversation with this context
    Conversation(SessionContext),
    /// No registered kind; show a placeholder
    Unsupported { name: String },
}

type Factory = fn(&Tool, u32) -> ToolBinding;

/// Collection of known tool kinds
pub struct ToolRegistry {
    factories: HashMap<&'static str, Factory>,
    history_limit: u32,
}

impl ToolRegistry {
    /// Registry with no kinds; every tool resolves to `Unsupported`
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn register(&mut self, kind: ToolKind) {
        let factory: Factory = match kind {
            ToolKind::QuestionAnswering => conversation,
        };
        self.factories.insert(kind.tag(), factory);
    }

    pub fn resolve(&self, tool: &Tool) -> ToolBinding {
        match self.factories.get(tool.name.as_str()) {
            Some(factory) => factory(tool, self.history_limit),
            None => {
                tracing::debug!(tool = %tool.name, "No page registered for tool");
                ToolBinding::Unsupported {
                    name: tool.name.clone(),
                }
            }
        }
    }
}

impl Default for ToolRegistry {
    /// All built-in kinds
    fn default() -> Self {
        let mut registry = Self::empty();
        for kind in ToolKind::ALL {
            registry.register(kind);
        }
        registry
    }
}

fn conversation(tool: &Tool, history_limit: u32) -> ToolBinding {
    ToolBinding::Conversation(
        SessionContext::new(tool.id.clone(), tool.name.clone()).with_history_limit(history_limit),
    )
}
