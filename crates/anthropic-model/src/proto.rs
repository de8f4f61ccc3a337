use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use storm_agent_model::{ModelMessage, ModelRequest, ModelTool};

use crate::AnthropicConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<UsageDelta>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageStart {
    pub id: String,
    #[serde(default)]
    pub usage: Option<UsageDelta>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UsageDelta {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    pub r#type: String,
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ApiError,
}

/// Extracts the error from a non-successful response body.
pub fn parse_error_body(body: &str) -> Option<ApiError> {
    serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error)
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct Tool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    pub(crate) messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &ModelRequest,
    config: &AnthropicConfig,
) -> MessagesRequest {
    MessagesRequest {
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        system: req.system.clone().filter(|s| !s.is_empty()),
        messages: create_messages(&req.messages),
        tools: req.tools.iter().map(create_tool).collect(),
        temperature: config.temperature,
        stream: true,
    }
}

/// Converts the messages, merging adjacent messages of the same role.
///
/// Tool results are sent as user content, so a user input following tool
/// results (or several results in a row) ends up in a single message.
fn create_messages(messages: &[ModelMessage]) -> Vec<Message> {
    let mut converted: Vec<Message> = Vec::with_capacity(messages.len());
    for msg in messages {
        let (role, blocks) = create_blocks(msg);
        if blocks.is_empty() {
            continue;
        }
        match converted.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => converted.push(Message {
                role,
                content: blocks,
            }),
        }
    }
    converted
}

fn create_blocks(msg: &ModelMessage) -> (Role, Vec<ContentBlock>) {
    match msg {
        ModelMessage::User { content } => (Role::User, text_block(content)),
        ModelMessage::Assistant(assistant) => {
            let mut blocks = text_block(&assistant.content);
            blocks.extend(assistant.tool_calls.iter().map(|call| {
                ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: match &call.arguments {
                        Value::Object(_) => call.arguments.clone(),
                        _ => Value::Object(Map::new()),
                    },
                }
            }));
            (Role::Assistant, blocks)
        }
        ModelMessage::Tool(result) => (
            Role::User,
            vec![ContentBlock::ToolResult {
                tool_use_id: result.id.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            }],
        ),
    }
}

// Empty text blocks are rejected by the API.
#[inline]
fn text_block(text: &str) -> Vec<ContentBlock> {
    if text.trim().is_empty() {
        return vec![];
    }
    vec![ContentBlock::Text {
        text: text.to_owned(),
    }]
}

#[inline]
fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.parameters.clone(),
    }
}
