//! Chat completions wire format

use serde::{Deserialize, Serialize};

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions
    System,
    /// Request content
    User,
    /// Model output
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker
    pub role: Role,
    /// Text content
    pub content: String,
}

impl Message {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Requested reply format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseFormat {
    /// `json_object` for strict JSON replies
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model name
    pub model: String,
    /// Conversation
    pub messages: Vec<Message>,
    /// Sampling temperature
    pub temperature: f32,
    /// Reply format constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    /// Ask for a JSON object reply
    #[must_use]
    pub fn json_reply(mut self) -> Self {
        self.response_format = Some(ResponseFormat {
            kind: "json_object",
        });
        self
    }
}

/// Response body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Candidate replies
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatResponse {
    /// Text of the first choice, if any
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
    }
}

/// One candidate reply
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// Reply message
    pub message: ReplyMessage,
}

/// Reply message; `content` is null for tool calls
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyMessage {
    /// Text content
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shape() {
        let request = ChatRequest {
            model: "m".into(),
            messages: vec![Message::system("s"), Message::user("u")],
            temperature: 0.5,
            response_format: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "u");
        assert!(value.get("response_format").is_none());

        let value = serde_json::to_value(request.json_reply()).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
    }

    #[test]
    fn first_non_empty_choice() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(response.into_text().as_deref(), Some("hi"));

        let empty: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(empty.into_text().is_none());

        let none: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(none.into_text().is_none());
    }
}
