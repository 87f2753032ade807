use async_trait::async_trait;
use serde_json::Value;

use forge_core::prompt::extract_code;
use forge_core::{
    CapabilityError, CodeGenerator, GenerationRequest, TestGenerator, TestRequest,
};

use crate::prompts::{generation_messages, test_messages};
use crate::Uplink;

#[async_trait]
impl CodeGenerator for Uplink {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
        tracing::debug!(
            target_file = %request.target.display(),
            attempt = request.attempt,
            "requesting code"
        );
        self.client()
            .complete(generation_messages(request), false)
            .await
    }
}

#[async_trait]
impl TestGenerator for Uplink {
    async fn generate_tests(&self, request: &TestRequest) -> Result<Value, CapabilityError> {
        tracing::debug!(session = %request.session, "requesting test plan");
        let reply = self.client().complete(test_messages(request), true).await?;
        parse_plan(&reply)
    }
}

/// Pull a JSON object out of a reply that may be fenced or chatty
pub(crate) fn parse_plan(reply: &str) -> Result<Value, CapabilityError> {
    let candidates = [
        Some(reply.trim().to_string()),
        extract_code(reply),
        braced(reply).map(str::to_string),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&candidate) {
            return Ok(value);
        }
    }
    Err(CapabilityError::Decode(format!(
        "no JSON object in reply: {}",
        reply.chars().take(200).collect::<String>()
    )))
}

fn braced(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fenced_and_chatty_replies() {
        let plain = parse_plan(r#" {"test_code": "x"} "#).unwrap();
        assert_eq!(plain["test_code"], "x");

        let fenced = parse_plan("```json\n{\"lint_command\": \"true\"}\n```").unwrap();
        assert_eq!(fenced["lint_command"], "true");

        let chatty = parse_plan("Here you go: {\"a\": {\"b\": 1}} hope it helps").unwrap();
        assert_eq!(chatty["a"]["b"], 1);
    }

    #[test]
    fn non_objects_are_decode_errors() {
        assert!(matches!(parse_plan("[1, 2]"), Err(CapabilityError::Decode(_))));
        assert!(matches!(parse_plan("no json"), Err(CapabilityError::Decode(_))));
        assert!(matches!(parse_plan("} {"), Err(CapabilityError::Decode(_))));
    }
}
