//! Message templates for both capabilities

use std::fmt::Write as _;

use forge_core::{GenerationRequest, TestPlan, TestRequest};

use crate::wire::Message;

const GENERATOR_SYSTEM: &str = "You are a precise software engineer. You receive one source \
file and a task. Reply with the complete new content of that file in a single fenced code \
block and nothing else. Keep unrelated code intact. Document every public function.";

/// Messages for a code generation call
#[must_use]
pub fn generation_messages(request: &GenerationRequest) -> Vec<Message> {
    let mut user = format!(
        "## Task\n{}\n\n## File: {}\n```\n{}```\n",
        request.task,
        request.target.display(),
        with_newline(&request.file_content),
    );
    if let Some(error) = &request.prior_error {
        let _ = write!(
            user,
            "\n## Previous attempt {} failed\n{error}\n",
            request.attempt.saturating_sub(1)
        );
    }
    if let Some(code) = &request.prior_code {
        let _ = write!(
            user,
            "\n## Rejected code from the previous attempt\n```\n{}```\nDo not repeat its mistakes.\n",
            with_newline(code)
        );
    }
    vec![Message::system(GENERATOR_SYSTEM), Message::user(user)]
}

/// Messages for a test generation call.
///
/// The system message carries the directive and the JSON schema of the plan.
#[must_use]
pub fn test_messages(request: &TestRequest) -> Vec<Message> {
    let schema = serde_json::to_string_pretty(&TestPlan::schema()).unwrap_or_default();
    let system = format!(
        "You are an adversarial verifier. You never see the implementation, only its \
         interface. {}\n\nName the test file after session {} so it cannot collide with \
         other runs.\n\nReply schema:\n{schema}",
        request.directive, request.session
    );
    let mut user = format!(
        "## Task the code claims to solve\n{}\n\n## Target\n{}\n\n## Interface\n{}\n",
        request.task,
        request.target.display(),
        request.interface,
    );
    if let Some(error) = &request.prior_error {
        let _ = write!(user, "\n## Your previous plan failed to run\n{error}\n");
    }
    vec![Message::system(system), Message::user(user)]
}

fn with_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
