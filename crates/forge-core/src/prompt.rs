//! Prompt text and reply cleanup shared by the pipeline and remote uplinks

use once_cell::sync::Lazy;
use regex::Regex;

use forge_sprt::Verdict;

use crate::session::OBSERVATIONS_ENV;

static FENCE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?s)```[^\n`]*\n(.*?)```").expect("fence pattern is valid")
});

/// Contract handed to the test generator
#[must_use]
pub fn test_directive(min_trials: usize, observation_path: &str) -> String {
    format!(
        "Write parameterized unit tests (at least {min_trials} fuzzing iterations) that try to \
         break the interface below. Detect the target language and use its standard lint and \
         test tooling. The test program must write a flat JSON array of integers to \
         '{observation_path}' (relative to the working directory, also available in the \
         {OBSERVATIONS_ENV} environment variable), one entry per trial: 0 = pass, 1 = fail. \
         Reply with strict JSON only, with exactly the string fields test_file_path, \
         test_code, lint_command and test_command."
    )
}

/// Reduce a reply to its first fenced block, or trim it when unfenced.
///
/// Returns `None` for an empty result.
#[must_use]
pub fn extract_code(reply: &str) -> Option<String> {
    let code = match FENCE.captures(reply).and_then(|c| c.get(1)) {
        Some(block) => block.as_str().to_string(),
        None => {
            let trimmed = reply.trim();
            if trimmed.is_empty() {
                return None;
            }
            format!("{trimmed}\n")
        }
    };
    if code.trim().is_empty() {
        None
    } else {
        Some(code)
    }
}

/// Context carried into the next attempt after a statistical rejection
#[must_use]
pub fn rejection_digest(verdict: &Verdict, logs: &str, tail_chars: usize) -> String {
    format!(
        "Logic verification failed: {verdict}.\nTest logs:\n{}",
        forge_sandbox::tail(logs, tail_chars)
    )
}
