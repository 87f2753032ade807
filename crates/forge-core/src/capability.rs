//! Generation capabilities and the test-plan contract
//!
//! Both capabilities are opaque remote calls. The orchestrator owns them
//! behind `Arc<dyn _>` so tests can substitute scripted fakes.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, PlanError};

/// Input of one code generation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    /// What the change must achieve
    pub task: String,
    /// Target file, relative to the project root
    pub target: PathBuf,
    /// Current content of the target
    pub file_content: String,
    /// Why the previous attempt failed
    pub prior_error: Option<String>,
    /// Code rejected by the previous attempt
    pub prior_code: Option<String>,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Input of one test generation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRequest {
    /// Blinded interface summary of the generated code
    pub interface: String,
    /// What the change must achieve
    pub task: String,
    /// Target file, relative to the project root
    pub target: PathBuf,
    /// Attempt session, namespacing every artifact
    pub session: String,
    /// Root-relative path the observations must be written to
    pub observation_path: String,
    /// Contract the test program must honor
    pub directive: String,
    /// Why the previous verification strike happened
    pub prior_error: Option<String>,
}

/// Produces candidate source code
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Generate the full new content of the target file.
    ///
    /// The reply may be wrapped in Markdown fences; the orchestrator strips them.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError>;
}

/// Produces adversarial test plans
#[async_trait]
pub trait TestGenerator: Send + Sync {
    /// Return the raw plan payload; shape is checked by [`TestPlan::from_value`].
    async fn generate_tests(
        &self,
        request: &TestRequest,
    ) -> Result<serde_json::Value, CapabilityError>;
}

/// Validated test-generation payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TestPlan {
    /// Where the test program is written, relative to the project root
    pub test_file_path: String,
    /// Test program source
    pub test_code: String,
    /// Command checking the test program and target statically
    pub lint_command: String,
    /// Command running the test program
    pub test_command: String,
}

impl TestPlan {
    /// Decode and shape-check a payload
    ///
    /// # Errors
    /// Returns [`PlanError`] on missing, mistyped, extra or empty fields.
    pub fn from_value(value: serde_json::Value) -> Result<Self, PlanError> {
        let plan: Self =
            serde_json::from_value(value).map_err(|e| PlanError::Malformed(e.to_string()))?;
        for (name, field) in [
            ("test_file_path", &plan.test_file_path),
            ("test_code", &plan.test_code),
            ("lint_command", &plan.lint_command),
            ("test_command", &plan.test_command),
        ] {
            if field.trim().is_empty() {
                return Err(PlanError::EmptyField(name));
            }
        }
        Ok(plan)
    }

    /// JSON schema handed to remote generators
    #[must_use]
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(TestPlan)
    }

    /// Root-relative location of the test file.
    ///
    /// Rejects absolute paths, parent traversal, the target itself and
    /// anything under `.forge` or `.git`.
    ///
    /// # Errors
    /// Returns [`PlanError::UnsafePath`] naming the violation.
    pub fn test_file(&self, target: &Path) -> Result<PathBuf, PlanError> {
        let unsafe_path = |reason| PlanError::UnsafePath {
            path: self.test_file_path.clone(),
            reason,
        };
        let raw = Path::new(self.test_file_path.trim());
        let mut relative = PathBuf::new();
        for component in raw.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => return Err(unsafe_path("parent traversal")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(unsafe_path("absolute path"))
                }
            }
        }
        let Some(first) = relative.components().next() else {
            return Err(unsafe_path("empty path"));
        };
        if matches!(first.as_os_str().to_str(), Some(".forge" | ".git")) {
            return Err(unsafe_path("protected directory"));
        }
        if relative == target {
            return Err(unsafe_path("overwrites the target"));
        }
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> serde_json::Value {
        json!({
            "test_file_path": "tests/test_app.py",
            "test_code": "import app\n",
            "lint_command": "python -m py_compile tests/test_app.py",
            "test_command": "python tests/test_app.py",
        })
    }

    #[test]
    fn accepts_complete_payload() {
        let plan = TestPlan::from_value(payload()).unwrap();
        assert_eq!(plan.test_file(Path::new("app.py")).unwrap(), PathBuf::from("tests/test_app.py"));
    }

    #[test]
    fn rejects_missing_field() {
        let mut value = payload();
        value.as_object_mut().unwrap().remove("lint_command");
        assert!(matches!(TestPlan::from_value(value), Err(PlanError::Malformed(_))));
    }

    #[test]
    fn rejects_mistyped_and_extra_fields() {
        let mut value = payload();
        value["test_command"] = json!(42);
        assert!(matches!(TestPlan::from_value(value), Err(PlanError::Malformed(_))));

        let mut value = payload();
        value["notes"] = json!("hi");
        assert!(matches!(TestPlan::from_value(value), Err(PlanError::Malformed(_))));

        assert!(TestPlan::from_value(json!("not an object")).is_err());
    }

    #[test]
    fn rejects_blank_field() {
        let mut value = payload();
        value["test_code"] = json!("  \n");
        assert_eq!(TestPlan::from_value(value), Err(PlanError::EmptyField("test_code")));
    }

    #[test]
    fn rejects_unsafe_paths() {
        let target = Path::new("app.py");
        for bad in ["/tmp/x.py", "../x.py", "tests/../../x.py", "app.py", "./app.py", ".forge/x.py", ".git/hooks/pre-commit"] {
            let mut value = payload();
            value["test_file_path"] = json!(bad);
            let plan = TestPlan::from_value(value).unwrap();
            assert!(
                matches!(plan.test_file(target), Err(PlanError::UnsafePath { .. })),
                "{bad} should be refused"
            );
        }
    }

    #[test]
    fn schema_lists_all_fields() {
        let schema = serde_json::to_value(TestPlan::schema()).unwrap();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 4);
        assert_eq!(schema["additionalProperties"], json!(false));
    }
}
