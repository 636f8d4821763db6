// script.rs — JSON change scripts replayed by `changeset replay`.
//
// Example:
//
//   {
//     "title": "Refactor",
//     "steps": [
//       { "op": "add", "elements": [{ "uri": "src/a.rs", "kind": "add", "content": "fn a() {}\n" }] },
//       { "op": "apply", "index": 0 },
//       { "op": "remove_matching", "pattern": "src/**" }
//     ]
//   }

use std::path::Path;

use anyhow::Context;
use changeset_core::ChangeKind;
use serde::{Deserialize, Serialize};

/// A titled sequence of change set operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One operation against the working change set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Add { elements: Vec<ElementSpec> },
    Remove { indices: Vec<usize> },
    RemoveMatching { pattern: String },
    Apply { index: usize },
    Revert { index: usize },
    Open { index: usize },
    OpenChange { index: usize },
    /// Replace the working set by its copy.
    Copy,
    List,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Add { .. } => "add",
            Step::Remove { .. } => "remove",
            Step::RemoveMatching { .. } => "remove_matching",
            Step::Apply { .. } => "apply",
            Step::Revert { .. } => "revert",
            Step::Open { .. } => "open",
            Step::OpenChange { .. } => "open_change",
            Step::Copy => "copy",
            Step::List => "list",
        }
    }
}

/// A file change to stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementSpec {
    pub uri: String,
    #[serde(default = "default_kind")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Proposed file content. Ignored for `delete`.
    #[serde(default)]
    pub content: Option<String>,
}

fn default_kind() -> ChangeKind {
    ChangeKind::Modify
}

impl Script {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse script {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_step_kind() {
        let json = r#"{
            "title": "t",
            "steps": [
                { "op": "add", "elements": [{ "uri": "a.txt" }] },
                { "op": "remove", "indices": [0, 2] },
                { "op": "remove_matching", "pattern": "src/**" },
                { "op": "apply", "index": 0 },
                { "op": "revert", "index": 0 },
                { "op": "open", "index": 0 },
                { "op": "open_change", "index": 0 },
                { "op": "copy" },
                { "op": "list" }
            ]
        }"#;
        let script: Script = serde_json::from_str(json).unwrap();
        let names: Vec<&str> = script.steps.iter().map(Step::name).collect();
        assert_eq!(
            names,
            vec![
                "add",
                "remove",
                "remove_matching",
                "apply",
                "revert",
                "open",
                "open_change",
                "copy",
                "list"
            ]
        );
    }

    #[test]
    fn element_spec_defaults_to_modify() {
        let spec: ElementSpec = serde_json::from_str(r#"{ "uri": "a.txt" }"#).unwrap();
        assert_eq!(spec.kind, ChangeKind::Modify);
        assert!(spec.content.is_none());
    }

    #[test]
    fn unknown_op_is_rejected() {
        let json = r#"{ "title": "t", "steps": [{ "op": "explode" }] }"#;
        assert!(serde_json::from_str::<Script>(json).is_err());
    }
}
