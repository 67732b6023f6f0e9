//! Node identity within a playbook tree.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of a node inside a running playbook, e.g. `main/steps[1]/args.a`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Path of the `index`th step of a playbook
    pub fn step(&self, index: usize) -> Self {
        self.child(format!("steps[{}]", index))
    }

    /// Path of a named argument value
    pub fn arg(&self, name: &str) -> Self {
        self.child(format!("args.{}", name))
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.to_string()
    }
}

impl From<String> for NodePath {
    fn from(s: String) -> Self {
        Self {
            segments: s.split('/').map(str::to_string).collect(),
        }
    }
}
