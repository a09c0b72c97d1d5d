//! Goal, term-goal and widget payloads.
//!
//! Interactive servers send code as a tagged-text tree whose tags are only
//! meaningful to a renderer. The tree is kept opaque here; [`CodeText::to_plain`]
//! flattens it when plain text is needed (copy to comment, terminal output).
//! Legacy servers send preformatted strings, which land in [`CodeText::Plain`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::position::Range;

const DEFAULT_GOAL_PREFIX: &str = "⊢ ";

fn default_goal_prefix() -> String {
    DEFAULT_GOAL_PREFIX.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeText {
    Plain(String),
    Tagged(Value),
}

impl CodeText {
    /// Flatten to plain text, dropping all tags.
    #[must_use]
    pub fn to_plain(&self) -> String {
        match self {
            Self::Plain(text) => text.clone(),
            Self::Tagged(tree) => {
                let mut out = String::new();
                flatten_tagged(tree, &mut out);
                out
            }
        }
    }
}

/// Tagged text is `{"text": s}`, `{"append": [..]}` or `{"tag": [info, subtree]}`.
fn flatten_tagged(node: &Value, out: &mut String) {
    match node {
        Value::String(text) => out.push_str(text),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            } else if let Some(Value::Array(items)) = map.get("append") {
                for item in items {
                    flatten_tagged(item, out);
                }
            } else if let Some(Value::Array(pair)) = map.get("tag")
                && let Some(subtree) = pair.get(1)
            {
                flatten_tagged(subtree, out);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub names: Vec<String>,
    #[serde(rename = "type")]
    pub type_: CodeText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<CodeText>,
}

impl Hypothesis {
    #[must_use]
    pub fn to_plain(&self) -> String {
        let mut line = format!("{} : {}", self.names.join(" "), self.type_.to_plain());
        if let Some(val) = &self.val {
            line.push_str(" := ");
            line.push_str(&val.to_plain());
        }
        line
    }
}

/// One proof obligation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default = "default_goal_prefix")]
    pub goal_prefix: String,
    #[serde(default)]
    pub hyps: Vec<Hypothesis>,
    #[serde(rename = "type")]
    pub target: CodeText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mvar_id: Option<String>,
}

impl Goal {
    /// A preformatted goal from a legacy server. Hypotheses are already part
    /// of the text, so there is no separate prefix.
    #[must_use]
    pub fn preformatted(text: impl Into<String>) -> Self {
        Self {
            user_name: None,
            goal_prefix: String::new(),
            hyps: Vec::new(),
            target: CodeText::Plain(text.into()),
            mvar_id: None,
        }
    }

    #[must_use]
    pub fn to_plain(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.user_name {
            out.push_str("case ");
            out.push_str(name);
            out.push('\n');
        }
        for hyp in &self.hyps {
            out.push_str(&hyp.to_plain());
            out.push('\n');
        }
        out.push_str(&self.goal_prefix);
        out.push_str(&self.target.to_plain());
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalList {
    pub goals: Vec<Goal>,
}

impl GoalList {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.goals.len()
    }

    /// Goals separated by blank lines; `"no goals"` when solved.
    #[must_use]
    pub fn to_plain(&self) -> String {
        if self.goals.is_empty() {
            return "no goals".to_string();
        }
        self.goals
            .iter()
            .map(Goal::to_plain)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Expected type of the term under the cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermGoal {
    #[serde(flatten)]
    pub goal: Goal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

/// `$/lean/plainGoal` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainGoal {
    #[serde(default)]
    pub rendered: String,
    #[serde(default)]
    pub goals: Vec<String>,
}

impl From<PlainGoal> for GoalList {
    fn from(plain: PlainGoal) -> Self {
        Self {
            goals: plain.goals.into_iter().map(Goal::preformatted).collect(),
        }
    }
}

/// `$/lean/plainTermGoal` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainTermGoal {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl From<PlainTermGoal> for TermGoal {
    fn from(plain: PlainTermGoal) -> Self {
        Self {
            goal: Goal::preformatted(plain.goal),
            range: plain.range,
        }
    }
}

/// An interactive panel supplied by the server for a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetInstance {
    pub id: String,
    /// Opaque module hash the renderer resolves.
    pub javascript_hash: Value,
    #[serde(default)]
    pub props: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}
