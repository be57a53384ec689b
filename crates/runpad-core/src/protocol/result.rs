//! Result records carried by child output frames.

use serde::{Deserialize, Deserializer, Serialize};

/// A dumped value, possibly with nested members.
///
/// Each node is built once by the reader, handed to the sink and then owned
/// by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultObject {
    /// Short label, usually the type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    /// Rendered value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// 1-indexed source line the value originates from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,

    #[serde(default)]
    pub column: u32,

    /// Whether the consumer should present the node expanded.
    #[serde(default, deserialize_with = "permissive_bool")]
    pub expanded: bool,

    #[serde(default)]
    pub children: Vec<ResultObject>,
}

impl ResultObject {
    /// A leaf record holding only a value.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// A record with a header and a value.
    pub fn labelled(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: Some(header.into()),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_child(mut self, child: ResultObject) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this tree, including the root.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ResultObject::node_count).sum::<usize>()
    }
}

/// A panic or uncaught error raised inside the child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionResult {
    pub message: String,

    #[serde(flatten)]
    pub object: ResultObject,
}

/// A progress notice from the child, as a fraction in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressResult {
    #[serde(default)]
    pub progress: Option<f64>,
}

/// Accepts JSON booleans as well as `"true"` / `"false"` strings.
fn permissive_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
        Null(()),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Null(()) => Ok(false),
        BoolOrString::Str(s) => {
            if s.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if s.eq_ignore_ascii_case("false") || s.is_empty() {
                Ok(false)
            } else {
                Err(serde::de::Error::custom(format!(
                    "expected boolean, found string {s:?}"
                )))
            }
        }
    }
}
