use serde::Deserialize;

/// A membership change, read as one JSON object per input line.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemberEvent {
    Join {
        group: String,
        #[serde(default)]
        group_name: Option<String>,
        user: String,
        #[serde(default)]
        name: Option<String>,
    },
    Leave {
        group: String,
        user: String,
    },
}

impl MemberEvent {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
