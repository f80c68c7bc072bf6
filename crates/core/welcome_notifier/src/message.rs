use crate::members::Member;

pub const DEFAULT_TEMPLATE: &str = "Welcome {users} to {group}!";

/// A welcome message with `{users}`, `{group}` and `{count}` placeholders.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MessageTemplate {
    template: String,
}

impl Default for MessageTemplate {
    fn default() -> Self {
        MessageTemplate::new(DEFAULT_TEMPLATE)
    }
}

impl MessageTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        MessageTemplate {
            template: template.into(),
        }
    }

    pub fn render(&self, group_name: &str, members: &[Member]) -> String {
        self.template
            .replace("{users}", &enumerate(members))
            .replace("{group}", group_name)
            .replace("{count}", &members.len().to_string())
    }
}

/// "Alice", "Alice and Bob", "Alice, Bob and Carol"
fn enumerate(members: &[Member]) -> String {
    let names: Vec<&str> = members
        .iter()
        .map(|member| member.display_name.as_str())
        .collect();

    match names.split_last() {
        None => String::new(),
        Some((last, [])) => last.to_string(),
        Some((last, others)) => format!("{} and {}", others.join(", "), last),
    }
}
