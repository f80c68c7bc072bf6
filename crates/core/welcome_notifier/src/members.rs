use async_trait::async_trait;
use coalescer::Subject;
use coalescer::ValidityCheck;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A user who joined a group.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Member {
    pub group: String,
    pub user: String,
    pub display_name: String,
}

impl Member {
    /// Fall back to the user id, if the event carries no display name.
    pub fn new(
        group: impl Into<String>,
        user: impl Into<String>,
        display_name: Option<String>,
    ) -> Self {
        let user = user.into();
        let display_name = display_name.unwrap_or_else(|| user.clone());
        Member {
            group: group.into(),
            user,
            display_name,
        }
    }
}

/// A user is welcomed once per group they join.
impl Subject for Member {
    type Id = (String, String);

    fn id(&self) -> Self::Id {
        (self.group.clone(), self.user.clone())
    }
}

#[derive(Debug, Default)]
struct Group {
    name: Option<String>,
    members: HashSet<String>,
}

/// The current members of each group, as told by the join and leave events.
#[derive(Clone, Debug, Default)]
pub struct MemberRegistry {
    groups: Arc<RwLock<HashMap<String, Group>>>,
}

impl MemberRegistry {
    pub async fn join(&self, group: &str, group_name: Option<String>, user: &str) {
        let mut groups = self.groups.write().await;
        let entry = groups.entry(group.to_string()).or_default();
        if group_name.is_some() {
            entry.name = group_name;
        }
        entry.members.insert(user.to_string());
    }

    /// Returns false if the user was not a member of the group.
    pub async fn leave(&self, group: &str, user: &str) -> bool {
        let mut groups = self.groups.write().await;
        groups
            .get_mut(group)
            .is_some_and(|entry| entry.members.remove(user))
    }

    pub async fn is_member(&self, group: &str, user: &str) -> bool {
        let groups = self.groups.read().await;
        groups
            .get(group)
            .is_some_and(|entry| entry.members.contains(user))
    }

    /// The display name of the group, or its id if unknown.
    pub async fn group_name(&self, group: &str) -> String {
        let groups = self.groups.read().await;
        groups
            .get(group)
            .and_then(|entry| entry.name.clone())
            .unwrap_or_else(|| group.to_string())
    }
}

#[async_trait]
impl ValidityCheck<String, Member> for MemberRegistry {
    async fn is_eligible(&self, group: &String, member: &Member) -> anyhow::Result<bool> {
        Ok(self.is_member(group, &member.user).await)
    }
}
