use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use courier_proto::{GroupId, UserId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{
    DirectoryError, GroupDirectory, GroupRecord, UserDirectory, UserProfile, checked_group,
    checked_user,
};

/// Initial directory contents, loadable from JSON.
///
/// ```json
/// {
///   "users": [{ "id": "u1", "username": "alice" }],
///   "groups": [{ "id": "g1", "name": "team", "members": ["u1"] }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySeed {
    /// Users to register
    #[serde(default)]
    pub users: Vec<UserProfile>,
    /// Groups to register
    #[serde(default)]
    pub groups: Vec<GroupRecord>,
}

/// In-memory user and group directory.
///
/// Mutable at runtime so tests can model changes made by the external
/// user/group service while sessions are connected. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    users: DashMap<UserId, UserProfile>,
    usernames: DashMap<String, UserId>,
    groups: DashMap<GroupId, GroupRecord>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated from `seed`.
    ///
    /// Fails on the first record with an id that is not key safe.
    pub fn from_seed(seed: DirectorySeed) -> Result<Self, DirectoryError> {
        let directory = Self::new();
        for user in seed.users {
            directory.add_user(user)?;
        }
        for group in seed.groups {
            directory.add_group(group)?;
        }
        Ok(directory)
    }

    /// Load a JSON seed file.
    pub fn load_seed_file(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Seed(format!("{}: {e}", path.display())))?;
        let seed: DirectorySeed = serde_json::from_str(&raw)
            .map_err(|e| DirectoryError::Seed(format!("{}: {e}", path.display())))?;

        tracing::info!(
            path = %path.display(),
            users = seed.users.len(),
            groups = seed.groups.len(),
            "loaded directory seed"
        );
        Self::from_seed(seed)
    }

    /// Insert or replace a user.
    pub fn add_user(&self, user: UserProfile) -> Result<(), DirectoryError> {
        let user = checked_user(user)?;
        self.inner.usernames.insert(user.username.clone(), user.id.clone());
        self.inner.users.insert(user.id.clone(), user);
        Ok(())
    }

    /// Insert or replace a group.
    pub fn add_group(&self, group: GroupRecord) -> Result<(), DirectoryError> {
        let group = checked_group(group)?;
        self.inner.groups.insert(group.id.clone(), group);
        Ok(())
    }

    /// Add `user` to an existing group. Returns `false` if the group is
    /// unknown, the user id is not key safe, or the user was already a
    /// member.
    pub fn add_member(&self, group: &GroupId, user: UserId) -> bool {
        if !user.is_key_safe() {
            return false;
        }
        let Some(mut record) = self.inner.groups.get_mut(group) else {
            return false;
        };
        if record.is_member(&user) {
            return false;
        }
        record.members.push(user);
        true
    }

    /// Remove `user` from a group. Returns whether anything changed.
    pub fn remove_member(&self, group: &GroupId, user: &UserId) -> bool {
        let Some(mut record) = self.inner.groups.get_mut(group) else {
            return false;
        };
        let before = record.members.len();
        record.members.retain(|member| member != user);
        record.members.len() != before
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn resolve(&self, identifier: &str) -> Result<Option<UserProfile>, DirectoryError> {
        if let Some(user) = self.inner.users.get(&UserId::new(identifier)) {
            return Ok(Some(user.clone()));
        }

        let Some(id) = self.inner.usernames.get(identifier).map(|id| id.clone()) else {
            return Ok(None);
        };
        Ok(self.inner.users.get(&id).map(|user| user.clone()))
    }
}

#[async_trait]
impl GroupDirectory for MemoryDirectory {
    async fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>, DirectoryError> {
        Ok(self.inner.groups.get(id).map(|group| group.clone()))
    }

    async fn groups_for_user(&self, user: &UserId) -> Result<Vec<GroupId>, DirectoryError> {
        let mut groups: Vec<GroupId> = self
            .inner
            .groups
            .iter()
            .filter(|entry| entry.is_member(user))
            .map(|entry| entry.key().clone())
            .collect();
        groups.sort();
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn directory() -> MemoryDirectory {
        MemoryDirectory::from_seed(DirectorySeed {
            users: vec![UserProfile::new("u1", "alice"), UserProfile::new("u2", "bob")],
            groups: vec![GroupRecord::new("g1", "team", [UserId::new("u1")])],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_by_id_then_username() {
        let dir = directory();

        assert_eq!(dir.resolve("u2").await.unwrap().unwrap().username, "bob");
        assert_eq!(dir.resolve("bob").await.unwrap().unwrap().id, UserId::new("u2"));
        assert!(dir.resolve("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn membership_follows_mutations() {
        let dir = directory();
        let g1 = GroupId::new("g1");
        let u2 = UserId::new("u2");

        assert!(!dir.is_member(&g1, &u2).await.unwrap());
        assert!(dir.add_member(&g1, u2.clone()));
        assert!(!dir.add_member(&g1, u2.clone()));
        assert!(dir.is_member(&g1, &u2).await.unwrap());
        assert_eq!(dir.groups_for_user(&u2).await.unwrap(), vec![g1.clone()]);

        assert!(dir.remove_member(&g1, &u2));
        let members = dir.members_of(&g1).await.unwrap().unwrap();
        assert!(!members.contains(&u2));
    }

    #[tokio::test]
    async fn unknown_group() {
        let dir = directory();
        let ghost = GroupId::new("ghost");

        assert!(dir.members_of(&ghost).await.unwrap().is_none());
        assert!(!dir.is_member(&ghost, &UserId::new("u1")).await.unwrap());
        assert!(!dir.add_member(&ghost, UserId::new("u1")));
    }

    #[tokio::test]
    async fn loads_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"users":[{{"id":"u1","username":"alice"}}],"groups":[{{"id":"g1","members":["u1"]}}]}}"#
        )
        .unwrap();

        let dir = MemoryDirectory::load_seed_file(file.path()).unwrap();

        assert!(dir.resolve("alice").await.unwrap().is_some());
        assert!(dir.is_member(&GroupId::new("g1"), &UserId::new("u1")).await.unwrap());
    }

    #[test]
    fn rejects_ids_with_key_separator() {
        let dir = MemoryDirectory::new();

        let user = dir.add_user(UserProfile::new("a:b", "mallory"));
        let group = dir.add_group(GroupRecord::new("g:1", "team", [UserId::new("u1")]));
        let member = dir.add_group(GroupRecord::new("g2", "team", [UserId::new("b:c")]));

        assert!(matches!(user, Err(DirectoryError::InvalidId(id)) if id == "a:b"));
        assert!(matches!(group, Err(DirectoryError::InvalidId(id)) if id == "g:1"));
        assert!(matches!(member, Err(DirectoryError::InvalidId(id)) if id == "b:c"));
        assert!(!dir.add_member(&GroupId::new("g2"), UserId::new("b:c")));
    }

    #[test]
    fn seed_with_unsafe_id_is_rejected() {
        let seed = DirectorySeed {
            users: vec![UserProfile::new("u1", "alice"), UserProfile::new("a:b", "mallory")],
            groups: Vec::new(),
        };

        assert!(matches!(MemoryDirectory::from_seed(seed), Err(DirectoryError::InvalidId(_))));
    }

    #[test]
    fn missing_seed_file_is_an_error() {
        let result = MemoryDirectory::load_seed_file("/nonexistent/courier-seed.json");
        assert!(matches!(result, Err(DirectoryError::Seed(_))));
    }
}
