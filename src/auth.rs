use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::sha256_hex;
use crate::models::{Role, SegmentPermissions, User};

const DEFAULT_USERS: [(&str, &str, Role); 2] = [
    ("analyst1", "Analyst@123", Role::Analyst),
    ("cro1", "CRO@123", Role::Cro),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub segments_json: String,
}

impl UserRow {
    fn to_user(&self) -> User {
        let segments = serde_json::from_str(&self.segments_json).unwrap_or_else(|err| {
            warn!(username = %self.username, error = %err, "unreadable segments, granting wildcard");
            SegmentPermissions::unrestricted()
        });
        User {
            username: self.username.clone(),
            role: self.role,
            segments,
        }
    }
}

pub fn hash_password(password: &str) -> String {
    sha256_hex(password.as_bytes())
}

fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

pub struct UserStore {
    path: PathBuf,
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> anyhow::Result<Vec<UserRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut rows = Vec::new();
        for result in reader.deserialize::<UserRow>() {
            rows.push(result.with_context(|| format!("malformed row in {}", self.path.display()))?);
        }
        Ok(rows)
    }

    fn write(&self, rows: &[UserRow]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn find<'a>(rows: &'a [UserRow], username: &str) -> Option<&'a UserRow> {
        let wanted = normalize(username);
        rows.iter().find(|row| normalize(&row.username) == wanted)
    }

    pub fn ensure_default_users(&self) -> anyhow::Result<usize> {
        let mut created = 0usize;
        for (username, password, role) in DEFAULT_USERS {
            if self.create_user(username, password, role, None)? {
                created += 1;
            }
        }
        if created > 0 {
            info!(created, "default users seeded");
        }
        Ok(created)
    }

    /// Returns false for an empty name or password, or a name already taken.
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
        segments: Option<SegmentPermissions>,
    ) -> anyhow::Result<bool> {
        let username = normalize(username);
        if username.is_empty() || password.is_empty() {
            return Ok(false);
        }
        let mut rows = self.read()?;
        if Self::find(&rows, &username).is_some() {
            debug!(username = %username, "username already exists");
            return Ok(false);
        }
        let segments = segments.unwrap_or_else(SegmentPermissions::unrestricted);
        rows.push(UserRow {
            username: username.clone(),
            password_hash: hash_password(password),
            role,
            segments_json: serde_json::to_string(&segments)?,
        });
        self.write(&rows)?;
        info!(username = %username, %role, "user created");
        Ok(true)
    }

    pub fn verify_login(
        &self,
        username: &str,
        password: &str,
        role: Option<Role>,
    ) -> anyhow::Result<Option<User>> {
        let rows = self.read()?;
        let Some(row) = Self::find(&rows, username) else {
            return Ok(None);
        };
        if row.password_hash != hash_password(password) {
            return Ok(None);
        }
        if role.is_some_and(|r| r != row.role) {
            return Ok(None);
        }
        Ok(Some(row.to_user()))
    }

    pub fn get_user(&self, username: &str) -> anyhow::Result<Option<User>> {
        let rows = self.read()?;
        Ok(Self::find(&rows, username).map(UserRow::to_user))
    }

    pub fn list_users(&self) -> anyhow::Result<Vec<User>> {
        Ok(self.read()?.iter().map(UserRow::to_user).collect())
    }

    pub fn update_segments(
        &self,
        username: &str,
        segments: &SegmentPermissions,
    ) -> anyhow::Result<bool> {
        let mut rows = self.read()?;
        let wanted = normalize(username);
        let Some(row) = rows.iter_mut().find(|row| normalize(&row.username) == wanted) else {
            return Ok(false);
        };
        row.segments_json = serde_json::to_string(segments)?;
        self.write(&rows)?;
        info!(username = %wanted, "segment access updated");
        Ok(true)
    }
}
