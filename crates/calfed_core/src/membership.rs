/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("grant already exists")]
    AlreadyExists,
    #[error("grant not found")]
    NotFound,
    #[error("membership db: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, MembershipError>;

/// A remote actor allowed to edit a local calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEditorGrant {
    pub calendar_id: String,
    pub actor_uri: String,
    pub remote_username: String,
    pub remote_domain: String,
    pub granted_by: String,
    pub created_at_ms: i64,
}

/// A local account allowed to edit a calendar hosted elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCalendarAccess {
    pub account_id: String,
    pub remote_calendar_id: String,
    pub remote_actor_uri: String,
    pub remote_inbox_url: String,
    pub granted_at_ms: i64,
}

/// Uniqueness lives in the primary keys: two concurrent grants for the same
/// pair race on the insert and exactly one of them gets `AlreadyExists`.
#[derive(Clone)]
pub struct MembershipStore {
    path: PathBuf,
}

impl MembershipStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS remote_editors (
              calendar_id TEXT NOT NULL,
              actor_uri TEXT NOT NULL,
              remote_username TEXT NOT NULL,
              remote_domain TEXT NOT NULL,
              granted_by TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY(calendar_id, actor_uri)
            );
            CREATE INDEX IF NOT EXISTS idx_remote_editors_actor ON remote_editors(actor_uri);

            CREATE TABLE IF NOT EXISTS remote_calendar_access (
              account_id TEXT NOT NULL,
              remote_calendar_id TEXT NOT NULL,
              remote_actor_uri TEXT NOT NULL,
              remote_inbox_url TEXT NOT NULL,
              granted_at_ms INTEGER NOT NULL,
              PRIMARY KEY(account_id, remote_calendar_id)
            );
            "#,
        )?;
        Ok(Self { path })
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn grant_remote_editor(
        &self,
        calendar_id: &str,
        actor_uri: &str,
        remote_username: &str,
        remote_domain: &str,
        granted_by: &str,
    ) -> Result<RemoteEditorGrant> {
        let grant = RemoteEditorGrant {
            calendar_id: calendar_id.to_string(),
            actor_uri: actor_uri.to_string(),
            remote_username: remote_username.to_string(),
            remote_domain: remote_domain.to_string(),
            granted_by: granted_by.to_string(),
            created_at_ms: now_ms(),
        };
        self.conn()?
            .execute(
                "INSERT INTO remote_editors(calendar_id, actor_uri, remote_username, remote_domain, granted_by, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    grant.calendar_id,
                    grant.actor_uri,
                    grant.remote_username,
                    grant.remote_domain,
                    grant.granted_by,
                    grant.created_at_ms
                ],
            )
            .map_err(map_insert_err)?;
        Ok(grant)
    }

    pub fn revoke_remote_editor(&self, calendar_id: &str, actor_uri: &str) -> Result<()> {
        let n = self.conn()?.execute(
            "DELETE FROM remote_editors WHERE calendar_id=?1 AND actor_uri=?2",
            params![calendar_id, actor_uri],
        )?;
        if n == 0 {
            return Err(MembershipError::NotFound);
        }
        Ok(())
    }

    pub fn is_remote_editor(&self, calendar_id: &str, actor_uri: &str) -> Result<bool> {
        let hit: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM remote_editors WHERE calendar_id=?1 AND actor_uri=?2",
                params![calendar_id, actor_uri],
                |r| r.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn list_remote_editors(&self, calendar_id: &str) -> Result<Vec<RemoteEditorGrant>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT calendar_id, actor_uri, remote_username, remote_domain, granted_by, created_at_ms
             FROM remote_editors WHERE calendar_id=?1 ORDER BY created_at_ms ASC, actor_uri ASC",
        )?;
        let rows = stmt.query_map(params![calendar_id], |r| {
            Ok(RemoteEditorGrant {
                calendar_id: r.get(0)?,
                actor_uri: r.get(1)?,
                remote_username: r.get(2)?,
                remote_domain: r.get(3)?,
                granted_by: r.get(4)?,
                created_at_ms: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Cascade for a deleted calendar. Returns the number of grants dropped.
    pub fn delete_calendar(&self, calendar_id: &str) -> Result<usize> {
        Ok(self.conn()?.execute(
            "DELETE FROM remote_editors WHERE calendar_id=?1",
            params![calendar_id],
        )?)
    }

    pub fn grant_remote_calendar_access(
        &self,
        account_id: &str,
        remote_calendar_id: &str,
        remote_actor_uri: &str,
        remote_inbox_url: &str,
        granted_at_ms: i64,
    ) -> Result<RemoteCalendarAccess> {
        let access = RemoteCalendarAccess {
            account_id: account_id.to_string(),
            remote_calendar_id: remote_calendar_id.to_string(),
            remote_actor_uri: remote_actor_uri.to_string(),
            remote_inbox_url: remote_inbox_url.to_string(),
            granted_at_ms,
        };
        self.conn()?
            .execute(
                "INSERT INTO remote_calendar_access(account_id, remote_calendar_id, remote_actor_uri, remote_inbox_url, granted_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    access.account_id,
                    access.remote_calendar_id,
                    access.remote_actor_uri,
                    access.remote_inbox_url,
                    access.granted_at_ms
                ],
            )
            .map_err(map_insert_err)?;
        Ok(access)
    }

    pub fn revoke_remote_calendar_access(&self, account_id: &str, remote_calendar_id: &str) -> Result<()> {
        let n = self.conn()?.execute(
            "DELETE FROM remote_calendar_access WHERE account_id=?1 AND remote_calendar_id=?2",
            params![account_id, remote_calendar_id],
        )?;
        if n == 0 {
            return Err(MembershipError::NotFound);
        }
        Ok(())
    }

    pub fn get_remote_calendar_access(
        &self,
        account_id: &str,
        remote_calendar_id: &str,
    ) -> Result<Option<RemoteCalendarAccess>> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT account_id, remote_calendar_id, remote_actor_uri, remote_inbox_url, granted_at_ms
                 FROM remote_calendar_access WHERE account_id=?1 AND remote_calendar_id=?2",
                params![account_id, remote_calendar_id],
                row_to_access,
            )
            .optional()?)
    }

    pub fn list_remote_calendar_access(&self, account_id: &str) -> Result<Vec<RemoteCalendarAccess>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, remote_calendar_id, remote_actor_uri, remote_inbox_url, granted_at_ms
             FROM remote_calendar_access WHERE account_id=?1 ORDER BY granted_at_ms ASC, remote_calendar_id ASC",
        )?;
        let rows = stmt.query_map(params![account_id], row_to_access)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn row_to_access(r: &rusqlite::Row<'_>) -> rusqlite::Result<RemoteCalendarAccess> {
    Ok(RemoteCalendarAccess {
        account_id: r.get(0)?,
        remote_calendar_id: r.get(1)?,
        remote_actor_uri: r.get(2)?,
        remote_inbox_url: r.get(3)?,
        granted_at_ms: r.get(4)?,
    })
}

fn map_insert_err(e: rusqlite::Error) -> MembershipError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            MembershipError::AlreadyExists
        }
        _ => MembershipError::Db(e),
    }
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
