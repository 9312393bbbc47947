/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use async_trait::async_trait;
use calfed_protocol::ApObject;
use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

use crate::keys::Identity;

#[derive(Debug, Clone)]
pub struct Calendar {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub summary: Option<String>,
    pub public_key_pem: Option<String>,
    pub private_key_pem: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub public_key_pem: Option<String>,
}

/// Persistence of calendars, accounts and events lives outside the federation
/// layer; this is all of it the layer needs.
#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn get_calendar_by_name(&self, name: &str) -> Result<Option<Calendar>>;

    async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn user_can_modify_calendar(&self, account: &Account, calendar: &Calendar) -> Result<bool>;

    /// Keyed on the event id, so replays overwrite instead of duplicating.
    async fn upsert_remote_event(&self, calendar: &Calendar, event: &ApObject) -> Result<()>;

    /// Returns false when there was nothing to delete.
    async fn delete_remote_event(&self, calendar: &Calendar, event_id: &str) -> Result<bool>;
}

/// Process-local store backing the service binary and tests.
#[derive(Default)]
pub struct InMemoryCalendarStore {
    calendars: RwLock<HashMap<String, Calendar>>,
    accounts: RwLock<HashMap<String, Account>>,
    editors: RwLock<HashSet<(String, String)>>,
    events: RwLock<HashMap<(String, String), ApObject>>,
}

impl InMemoryCalendarStore {
    pub fn add_calendar(&self, id: &str, name: &str, identity: Option<&Identity>) -> Calendar {
        let cal = Calendar {
            id: id.to_string(),
            name: name.to_string(),
            display_name: None,
            summary: None,
            public_key_pem: identity.map(|i| i.public_key_pem.clone()),
            private_key_pem: identity.map(|i| i.private_key_pem.clone()),
        };
        self.put_calendar(cal.clone());
        cal
    }

    pub fn put_calendar(&self, calendar: Calendar) {
        write(&self.calendars).insert(calendar.name.clone(), calendar);
    }

    pub fn add_account(&self, id: &str, username: &str, identity: Option<&Identity>) -> Account {
        let account = Account {
            id: id.to_string(),
            username: username.to_string(),
            display_name: None,
            public_key_pem: identity.map(|i| i.public_key_pem.clone()),
        };
        self.put_account(account.clone());
        account
    }

    pub fn put_account(&self, account: Account) {
        write(&self.accounts).insert(account.username.clone(), account);
    }

    pub fn allow_editor(&self, account_id: &str, calendar_id: &str) {
        write(&self.editors).insert((account_id.to_string(), calendar_id.to_string()));
    }

    pub fn remove_calendar(&self, name: &str) -> Option<Calendar> {
        let removed = write(&self.calendars).remove(name)?;
        write(&self.events).retain(|(cal, _), _| cal != &removed.id);
        Some(removed)
    }

    pub fn events(&self, calendar_id: &str) -> Vec<ApObject> {
        let mut out: Vec<ApObject> = read(&self.events)
            .iter()
            .filter(|((cal, _), _)| cal == calendar_id)
            .map(|(_, ev)| ev.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

#[async_trait]
impl CalendarStore for InMemoryCalendarStore {
    async fn get_calendar_by_name(&self, name: &str) -> Result<Option<Calendar>> {
        Ok(read(&self.calendars).get(name).cloned())
    }

    async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        Ok(read(&self.accounts).get(username).cloned())
    }

    async fn user_can_modify_calendar(&self, account: &Account, calendar: &Calendar) -> Result<bool> {
        Ok(read(&self.editors).contains(&(account.id.clone(), calendar.id.clone())))
    }

    async fn upsert_remote_event(&self, calendar: &Calendar, event: &ApObject) -> Result<()> {
        write(&self.events).insert((calendar.id.clone(), event.id.clone()), event.clone());
        Ok(())
    }

    async fn delete_remote_event(&self, calendar: &Calendar, event_id: &str) -> Result<bool> {
        Ok(write(&self.events)
            .remove(&(calendar.id.clone(), event_id.to_string()))
            .is_some())
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_keyed_on_event_id() {
        let store = InMemoryCalendarStore::default();
        let cal = store.add_calendar("cal-1", "acme", None);
        let mut ev = ApObject::new("https://remote.example/events/42", "Event");
        store.upsert_remote_event(&cal, &ev).await.unwrap();
        ev.extra.insert("name".into(), "Renamed".into());
        store.upsert_remote_event(&cal, &ev).await.unwrap();
        let events = store.events("cal-1");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].extra.get("name").and_then(|v| v.as_str()), Some("Renamed"));

        assert!(store.delete_remote_event(&cal, &ev.id).await.unwrap());
        assert!(!store.delete_remote_event(&cal, &ev.id).await.unwrap());
    }

    #[tokio::test]
    async fn editor_permission() {
        let store = InMemoryCalendarStore::default();
        let cal = store.add_calendar("cal-1", "acme", None);
        let alice = store.add_account("acct-1", "alice", None);
        assert!(!store.user_can_modify_calendar(&alice, &cal).await.unwrap());
        store.allow_editor("acct-1", "cal-1");
        assert!(store.user_can_modify_calendar(&alice, &cal).await.unwrap());
    }
}
