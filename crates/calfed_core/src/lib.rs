/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod actor;
pub mod ap;
pub mod calendar_store;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod federation;
pub mod http_sig;
pub mod inbox;
pub mod keys;
pub mod membership;
pub mod object_cache;
pub mod remote_fetch;
pub mod runtime;
pub mod ssrf;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
