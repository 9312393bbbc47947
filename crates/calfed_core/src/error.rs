/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use http::StatusCode;
use thiserror::Error;

/// Failures surfaced to a peer. The `Display` text of every variant except
/// `Internal` is safe to send back in a response body.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl FederationError {
    pub fn status(&self) -> StatusCode {
        match self {
            FederationError::Authentication(_) => StatusCode::UNAUTHORIZED,
            FederationError::Authorization(_) => StatusCode::FORBIDDEN,
            FederationError::Validation(_) => StatusCode::BAD_REQUEST,
            FederationError::NotFound(_) => StatusCode::NOT_FOUND,
            FederationError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            FederationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body text for the response; internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            FederationError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn forbidden() -> Self {
        FederationError::Authorization("actor does not have permission for this operation".to_string())
    }
}

impl From<anyhow::Error> for FederationError {
    fn from(e: anyhow::Error) -> Self {
        FederationError::Internal(e)
    }
}

impl From<crate::membership::MembershipError> for FederationError {
    fn from(e: crate::membership::MembershipError) -> Self {
        FederationError::Internal(e.into())
    }
}

pub type FedResult<T> = std::result::Result<T, FederationError>;
