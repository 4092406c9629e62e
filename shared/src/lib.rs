//! Shared library for AI Docs Assistant Lambda functions.
//!
//! This crate provides common utilities, types, and clients used across all Lambda functions.

pub mod ai;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod documents;
pub mod error;
pub mod health;
pub mod http;
pub mod mailer;
pub mod models;
pub mod password;
pub mod rate_limit;
pub mod secrets;
pub mod users;
pub mod validation;

pub use ai::{BedrockGenerator, DocumentAnalysis, DocumentAssistant, DocumentInfo, TextGenerator};
pub use auth::{authenticate, optional_user, require_role, AuthenticatedUser, Role, TokenKind, TokenService};
pub use config::Config;
pub use context::AppContext;
pub use error::{Error, Result};
pub use http::{ApiResponse, Pagination};
pub use rate_limit::RateLimiter;
pub use secrets::{get_database_credentials, get_secret, DatabaseCredentials};
