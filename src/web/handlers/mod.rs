//! Web handlers module
//!
//! HTTP request handlers organized by domain. Each one delegates to the
//! service layer.

pub mod health;
pub mod repositories;
pub mod settings;
pub mod tracker;
