pub mod config;
pub mod errors;
pub mod git;
pub mod models;
pub mod registry;
pub mod remote;
pub mod scheduling;
pub mod services;
pub mod sync;
pub mod utils;
pub mod web;
