//! CLI Commands

pub mod config;
pub mod fetch;
pub mod run;
pub mod schemas;
