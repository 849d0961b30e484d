//! Compile-time configuration constants shared by the memory and migration crates.
//!
//! Runtime tunables live with the subsystem that consumes them
//! (see `page_migration::MigrationSettings`); only values that never change
//! at runtime belong here.

#![no_std]

#[macro_use] extern crate static_assertions;

pub mod memory;
pub mod migration;
