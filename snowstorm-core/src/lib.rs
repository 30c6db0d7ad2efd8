#![allow(clippy::cargo_common_metadata)]

pub mod config;
pub mod error;
pub mod station;
pub mod verify;
