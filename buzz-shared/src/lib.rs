#![cfg_attr(not(test), forbid(unsafe_code))]

//! Wire models and client configuration shared by the Buzz crates.

pub mod config;
pub mod models;
