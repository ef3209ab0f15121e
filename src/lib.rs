//! Amelia
//!
//! A small WhatsApp bot: links as a companion device via pairing code, stays
//! connected, and answers `hi` with a greeting and `!echo <text>` with the text.

pub mod config;
pub mod error;
pub mod logging;
pub mod whatsapp;

#[cfg(test)]
mod tests;

pub use crate::config::Config;
pub use crate::error::{BotError, Result};
