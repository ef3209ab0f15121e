//! Cross-module tests driven by an in-memory backend.

mod mock;
