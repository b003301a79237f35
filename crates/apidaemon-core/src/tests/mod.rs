//! Test module for apidaemon-core
//!
//! Covers configuration loading and validation, and building the plugin
//! registry from config entries including method resolution.

mod fixtures;
