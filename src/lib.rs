//! Shortcut Scout - keyboard shortcut discovery for macOS
//!
//! This library watches global key presses through a listen-only event tap,
//! walks application menu trees over the Accessibility API, and folds both
//! into a deduplicated catalog of shortcut bindings partitioned by scope
//! (system-wide vs. per application).

pub mod catalog;
pub mod config;
pub mod error;
pub mod formatter;
pub mod frontmost_tracker;
pub mod key_monitor;
pub mod logging;
pub mod menu_scanner;
pub mod registry;
pub mod system_shortcuts;

pub use catalog::{Scope, ShortcutRecord};
pub use registry::ShortcutScout;
