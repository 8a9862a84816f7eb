//! Shared UI icons.
//!
//! Each icon has a plain-text fallback for terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static RESUMED: Emoji<'_, '_> = Emoji("↪️  ", "[RESUMED]");

// Failure shapes
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static KILLED: Emoji<'_, '_> = Emoji("💀 ", "[KILL]");

// Run structure
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static GROUP: Emoji<'_, '_> = Emoji("🔀 ", "[G]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
