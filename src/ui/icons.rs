//! Shared UI icons.

use console::Emoji;

// Task outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[FAIL]");
pub static CRASH: Emoji<'_, '_> = Emoji("💥 ", "[CRASH]");

// Run indicators
pub static MOON: Emoji<'_, '_> = Emoji("🌙 ", "");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[STOP]");
pub static REPORT: Emoji<'_, '_> = Emoji("📄 ", "");
