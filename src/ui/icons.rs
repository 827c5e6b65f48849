//! Status icons shared by the renderers.

use console::Emoji;

use crate::display::GroupStatus;
use crate::progress::CodebaseStatus;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static WAITING: Emoji<'_, '_> = Emoji("⏳ ", "[..]");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
pub static SNAPSHOT: Emoji<'_, '_> = Emoji("📁 ", "[SNAP]");
pub static DOCUMENT: Emoji<'_, '_> = Emoji("📄 ", "+");

pub fn codebase_icon(status: CodebaseStatus) -> &'static Emoji<'static, 'static> {
    match status {
        CodebaseStatus::Initializing => &WAITING,
        CodebaseStatus::Processing => &RUNNING,
        CodebaseStatus::Completed => &CHECK,
        CodebaseStatus::Error => &CROSS,
    }
}

pub fn group_icon(status: GroupStatus) -> &'static Emoji<'static, 'static> {
    match status {
        GroupStatus::Running => &RUNNING,
        GroupStatus::Completed => &CHECK,
    }
}
