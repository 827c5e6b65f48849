pub mod icons;
pub mod progress;

pub use progress::{GenerationUi, ProgressLine, UiMode, summary_groups};
