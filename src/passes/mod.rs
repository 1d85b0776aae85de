//! Processing passes, run in order by [`crate::NoteDetector`]

pub mod pass_0;
pub mod pass_1;
pub mod pass_2;
pub mod pass_3;
pub mod pass_4;
