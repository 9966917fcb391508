//! Skill manifest parsing and discovery (Manifest Reader, spec §4.1).

pub mod discovery;
pub mod metadata;

pub use metadata::{parse_skill_metadata, SkillMetadata};
