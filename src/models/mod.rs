//! Data models for the snowball crawler.

mod community;
mod edge;
mod frontier;
mod moderator;

pub use community::{
    collapse_text, normalize_name, AcquisitionStatus, Community, CommunityMetadata,
    ModeratorRoleStatus, SEARCHABLE_FIELDS,
};
pub use edge::Edge;
pub use frontier::{EdgeKind, FrontierCounts, FrontierEntry, ProcessedState};
pub use moderator::{AccountStatus, ModeratorAccount};
