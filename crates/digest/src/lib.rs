//! SecDigest Publication
//!
//! Turns summarized, relevant records into the dated markdown archive and
//! an unsent e-mail draft.

pub mod publish;
pub mod render;

pub use publish::{select_records, share_results, Published, ShareOptions};
pub use render::{render_digest, Digest};
