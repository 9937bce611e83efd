//! Record models
//!
//! Persisted entities for SecDigest

mod paper;

pub use paper::{
    DependentField,
    PaperPatch,
    PaperRecord,
    Summary,
    Tag,
    DEFAULT_EMOJI,
    DEFAULT_INTEREST_SCORE,
};
