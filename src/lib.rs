//! Voice model management for AI song covers: ingesting model packages from
//! links or uploads into a local store, browsing the public model index, and
//! handing installed models to the cover generation pipeline.

pub mod catalog;
pub mod core;
pub mod models;
pub mod pipeline;
