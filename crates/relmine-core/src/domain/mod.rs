//! Domain layer
//!
//! Contains the mining components and the collaborator seams they use.

pub mod changes;
pub mod knowledge;
pub mod sources;
