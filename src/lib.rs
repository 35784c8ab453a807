//! Synthetic question generation for symbolic scenes.
//!
//! Scenes are sets of objects with categorical attributes plus pairwise
//! spatial relationships. Question templates declare abstract node
//! sequences, typed parameters, constraints, and text surface forms; the
//! search in [`search`] expands a template over a scene depth-first into
//! concrete, valid, executable programs, balancing the answer distribution
//! by rejection sampling. [`realize`] turns accepted programs into question
//! text, and [`session`] drives the whole scene stream into an output
//! dataset.

pub mod error;
pub mod eval;
pub mod index;
pub mod listops;
pub mod program;
pub mod realize;
pub mod scene;
pub mod search;
pub mod session;
pub mod template;
