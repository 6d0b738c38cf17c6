//! Domain logic for the Horde batch client.
//!
//! Request and job models, prompt-matrix expansion, batch planning, the
//! model catalog, kudos estimation, and the status reducer. Nothing in
//! this crate performs I/O.

pub mod error;
pub mod history;
pub mod job;
pub mod kudos;
pub mod models;
pub mod planner;
pub mod prompt_matrix;
pub mod record;
pub mod request;
pub mod seed;
pub mod status;
pub mod types;
pub mod video;
