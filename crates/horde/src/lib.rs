//! HTTP clients for the Horde image service and the video service.
//!
//! [`api::HordeApi`] and [`video::VideoApi`] talk to the services;
//! [`service::GenerationService`] and [`video::VideoService`] are the seams
//! the engine depends on.

pub mod api;
pub mod service;
pub mod video;

pub use api::{HordeApi, HordeApiError};
pub use service::GenerationService;
pub use video::{VideoApi, VideoService};
