//! Webcam hand gestures mapped to live audio control.
//!
//! A [`session::SessionController`] owns one audio graph and one frame
//! source. Each frame's detected hands go through the landmark classifier
//! ([`gesture`]) and the parameter mapper ([`mapping`]) and end up as
//! parameter writes on an [`audio::AudioEngine`].

pub mod audio;
pub mod config;
pub mod gesture;
pub mod mapping;
pub mod overlay;
pub mod pipeline;
pub mod session;
pub mod types;
