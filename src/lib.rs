//! embodied-eval: vision-language model evaluation on EmbodiedBench
//!
//! Runs a VLM through the EB-ALFRED, EB-Habitat, EB-Navigation and
//! EB-Manipulation environments, turning its free-form replies into
//! executable actions and recording every decision, frame and video.

pub mod agent;
pub mod config;
pub mod env;
pub mod episode;
pub mod model;
pub mod response;

#[cfg(test)]
pub(crate) mod testing;
