//! Tomovox - a volumetric editing and surface-extraction engine

pub mod core;
pub mod volume;
pub mod connect;
pub mod morph;
pub mod edit;
pub mod surface;
pub mod io;
pub mod jobs;
