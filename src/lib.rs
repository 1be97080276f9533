pub mod error;
pub mod maths;
pub mod gaussian;
pub mod loader;
pub mod gpu;
pub mod camera;
pub mod viewpoints;
pub mod settings;
pub mod render_job;
pub mod cli;
