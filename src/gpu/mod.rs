pub mod context;
pub mod layout;
pub mod pass_graph;
pub mod pipeline;
pub mod readback;
pub mod renderer;
pub mod scene_buffers;
pub mod sort;
pub mod target;
pub mod timer;
