//! Work done on finished captures: remuxing and user scripts

pub mod queue;
pub mod tasks;

pub use queue::PostProcessingQueue;
pub use tasks::{run_script, script_args, segment_files, transcode_to_mp4, PostTask};
