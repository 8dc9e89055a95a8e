pub mod audio;
pub mod config;
pub mod dataset;
pub mod detection;
pub mod encode;
pub mod error;
pub mod pipeline;
pub mod video;
