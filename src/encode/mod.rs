pub mod ffmpeg;
pub mod npz;
