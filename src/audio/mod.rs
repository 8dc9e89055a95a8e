pub mod decode;
pub mod features;
pub mod mel;
pub mod params;
pub mod stft;
