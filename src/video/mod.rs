pub mod crop;
pub mod source;
