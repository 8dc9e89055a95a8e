pub mod detect;
pub mod record;
pub mod region;
