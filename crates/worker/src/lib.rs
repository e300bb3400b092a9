pub mod digest;
pub mod sweep;
