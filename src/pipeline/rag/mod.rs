pub mod quality;

pub use quality::*;
