pub mod assume_fps;
pub mod crop;
pub mod prefetch;
pub mod preview;
pub mod trim;
