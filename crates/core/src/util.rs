pub mod rng;
pub mod time_source;
