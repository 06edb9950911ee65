pub mod exchange;
pub mod serve;
pub mod setup;
