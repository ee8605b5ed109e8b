pub mod dedup;
pub mod relay;
