pub mod listener;
pub mod peer;
