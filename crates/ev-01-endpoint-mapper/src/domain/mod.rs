pub mod config;
pub mod ept_map;
pub mod tower;
