pub mod config;
pub mod db;
pub mod fetch;
pub mod health;
pub mod normalize;
pub mod sink;
pub mod watermark;
