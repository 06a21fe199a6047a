pub mod config;
pub mod logout;
pub mod serve;
