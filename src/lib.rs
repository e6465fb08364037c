pub mod archive;
pub mod config;
pub mod gesture;
pub mod layout;
pub mod library;
pub mod loader;
pub mod natsort;
pub mod physics;
pub mod pool;
pub mod progress;
pub mod render;
pub mod session;
pub mod watch;
pub mod window;
