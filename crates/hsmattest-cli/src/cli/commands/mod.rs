pub mod config_path;
pub mod dispatch;
pub mod inspect;
pub mod normalize;
pub mod parse;

pub use dispatch::dispatch;
