pub mod node;
pub mod link;
pub mod time;
pub mod view;
pub mod vault;
pub mod config;

pub use node::*;
pub use link::*;
pub use time::*;
pub use view::*;
pub use vault::*;
pub use config::*;
