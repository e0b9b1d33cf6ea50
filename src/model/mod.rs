pub mod config;
pub mod ids;
pub mod list;
pub mod store;
pub mod tag;
pub mod task;

pub use config::*;
pub use ids::*;
pub use list::*;
pub use store::*;
pub use tag::*;
pub use task::*;
