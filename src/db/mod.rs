pub mod pool;
pub mod repository;
pub mod schema;

pub use pool::create_pool;
pub use repository::{JobFilter, Repository, SyncJobFilter};
pub use schema::migrate;
