pub mod model;
pub mod service;

pub use model::{CatalogQuery, Pagination, SyncOwner, Timeframe, VideoRecord};
pub use service::{FetchRequest, SyncOutcome, VideoService};
