pub mod api;
pub mod attendance;
pub mod config;
pub mod dashboard;
pub mod envelope;
pub mod error;
pub mod list;
pub mod model;
pub mod mutation;
pub mod query;
pub mod session;

pub use api::ApiClient;
pub use error::ApiError;
pub use list::ListResource;
pub use session::AuthSession;
