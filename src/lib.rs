pub mod admission;
pub mod client;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod logging;
pub mod postproc;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use error::{ReadError, ServerError, StoreError};
pub use server::{Server, ServerContext};

