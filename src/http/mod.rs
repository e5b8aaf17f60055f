pub mod request;
pub mod response;
pub mod server;

pub use request::{parse_params, Request};
pub use response::Response;
pub use server::Server;
