pub mod metadata;
pub mod publisher;
pub mod routes;
pub mod server;
