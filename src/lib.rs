pub mod allocator;
pub mod auth;
pub mod blend;
pub mod canvas;
pub mod config;
pub mod dao;
pub mod error;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod poster;
pub mod qr;
pub mod routes;
pub mod share;
pub mod utils;
