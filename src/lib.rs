// Library root: exposes the components for integration tests and for
// front-ends other than the bundled console. The binary entry point is
// src/main.rs.

pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod llm;
pub mod logger;
pub mod store;
