pub mod bake;
pub mod bake_service;
pub mod dsl;
pub mod eval;
pub mod graph;
pub mod image_store;
pub mod jobs;
pub mod material_writer;
pub mod schema;
pub mod settings;
