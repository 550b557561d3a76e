pub mod edges;
pub mod indicator;
