pub mod dataset;
pub mod map_file;
pub mod position;
