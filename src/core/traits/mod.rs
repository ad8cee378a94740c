pub mod comparator;
pub mod ids;
pub mod store;
pub mod tool;
