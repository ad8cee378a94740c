/// Native module contains implementations of core traits backed by the
/// local filesystem and external processes.
pub mod comparator;
pub mod ids;
pub mod store;
pub mod tools;
