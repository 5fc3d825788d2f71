pub mod maintenance;
pub mod ownership_service;
pub mod timeline_service;

#[cfg(test)]
mod memory_store;
