// Kernel services built on the process core
pub mod process_service;
