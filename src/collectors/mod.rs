pub mod cpu;
pub mod gpu;
pub mod host;
pub mod memory;
