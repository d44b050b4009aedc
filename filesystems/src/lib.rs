pub mod detection;
pub mod fat;
pub mod registration;

pub use detection::FatDetector;
pub use fat::FatFilesystem;
pub use registration::register_builtin_drivers;
