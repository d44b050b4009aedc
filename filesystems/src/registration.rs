// Wires the built-in drivers into a registry.

use crate::detection::FatDetector;
use crate::fat::FatFilesystem;
use strata_core::{DriverRegistry, FilesystemDriver};

/// Register every driver this crate ships, plus its detectors.
///
/// Only FAT12 has a driver today; detected FAT16/32 volumes resolve to a
/// type name with no registered factory and mount as `Unsupported`.
pub fn register_builtin_drivers(registry: &mut DriverRegistry) {
    registry.register_driver("fat12", |partition| {
        let fs = FatFilesystem::load(partition)?;
        Ok(Box::new(fs) as Box<dyn FilesystemDriver>)
    });
    registry.register_detector(Box::new(FatDetector));
}
