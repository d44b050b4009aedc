// Driver registry
// The dispatcher that picks a filesystem driver for a partition, either by
// an explicitly named type or by running the registered detectors.

use crate::filesystem::FilesystemDriver;
use crate::partition::Partition;
use crate::StrataError;
use std::collections::HashMap;

/// Identifies the filesystem type on a partition.
pub trait DriverDetector: Send + Sync {
    /// Returns the filesystem type name if recognized, `None` otherwise.
    fn detect(&self, partition: &mut Partition) -> Result<Option<String>, StrataError>;

    /// Higher priority detectors run first.
    fn priority(&self) -> i32 {
        0
    }
}

type DriverFactory = Box<dyn Fn(Partition) -> Result<Box<dyn FilesystemDriver>, StrataError>>;

/// Registry of filesystem driver factories and detectors.
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
    detectors: Vec<Box<dyn DriverDetector>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            detectors: Vec::new(),
        }
    }

    /// Register a driver factory for a filesystem type name.
    pub fn register_driver<F>(&mut self, fs_type: &str, factory: F)
    where
        F: Fn(Partition) -> Result<Box<dyn FilesystemDriver>, StrataError> + 'static,
    {
        self.factories.insert(fs_type.to_string(), Box::new(factory));
    }

    pub fn register_detector(&mut self, detector: Box<dyn DriverDetector>) {
        self.detectors.push(detector);
        self.detectors.sort_by_key(|d| -d.priority());
    }

    /// Mount a driver on `partition`. With `fs_type` given, that driver is
    /// used directly; otherwise the detectors decide.
    pub fn create_driver(
        &self,
        mut partition: Partition,
        fs_type: Option<&str>,
    ) -> Result<Box<dyn FilesystemDriver>, StrataError> {
        if let Some(fs_type) = fs_type {
            if let Some(factory) = self.factories.get(fs_type) {
                return factory(partition);
            }
            return Err(StrataError::Unsupported(format!(
                "no driver for filesystem type '{}'",
                fs_type
            )));
        }

        for detector in &self.detectors {
            if let Some(detected) = detector.detect(&mut partition)? {
                return match self.factories.get(&detected) {
                    Some(factory) => factory(partition),
                    None => Err(StrataError::Unsupported(format!(
                        "detected a {} volume but no {} driver is registered",
                        detected, detected
                    ))),
                };
            }
        }

        Err(StrataError::Unsupported(
            "could not detect the filesystem type".to_string(),
        ))
    }

    /// Filesystem type names with a registered driver.
    pub fn supported_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
