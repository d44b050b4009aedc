pub mod device;
pub mod error;
pub mod filesystem;
pub mod partition;
pub mod registry;

pub use device::{BlockDevice, FileImage, BLOCK_SIZE};
pub use error::StrataError;
pub use filesystem::{DirEntry, FileStat, FilesystemDriver, Inode, ROOT_INODE, S_DIR};
pub use partition::{Partition, PartitionEntry, PartitionTable};
pub use registry::{DriverDetector, DriverRegistry};
