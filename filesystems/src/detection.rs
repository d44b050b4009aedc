// Filesystem detection for the driver registry.

use crate::fat::bpb::BiosParameterBlock;
use log::debug;
use strata_core::{DriverDetector, Partition, StrataError, BLOCK_SIZE};

/// Recognizes FAT volumes from BPB sanity and the cluster count, naming
/// the variant ("fat12", "fat16", "fat32") for the registry to resolve.
pub struct FatDetector;

impl DriverDetector for FatDetector {
    fn detect(&self, partition: &mut Partition) -> Result<Option<String>, StrataError> {
        let mut sector = [0u8; BLOCK_SIZE];
        partition.read_blocks(&mut sector, 0, 1)?;
        match BiosParameterBlock::parse(&sector) {
            Ok(bpb) => {
                let variant = bpb.variant();
                debug!("detected {} volume ({} clusters)", variant, bpb.num_clusters());
                Ok(Some(variant.to_string()))
            }
            Err(_) => Ok(None),
        }
    }

    fn priority(&self) -> i32 {
        10
    }
}
