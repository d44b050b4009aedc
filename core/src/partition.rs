// MBR partition table view over a block device.
// Only the reading side is provided; creating partition tables is the job
// of external tooling.

use crate::device::{BlockDevice, BLOCK_SIZE};
use crate::StrataError;
use serde::{Deserialize, Serialize};

const PARTITION_TABLE_OFFSET: usize = 446;
const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// One of the four primary MBR partition slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub bootable: bool,
    pub partition_type: u8,
    pub start_lba: u32,
    pub total_sectors: u32,
}

/// The decoded MBR partition table.
pub struct PartitionTable {
    pub entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Read and decode the partition table at block 0. Empty slots
    /// (type 0) are skipped.
    pub fn read(device: &mut dyn BlockDevice) -> Result<Self, StrataError> {
        let mut mbr = [0u8; BLOCK_SIZE];
        device.read_blocks(&mut mbr, 0, 1)?;
        if mbr[510..512] != MBR_SIGNATURE {
            return Err(StrataError::InvalidArgument(
                "missing 0x55AA boot signature".to_string(),
            ));
        }

        let mut entries = Vec::new();
        for slot in 0..4 {
            let off = PARTITION_TABLE_OFFSET + slot * 16;
            let partition_type = mbr[off + 4];
            if partition_type == 0 {
                continue;
            }
            entries.push(PartitionEntry {
                bootable: mbr[off] == 0x80,
                partition_type,
                start_lba: u32::from_le_bytes([
                    mbr[off + 8],
                    mbr[off + 9],
                    mbr[off + 10],
                    mbr[off + 11],
                ]),
                total_sectors: u32::from_le_bytes([
                    mbr[off + 12],
                    mbr[off + 13],
                    mbr[off + 14],
                    mbr[off + 15],
                ]),
            });
        }
        Ok(Self { entries })
    }
}

/// A bounds-checked block window over one partition of a device.
///
/// All sector addresses are relative to the partition start. The partition
/// owns the device; a mount owns the partition.
pub struct Partition {
    device: Box<dyn BlockDevice>,
    start: u64,
    len: u64,
}

impl Partition {
    pub fn new(device: Box<dyn BlockDevice>, entry: &PartitionEntry) -> Result<Self, StrataError> {
        let start = entry.start_lba as u64;
        let len = entry.total_sectors as u64;
        if start + len > device.total_blocks() {
            return Err(StrataError::InvalidArgument(format!(
                "partition {}..{} extends past the end of the device",
                start,
                start + len
            )));
        }
        Ok(Self { device, start, len })
    }

    /// Treat an unpartitioned device as a single partition.
    pub fn whole_disk(device: Box<dyn BlockDevice>) -> Self {
        let len = device.total_blocks();
        Self { device, start: 0, len }
    }

    pub fn total_sectors(&self) -> u64 {
        self.len
    }

    pub fn read_blocks(
        &mut self,
        buf: &mut [u8],
        start_sector: u64,
        count: usize,
    ) -> Result<(), StrataError> {
        self.check_window(start_sector, count)?;
        self.device.read_blocks(buf, self.start + start_sector, count)
    }

    pub fn write_blocks(
        &mut self,
        buf: &[u8],
        start_sector: u64,
        count: usize,
    ) -> Result<(), StrataError> {
        self.check_window(start_sector, count)?;
        self.device.write_blocks(buf, self.start + start_sector, count)
    }

    fn check_window(&self, start_sector: u64, count: usize) -> Result<(), StrataError> {
        if start_sector + count as u64 > self.len {
            return Err(StrataError::InvalidArgument(format!(
                "sectors {}..{} are outside a partition of {} sectors",
                start_sector,
                start_sector + count as u64,
                self.len
            )));
        }
        Ok(())
    }
}
