// Boot Parameter Block decoding for FAT volumes.
// All derived geometry comes from the accessors here; callers never
// recompute it.

use std::fmt;
use strata_core::{StrataError, BLOCK_SIZE};

// Boot sector field offsets
const BS_JMP_BOOT: usize = 0x00;
const BS_OEM_NAME: usize = 0x03;
const BPB_BYTES_PER_SEC: usize = 0x0B;
const BPB_SEC_PER_CLUS: usize = 0x0D;
const BPB_RSVD_SEC_CNT: usize = 0x0E;
const BPB_NUM_FATS: usize = 0x10;
const BPB_ROOT_ENT_CNT: usize = 0x11;
const BPB_TOT_SEC16: usize = 0x13;
const BPB_MEDIA: usize = 0x15;
const BPB_FAT_SZ16: usize = 0x16;
const BPB_SEC_PER_TRK: usize = 0x18;
const BPB_NUM_HEADS: usize = 0x1A;
const BPB_HIDD_SEC: usize = 0x1C;
const BPB_TOT_SEC32: usize = 0x20;
const BOOT_SIGNATURE_OFFSET: usize = 0x1FE;

// Cluster count thresholds separating the FAT variants
pub const FAT12_MAX_CLUSTERS: u32 = 4084;
pub const FAT16_MAX_CLUSTERS: u32 = 65524;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
}

impl fmt::Display for FatVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatVariant::Fat12 => write!(f, "fat12"),
            FatVariant::Fat16 => write!(f, "fat16"),
            FatVariant::Fat32 => write!(f, "fat32"),
        }
    }
}

/// The BPB fields at sector 0, decoded field by field. The on-disk layout
/// is little-endian with 1-byte alignment; nothing here depends on native
/// struct layout.
#[derive(Debug, Clone)]
pub struct BiosParameterBlock {
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_count: u16,
    pub total_sectors_small: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub num_heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_large: u32,
}

impl BiosParameterBlock {
    /// Decode and validate the boot sector.
    pub fn parse(sector: &[u8]) -> Result<Self, StrataError> {
        if sector.len() < BLOCK_SIZE {
            return Err(StrataError::CorruptSuperblock(format!(
                "boot sector is {} bytes, expected {}",
                sector.len(),
                BLOCK_SIZE
            )));
        }

        let mut oem_name = [0u8; 8];
        oem_name.copy_from_slice(&sector[BS_OEM_NAME..BS_OEM_NAME + 8]);

        let bpb = Self {
            oem_name,
            bytes_per_sector: read_u16(sector, BPB_BYTES_PER_SEC),
            sectors_per_cluster: sector[BPB_SEC_PER_CLUS],
            reserved_sectors: read_u16(sector, BPB_RSVD_SEC_CNT),
            fat_count: sector[BPB_NUM_FATS],
            root_count: read_u16(sector, BPB_ROOT_ENT_CNT),
            total_sectors_small: read_u16(sector, BPB_TOT_SEC16),
            media_descriptor: sector[BPB_MEDIA],
            sectors_per_fat: read_u16(sector, BPB_FAT_SZ16),
            sectors_per_track: read_u16(sector, BPB_SEC_PER_TRK),
            num_heads: read_u16(sector, BPB_NUM_HEADS),
            hidden_sectors: read_u32(sector, BPB_HIDD_SEC),
            total_sectors_large: read_u32(sector, BPB_TOT_SEC32),
        };
        bpb.validate()?;
        Ok(bpb)
    }

    fn validate(&self) -> Result<(), StrataError> {
        if self.bytes_per_sector as usize != BLOCK_SIZE {
            return Err(StrataError::CorruptSuperblock(format!(
                "bytes per sector is {}, only {} is supported",
                self.bytes_per_sector, BLOCK_SIZE
            )));
        }
        if !self.sectors_per_cluster.is_power_of_two() {
            return Err(StrataError::CorruptSuperblock(format!(
                "sectors per cluster {} is not a power of two in 1..=128",
                self.sectors_per_cluster
            )));
        }
        if self.fat_count == 0 {
            return Err(StrataError::CorruptSuperblock(
                "FAT count cannot be zero".to_string(),
            ));
        }
        if self.total_sectors() == 0 {
            return Err(StrataError::CorruptSuperblock(
                "total sector count is zero".to_string(),
            ));
        }
        let metadata = self.first_data_sector() + self.root_sectors();
        if self.sectors_per_fat != 0 && self.total_sectors() <= metadata {
            return Err(StrataError::CorruptSuperblock(format!(
                "{} total sectors leave no room after {} metadata sectors",
                self.total_sectors(),
                metadata
            )));
        }
        Ok(())
    }

    /// Serialize into a bootable sector image.
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut sector = [0u8; BLOCK_SIZE];
        sector[BS_JMP_BOOT..BS_JMP_BOOT + 3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        sector[BS_OEM_NAME..BS_OEM_NAME + 8].copy_from_slice(&self.oem_name);
        write_u16(&mut sector, BPB_BYTES_PER_SEC, self.bytes_per_sector);
        sector[BPB_SEC_PER_CLUS] = self.sectors_per_cluster;
        write_u16(&mut sector, BPB_RSVD_SEC_CNT, self.reserved_sectors);
        sector[BPB_NUM_FATS] = self.fat_count;
        write_u16(&mut sector, BPB_ROOT_ENT_CNT, self.root_count);
        write_u16(&mut sector, BPB_TOT_SEC16, self.total_sectors_small);
        sector[BPB_MEDIA] = self.media_descriptor;
        write_u16(&mut sector, BPB_FAT_SZ16, self.sectors_per_fat);
        write_u16(&mut sector, BPB_SEC_PER_TRK, self.sectors_per_track);
        write_u16(&mut sector, BPB_NUM_HEADS, self.num_heads);
        write_u32(&mut sector, BPB_HIDD_SEC, self.hidden_sectors);
        write_u32(&mut sector, BPB_TOT_SEC32, self.total_sectors_large);
        sector[BOOT_SIGNATURE_OFFSET] = 0x55;
        sector[BOOT_SIGNATURE_OFFSET + 1] = 0xAA;
        sector
    }

    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_small != 0 {
            self.total_sectors_small as u32
        } else {
            self.total_sectors_large
        }
    }

    /// Bytes per allocation unit.
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// Sectors occupied by the fixed FAT12/16 root directory.
    pub fn root_sectors(&self) -> u32 {
        let bytes = self.root_count as u32 * 32;
        (bytes + self.bytes_per_sector as u32 - 1) / self.bytes_per_sector as u32
    }

    /// First sector after the reserved area and the FAT copies. The root
    /// directory starts here; data clusters follow it.
    pub fn first_data_sector(&self) -> u32 {
        self.reserved_sectors as u32 + self.fat_count as u32 * self.sectors_per_fat as u32
    }

    /// Number of data clusters on the volume.
    pub fn num_clusters(&self) -> u32 {
        let data_sectors = self
            .total_sectors()
            .saturating_sub(self.first_data_sector())
            .saturating_sub(self.root_sectors());
        data_sectors / self.sectors_per_cluster as u32
    }

    pub fn variant(&self) -> FatVariant {
        // A zero 16-bit FAT size means the real value lives in the FAT32
        // extended BPB.
        if self.sectors_per_fat == 0 {
            return FatVariant::Fat32;
        }
        match self.num_clusters() {
            n if n <= FAT12_MAX_CLUSTERS => FatVariant::Fat12,
            n if n <= FAT16_MAX_CLUSTERS => FatVariant::Fat16,
            _ => FatVariant::Fat32,
        }
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
