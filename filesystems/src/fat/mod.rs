// FAT12 filesystem driver.
//
// The mount owns the partition, the decoded BPB, one in-memory copy of the
// FAT, and the inode arena. FAT mutations stay in memory until sync/close
// writes every on-disk copy back; directory and file data go to disk
// synchronously per operation.

pub mod bpb;
pub mod dir;
pub mod inode;
mod ops;
pub mod table;
pub mod timestamps;

use bpb::{BiosParameterBlock, FatVariant};
use dir::DIR_ENTRY_SIZE;
use inode::InodeTable;
use log::{info, warn};
use strata_core::{Inode, Partition, StrataError, BLOCK_SIZE, ROOT_INODE};
use table::FatTable;

pub struct FatFilesystem {
    partition: Partition,
    bpb: BiosParameterBlock,
    fat: FatTable,
    inodes: InodeTable,
}

impl FatFilesystem {
    /// Mount an existing FAT12 volume.
    pub fn load(mut partition: Partition) -> Result<Self, StrataError> {
        let mut sector = [0u8; BLOCK_SIZE];
        partition.read_blocks(&mut sector, 0, 1)?;
        let bpb = BiosParameterBlock::parse(&sector)?;

        let variant = bpb.variant();
        if variant != FatVariant::Fat12 {
            return Err(StrataError::Unsupported(format!(
                "{} volumes are not supported",
                variant
            )));
        }

        let num_clusters = bpb.num_clusters();
        let mut fat_buf = vec![0u8; bpb.sectors_per_fat as usize * BLOCK_SIZE];
        partition.read_blocks(&mut fat_buf, bpb.reserved_sectors as u64, bpb.sectors_per_fat as usize)?;
        check_fat_coverage(num_clusters, fat_buf.len())?;

        let fat = FatTable::new(fat_buf, num_clusters);
        if fat.read_entry(0) != 0xF00 | bpb.media_descriptor as u32 {
            warn!(
                "FAT entry 0 is {:#05X}, expected {:#05X} for media descriptor {:#04X}",
                fat.read_entry(0),
                0xF00 | bpb.media_descriptor as u32,
                bpb.media_descriptor
            );
        }

        info!(
            "Mounted FAT12 volume: {} clusters of {} bytes, {} root entries, {} FAT copies",
            num_clusters,
            bpb.cluster_size(),
            bpb.root_count,
            bpb.fat_count
        );

        Ok(Self {
            partition,
            bpb,
            fat,
            inodes: InodeTable::new(),
        })
    }

    /// Format the partition as FAT12 and mount the fresh volume.
    ///
    /// Volumes large enough to need FAT16 or FAT32 are rejected.
    pub fn format(mut partition: Partition) -> Result<Self, StrataError> {
        let total = partition.total_sectors();
        let volume_bytes = total * BLOCK_SIZE as u64;
        // 16 MiB is where FAT12 runs out of clusters
        if volume_bytes >= 0x0100_0000 {
            return Err(StrataError::Unsupported(
                "volume size requires FAT16 or FAT32".to_string(),
            ));
        }
        let num_sectors = total as u32;

        let large_volume = volume_bytes > 0x40_0000; // 4 MiB
        let mut bpb = BiosParameterBlock {
            oem_name: *b"mkdosfs ",
            bytes_per_sector: BLOCK_SIZE as u16,
            sectors_per_cluster: 8,
            reserved_sectors: 4,
            fat_count: 2,
            root_count: if large_volume { 512 } else { 240 },
            total_sectors_small: if num_sectors > 65535 { 0 } else { num_sectors as u16 },
            media_descriptor: if large_volume { 0xF8 } else { 0xF0 },
            sectors_per_fat: 0,
            sectors_per_track: 32,
            num_heads: 64,
            hidden_sectors: 0,
            total_sectors_large: if num_sectors > 65535 { num_sectors } else { 0 },
        };

        // Twelve-bit entries per FAT sector
        let entries_per_sector = (BLOCK_SIZE as u32 * 8) / 12;
        let fat_entries = (num_sectors / bpb.sectors_per_cluster as u32)
            .checked_sub(bpb.reserved_sectors as u32)
            .filter(|&entries| entries > 0)
            .ok_or_else(|| {
                StrataError::InvalidArgument(format!(
                    "{} sectors is too small for a FAT12 volume",
                    num_sectors
                ))
            })?;
        bpb.sectors_per_fat =
            ((fat_entries + entries_per_sector - 1) / entries_per_sector) as u16;

        let num_clusters = bpb.num_clusters();
        if num_clusters == 0 {
            return Err(StrataError::InvalidArgument(format!(
                "{} sectors leave no data clusters",
                num_sectors
            )));
        }
        // The byte-size gate above is only a first cut; the derived cluster
        // count is what actually decides the variant, and load refuses
        // anything but FAT12.
        let variant = bpb.variant();
        if variant != FatVariant::Fat12 {
            return Err(StrataError::Unsupported(format!(
                "{} clusters would make a {} volume",
                num_clusters, variant
            )));
        }
        let fat_buf = vec![0u8; bpb.sectors_per_fat as usize * BLOCK_SIZE];
        check_fat_coverage(num_clusters, fat_buf.len())?;

        let mut fat = FatTable::new(fat_buf, num_clusters);
        fat.write_entry(0, 0xF00 | bpb.media_descriptor as u32);
        fat.write_entry(1, 0xFFF);

        partition.write_blocks(&bpb.encode(), 0, 1)?;

        // A reformatted image must start with an empty root directory
        let root_sectors = bpb.root_sectors() as usize;
        let zeros = vec![0u8; root_sectors * BLOCK_SIZE];
        partition.write_blocks(&zeros, bpb.first_data_sector() as u64, root_sectors)?;

        info!(
            "Formatted FAT12 volume: {} sectors, {} clusters of {} bytes, {} sectors per FAT",
            num_sectors,
            num_clusters,
            bpb.cluster_size(),
            bpb.sectors_per_fat
        );

        Ok(Self {
            partition,
            bpb,
            fat,
            inodes: InodeTable::new(),
        })
    }

    /// Write the in-memory FAT back to every on-disk copy.
    pub fn sync(&mut self) -> Result<(), StrataError> {
        let sectors = self.bpb.sectors_per_fat as usize;
        let mut offset = self.bpb.reserved_sectors as u64;
        for _ in 0..self.bpb.fat_count {
            self.partition.write_blocks(self.fat.data(), offset, sectors)?;
            offset += sectors as u64;
        }
        self.fat.mark_clean();
        Ok(())
    }

    /// Flush the FAT copies and tear down the mount.
    pub fn close(mut self) -> Result<(), StrataError> {
        self.sync()
    }

    pub fn bpb(&self) -> &BiosParameterBlock {
        &self.bpb
    }

    fn cluster_size(&self) -> u32 {
        self.bpb.cluster_size()
    }

    /// Read `count` whole clusters starting at `cluster` into `buf`.
    ///
    /// Values below 2 are logical root-directory positions, not FAT
    /// entries: cluster 0 starts at the first root sector.
    fn read_clusters(&mut self, buf: &mut [u8], cluster: u32, count: u32) -> Result<(), StrataError> {
        let (start, sectors) = self.cluster_span(cluster, count);
        self.partition.read_blocks(buf, start, sectors)
    }

    /// Write `count` whole clusters starting at `cluster` from `buf`.
    fn write_clusters(&mut self, buf: &[u8], cluster: u32, count: u32) -> Result<(), StrataError> {
        let (start, sectors) = self.cluster_span(cluster, count);
        self.partition.write_blocks(buf, start, sectors)
    }

    fn cluster_span(&self, cluster: u32, count: u32) -> (u64, usize) {
        let spc = self.bpb.sectors_per_cluster as u32;
        let mut start = self.bpb.first_data_sector();
        if cluster >= 2 {
            start += self.bpb.root_sectors() + (cluster - 2) * spc;
        } else {
            start += cluster * spc;
        }
        (start as u64, (count * spc) as usize)
    }

    /// Clusters occupied by the FAT12/16 root directory.
    fn root_cluster_count(&self) -> u32 {
        let bytes = self.bpb.root_count as u32 * DIR_ENTRY_SIZE as u32;
        (bytes + self.cluster_size() - 1) / self.cluster_size()
    }

    /// The cluster list backing `ino`: logical root positions for the root
    /// directory, the FAT chain otherwise.
    fn cluster_list(&self, ino: Inode) -> Result<Vec<u32>, StrataError> {
        if ino == ROOT_INODE {
            return Ok((0..self.root_cluster_count()).collect());
        }
        let inode = self
            .inodes
            .get(ino)
            .ok_or_else(|| StrataError::NotFound(format!("inode {}", ino)))?;
        if inode.first_cluster < 2 {
            // Entries from foreign images may carry no storage at all
            return Ok(Vec::new());
        }
        self.fat.chain(inode.first_cluster)
    }
}

impl Drop for FatFilesystem {
    fn drop(&mut self) {
        if self.fat.is_dirty() {
            if let Err(err) = self.sync() {
                warn!("failed to flush FAT copies on drop: {}", err);
            }
        }
    }
}

fn check_fat_coverage(num_clusters: u32, fat_len: usize) -> Result<(), StrataError> {
    let required = num_clusters as usize + num_clusters as usize / 2 + 2;
    if fat_len < required {
        return Err(StrataError::CorruptSuperblock(format!(
            "FAT of {} bytes cannot index {} clusters",
            fat_len, num_clusters
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use strata_core::{BlockDevice, FileImage, FileStat, FilesystemDriver};

    const IMAGE_SECTORS: u64 = 8192; // 4 MiB

    fn fresh_volume(dir: &tempfile::TempDir) -> FatFilesystem {
        let image = FileImage::create(dir.path().join("vol.img"), IMAGE_SECTORS).unwrap();
        FatFilesystem::format(Partition::whole_disk(Box::new(image))).unwrap()
    }

    fn stat_of(size: u64) -> FileStat {
        FileStat {
            size,
            mode: 0o644,
            atime: 1_700_000_000,
            ctime: 1_700_000_000,
            mtime: 1_700_000_000,
        }
    }

    #[test]
    fn test_format_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let fs = fresh_volume(&dir);
        assert_eq!(fs.bpb().sectors_per_fat, 3);
        assert_eq!(fs.bpb().first_data_sector(), 10);
        assert_eq!(fs.bpb().root_sectors(), 15);
        assert_eq!(fs.bpb().num_clusters(), 1020);
        assert_eq!(fs.bpb().variant(), FatVariant::Fat12);
        assert_eq!(fs.fat.read_entry(0), 0xFF0);
        assert_eq!(fs.fat.read_entry(1), 0xFFF);
    }

    #[test]
    fn test_chain_length_matches_declared_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = fresh_volume(&dir);
        let cluster_size = fs.cluster_size() as u64;

        for size in [0, 1, cluster_size - 1, cluster_size, cluster_size + 1, 3 * cluster_size] {
            let ino = fs.touch(&stat_of(size)).unwrap();
            let expected = ((size + cluster_size - 1) / cluster_size).max(1) as usize;
            assert_eq!(
                fs.cluster_list(ino).unwrap().len(),
                expected,
                "size {}",
                size
            );
        }
    }

    #[test]
    fn test_allocated_chains_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = fresh_volume(&dir);
        let cluster_size = fs.cluster_size() as u64;

        let mut seen = HashSet::new();
        for _ in 0..5 {
            let ino = fs.touch(&stat_of(2 * cluster_size)).unwrap();
            for cluster in fs.cluster_list(ino).unwrap() {
                assert!(seen.insert(cluster), "cluster {} reachable twice", cluster);
            }
        }
    }

    #[test]
    fn test_root_cluster_list_is_logical() {
        let dir = tempfile::tempdir().unwrap();
        let fs = fresh_volume(&dir);
        // 240 entries * 32 bytes = 7680 bytes -> two 4 KiB clusters
        assert_eq!(fs.cluster_list(ROOT_INODE).unwrap(), vec![0, 1]);
        // Logical root cluster 1 sits one cluster past the first root sector
        assert_eq!(fs.cluster_span(0, 1), (10, 8));
        assert_eq!(fs.cluster_span(1, 1), (18, 8));
        // Data clusters start after the root region
        assert_eq!(fs.cluster_span(2, 1), (25, 8));
    }

    #[test]
    fn test_sync_writes_every_fat_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copies.img");
        let image = FileImage::create(&path, IMAGE_SECTORS).unwrap();
        let mut fs = FatFilesystem::format(Partition::whole_disk(Box::new(image))).unwrap();
        fs.touch(&stat_of(1)).unwrap();
        let fat_bytes = fs.fat.data().to_vec();
        fs.close().unwrap();

        let mut image = FileImage::open(&path).unwrap();
        let mut first = vec![0u8; 3 * BLOCK_SIZE];
        let mut second = vec![0u8; 3 * BLOCK_SIZE];
        image.read_blocks(&mut first, 4, 3).unwrap();
        image.read_blocks(&mut second, 7, 3).unwrap();
        assert_eq!(first, fat_bytes);
        assert_eq!(second, fat_bytes);
    }

    #[test]
    fn test_tiny_volume_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let image = FileImage::create(dir.path().join("tiny.img"), 16).unwrap();
        let result = FatFilesystem::format(Partition::whole_disk(Box::new(image)));
        assert!(matches!(result, Err(StrataError::InvalidArgument(_))));
    }

    #[test]
    fn test_oversized_volume_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let image = FileImage::create(dir.path().join("big.img"), 0x8000).unwrap(); // 16 MiB
        let result = FatFilesystem::format(Partition::whole_disk(Box::new(image)));
        assert!(matches!(result, Err(StrataError::Unsupported(_))));
    }

    #[test]
    fn test_cluster_count_gate_wins_over_byte_size() {
        let dir = tempfile::tempdir().unwrap();

        // 32767 sectors squeak under 16 MiB but derive 4088 clusters,
        // past the FAT12 ceiling; the volume load() would refuse must
        // never be written.
        let image = FileImage::create(dir.path().join("edge.img"), 32767).unwrap();
        let result = FatFilesystem::format(Partition::whole_disk(Box::new(image)));
        assert!(matches!(result, Err(StrataError::Unsupported(_))));

        // Slightly smaller geometry stays within FAT12 and formats fine
        let path = dir.path().join("under.img");
        let image = FileImage::create(&path, 32000).unwrap();
        let fs = FatFilesystem::format(Partition::whole_disk(Box::new(image))).unwrap();
        assert_eq!(fs.bpb().variant(), FatVariant::Fat12);
        fs.close().unwrap();

        let image = FileImage::open(&path).unwrap();
        FatFilesystem::load(Partition::whole_disk(Box::new(image))).expect("format output reloads");
    }
}
