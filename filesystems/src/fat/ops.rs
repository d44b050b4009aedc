// The generic filesystem operations, bridged onto FAT12.
//
// FAT stores all metadata inside directory entries, so inodes are
// materialized lazily: readdir decodes an entry, registers it, and hands
// out the fresh handle. The FAT12/16 root carries no physical dot entries;
// every other directory does, which is why non-root index lookups skip two
// physical entries.

use super::dir::{self, attributes, ShortEntry, DIR_ENTRY_SIZE, DOTDOT_NAME, DOT_NAME, ENTRY_DELETED, ENTRY_END};
use super::inode::FatInode;
use super::timestamps::{fat_date_to_unix, fat_datetime_to_unix, unix_to_fat_datetime};
use super::FatFilesystem;
use log::{debug, trace};
use strata_core::{DirEntry, FileStat, FilesystemDriver, Inode, StrataError, ROOT_INODE, S_DIR};

impl FatFilesystem {
    fn require_inode(&self, ino: Inode) -> Result<FatInode, StrataError> {
        if ino == 0 {
            return Err(StrataError::InvalidArgument(
                "null inode handle".to_string(),
            ));
        }
        self.inodes
            .get(ino)
            .cloned()
            .ok_or_else(|| StrataError::NotFound(format!("inode {}", ino)))
    }

    fn require_directory(&self, ino: Inode) -> Result<FatInode, StrataError> {
        let inode = self.require_inode(ino)?;
        if !inode.is_directory() {
            return Err(StrataError::NotADirectory(ino));
        }
        Ok(inode)
    }

    /// Load a directory's full cluster span into memory.
    fn load_directory(&mut self, dir: Inode) -> Result<Vec<u8>, StrataError> {
        let clusters = self.cluster_list(dir)?;
        let cluster_size = self.bpb.cluster_size() as usize;
        let mut data = vec![0u8; clusters.len() * cluster_size];
        for (i, &cluster) in clusters.iter().enumerate() {
            self.read_clusters(&mut data[i * cluster_size..(i + 1) * cluster_size], cluster, 1)?;
        }
        Ok(data)
    }

    /// Write a directory buffer back over its cluster span.
    fn store_directory(&mut self, dir: Inode, data: &[u8]) -> Result<(), StrataError> {
        let clusters = self.cluster_list(dir)?;
        let cluster_size = self.bpb.cluster_size() as usize;
        for (i, &cluster) in clusters.iter().enumerate() {
            self.write_clusters(&data[i * cluster_size..(i + 1) * cluster_size], cluster, 1)?;
        }
        Ok(())
    }

    /// Advance `pos` past `skip` live short entries, mirroring the readdir
    /// index rule: long-name and deleted records don't count. Returns the
    /// position of the record that follows them, or `None` at the
    /// end-of-directory marker.
    fn skip_live_entries(data: &[u8], mut skip: usize) -> Option<usize> {
        let mut pos = 0;
        while skip > 0 {
            if pos + DIR_ENTRY_SIZE > data.len() || data[pos] == ENTRY_END {
                return None;
            }
            let live = data[pos] != ENTRY_DELETED
                && data[pos + 11] != attributes::LONG_NAME;
            pos += DIR_ENTRY_SIZE;
            if live {
                skip -= 1;
            }
        }
        Some(pos)
    }

    /// From `pos`, step over deleted records to the head of the next record
    /// group, returning `(group_start, short_entry_pos)`. `None` at the end
    /// of the directory.
    fn locate_record_group(data: &[u8], mut pos: usize) -> Option<(usize, usize)> {
        loop {
            if pos + DIR_ENTRY_SIZE > data.len() || data[pos] == ENTRY_END {
                return None;
            }
            if data[pos] != ENTRY_DELETED {
                break;
            }
            pos += DIR_ENTRY_SIZE;
        }
        let group_start = pos;
        while pos + DIR_ENTRY_SIZE <= data.len() && data[pos + 11] == attributes::LONG_NAME {
            pos += DIR_ENTRY_SIZE;
        }
        if pos + DIR_ENTRY_SIZE > data.len()
            || data[pos] == ENTRY_END
            || data[pos] == ENTRY_DELETED
        {
            return None;
        }
        Some((group_start, pos))
    }
}

impl FilesystemDriver for FatFilesystem {
    fn read(&mut self, ino: Inode, buf: &mut [u8], offset: u64) -> Result<usize, StrataError> {
        if buf.is_empty() {
            return Err(StrataError::InvalidArgument(
                "zero-length read".to_string(),
            ));
        }
        let inode = self.require_inode(ino)?;
        let clusters = self.cluster_list(ino)?;
        let cluster_size = self.bpb.cluster_size() as usize;

        let mut size = inode.size as u64;
        if size == 0 {
            // Directories carry no declared size
            size = clusters.len() as u64 * cluster_size as u64;
        }
        if offset >= size {
            return Ok(0);
        }
        let length = (buf.len() as u64).min(size - offset) as usize;

        let start_cluster = (offset / cluster_size as u64) as usize;
        let intra = (offset % cluster_size as u64) as usize;
        let window = (length + intra + cluster_size - 1) / cluster_size;

        let mut scratch = vec![0u8; window * cluster_size];
        for i in 0..window {
            if let Some(&cluster) = clusters.get(start_cluster + i) {
                self.read_clusters(
                    &mut scratch[i * cluster_size..(i + 1) * cluster_size],
                    cluster,
                    1,
                )?;
            }
        }
        buf[..length].copy_from_slice(&scratch[intra..intra + length]);
        Ok(length)
    }

    fn write(&mut self, ino: Inode, buf: &[u8], offset: u64) -> Result<usize, StrataError> {
        if buf.is_empty() {
            return Err(StrataError::InvalidArgument(
                "zero-length write".to_string(),
            ));
        }
        let inode = self.require_inode(ino)?;
        let clusters = self.cluster_list(ino)?;
        let cluster_size = self.bpb.cluster_size() as usize;

        let mut size = inode.size as u64;
        if size == 0 {
            size = clusters.len() as u64 * cluster_size as u64;
        }
        // Writes never extend; growing is the job of touch and link
        if offset >= size {
            return Ok(0);
        }
        let length = (buf.len() as u64).min(size - offset) as usize;

        let start_cluster = (offset / cluster_size as u64) as usize;
        let intra = (offset % cluster_size as u64) as usize;
        let window = (length + intra + cluster_size - 1) / cluster_size;

        // Read-modify-write the whole cluster window
        let mut scratch = vec![0u8; window * cluster_size];
        for i in 0..window {
            if let Some(&cluster) = clusters.get(start_cluster + i) {
                self.read_clusters(
                    &mut scratch[i * cluster_size..(i + 1) * cluster_size],
                    cluster,
                    1,
                )?;
            }
        }
        scratch[intra..intra + length].copy_from_slice(&buf[..length]);
        for i in 0..window {
            if let Some(&cluster) = clusters.get(start_cluster + i) {
                self.write_clusters(
                    &scratch[i * cluster_size..(i + 1) * cluster_size],
                    cluster,
                    1,
                )?;
            }
        }
        Ok(length)
    }

    fn touch(&mut self, st: &FileStat) -> Result<Inode, StrataError> {
        if st.size > u32::MAX as u64 {
            return Err(StrataError::InvalidArgument(format!(
                "size {} exceeds what a FAT entry can record",
                st.size
            )));
        }
        let cluster_size = self.bpb.cluster_size() as u64;
        // A fresh inode always owns storage, even at size zero
        let count = ((st.size + cluster_size - 1) / cluster_size).max(1) as u32;
        let head = self.fat.allocate_chain(count)?;

        let attr = if st.is_directory() {
            attributes::DIRECTORY
        } else {
            0
        };
        let ino = self.inodes.register(FatInode {
            parent: None,
            attr,
            first_cluster: head,
            size: st.size as u32,
            atime: st.atime,
            ctime: st.ctime,
            mtime: st.mtime,
        });
        debug!("touch: inode {} holds {} cluster(s) from {}", ino, count, head);
        Ok(ino)
    }

    fn readdir(&mut self, dir: Inode, index: usize) -> Result<Option<DirEntry>, StrataError> {
        let dir_inode = self.require_directory(dir)?;

        if index == 0 {
            return Ok(Some(DirEntry {
                name: ".".to_string(),
                inode: dir,
            }));
        }
        if index == 1 {
            let parent = dir_inode.parent.ok_or_else(|| {
                StrataError::NotFound(format!("inode {} has not been linked yet", dir))
            })?;
            return Ok(Some(DirEntry {
                name: "..".to_string(),
                inode: parent,
            }));
        }

        // The root stores no physical dot entries; everywhere else the
        // first two records are . and ..
        let skip = if dir == ROOT_INODE { index - 2 } else { index };

        let data = self.load_directory(dir)?;
        let Some(pos) = Self::skip_live_entries(&data, skip) else {
            return Ok(None);
        };
        let Some((group_start, entry_pos)) = Self::locate_record_group(&data, pos) else {
            return Ok(None);
        };

        let long_name = dir::decode_long_name(&data[group_start..]);
        let entry = ShortEntry::decode(&data[entry_pos..entry_pos + DIR_ENTRY_SIZE]);
        let name = match long_name {
            Some(name) => name,
            None => dir::parse_83_name(&entry.name, entry.is_directory()),
        };

        let child = FatInode {
            parent: Some(dir),
            attr: entry.attr,
            first_cluster: entry.first_cluster(),
            size: entry.size,
            atime: fat_date_to_unix(entry.adate),
            ctime: fat_datetime_to_unix(entry.cdate, entry.ctime),
            mtime: fat_datetime_to_unix(entry.mdate, entry.mtime),
        };
        let ino = self.inodes.register(child);
        trace!("readdir: {}[{}] = '{}' -> inode {}", dir, index, name, ino);
        Ok(Some(DirEntry { name, inode: ino }))
    }

    fn link(&mut self, ino: Inode, dir: Inode, name: &str) -> Result<(), StrataError> {
        if name.is_empty() {
            return Err(StrataError::InvalidArgument("empty name".to_string()));
        }
        let dir_inode = self.require_directory(dir)?;
        let target = self.require_inode(ino)?;

        let cluster_size = self.bpb.cluster_size() as usize;
        let mut data = self.load_directory(dir)?;

        let dot_entry = name == DOT_NAME || name == DOTDOT_NAME;
        let needed = if dot_entry {
            1
        } else {
            dir::long_name_entries(name) + 1
        };

        // Look for a hole of `needed` deleted records; failing that, append
        // at the end-of-directory marker.
        let mut pos = 0;
        let mut run = 0usize;
        let mut run_start = 0usize;
        let mut slot = None;
        while pos + DIR_ENTRY_SIZE <= data.len() {
            let first = data[pos];
            if first == ENTRY_END {
                break;
            }
            if first == ENTRY_DELETED {
                if run == 0 {
                    run_start = pos;
                }
                run += 1;
                if run == needed {
                    slot = Some(run_start);
                    break;
                }
            } else {
                run = 0;
            }
            pos += DIR_ENTRY_SIZE;
        }
        let start = slot.unwrap_or(pos);

        if dir == ROOT_INODE {
            // The root region is fixed in place and cannot grow
            let capacity = self.bpb.root_count as usize * DIR_ENTRY_SIZE;
            if start + needed * DIR_ENTRY_SIZE > capacity {
                return Err(StrataError::NoSpace);
            }
        } else {
            while start + needed * DIR_ENTRY_SIZE > data.len() {
                self.fat.extend_chain(dir_inode.first_cluster)?;
                data.resize(data.len() + cluster_size, 0);
                debug!("link: directory {} grew by one cluster", dir);
            }
        }

        let mut cursor = start;
        let mut short_name = [b' '; 11];
        if dot_entry {
            short_name.copy_from_slice(name.as_bytes());
        } else {
            let existing = dir::live_short_names(&data);
            short_name = dir::derive_short_name(name, &existing);
            let checksum = dir::short_name_checksum(&short_name);
            for record in dir::encode_long_name(name, checksum) {
                data[cursor..cursor + DIR_ENTRY_SIZE].copy_from_slice(&record);
                cursor += DIR_ENTRY_SIZE;
            }
        }

        let (cdate, ctime) = unix_to_fat_datetime(target.ctime);
        let (adate, _) = unix_to_fat_datetime(target.atime);
        let (mdate, mtime) = unix_to_fat_datetime(target.mtime);
        let mut entry = ShortEntry {
            name: short_name,
            attr: target.attr,
            ctime_tenths: 0,
            ctime,
            cdate,
            adate,
            cluster_high: 0,
            mtime,
            mdate,
            cluster_low: 0,
            size: target.size,
        };
        entry.set_first_cluster(target.first_cluster);
        entry.encode(&mut data[cursor..cursor + DIR_ENTRY_SIZE]);

        self.store_directory(dir, &data)?;

        // Dot entries alias the directory itself and its parent; only a
        // real link establishes parentage.
        if !dot_entry {
            if let Some(inode) = self.inodes.get_mut(ino) {
                inode.parent = Some(dir);
            }
        }
        debug!("link: '{}' -> inode {} in directory {}", name.trim_end(), ino, dir);
        Ok(())
    }

    fn unlink(&mut self, dir: Inode, index: usize) -> Result<(), StrataError> {
        if index < 2 {
            return Err(StrataError::InvalidArgument(
                "the dot entries cannot be unlinked".to_string(),
            ));
        }
        self.require_directory(dir)?;

        // Resolve the victim first so its chain can be released afterwards
        let target = self
            .readdir(dir, index)?
            .ok_or_else(|| StrataError::NotFound(format!("directory entry {}", index)))?;

        let data = self.load_directory(dir)?;
        let skip = if dir == ROOT_INODE { index - 2 } else { index };
        let pos = Self::skip_live_entries(&data, skip)
            .ok_or_else(|| StrataError::NotFound(format!("directory entry {}", index)))?;
        let (group_start, entry_pos) = Self::locate_record_group(&data, pos)
            .ok_or_else(|| StrataError::NotFound(format!("directory entry {}", index)))?;
        let group_end = entry_pos + DIR_ENTRY_SIZE;

        // Compact the directory around the removed record group; the freed
        // tail stays zeroed, which keeps the end marker intact. The root
        // window may extend past the fixed root region, so compaction stops
        // at the region boundary.
        let limit = if dir == ROOT_INODE {
            (self.bpb.root_count as usize * DIR_ENTRY_SIZE).min(data.len())
        } else {
            data.len()
        };
        if group_end > limit {
            return Err(StrataError::NotFound(format!("directory entry {}", index)));
        }
        let mut compacted = vec![0u8; data.len()];
        compacted[..group_start].copy_from_slice(&data[..group_start]);
        compacted[group_start..group_start + (limit - group_end)]
            .copy_from_slice(&data[group_end..limit]);
        compacted[limit..].copy_from_slice(&data[limit..]);
        self.store_directory(dir, &compacted)?;

        let victim = self.require_inode(target.inode)?;
        if victim.first_cluster >= 2 {
            self.fat.release_chain(victim.first_cluster)?;
        }
        debug!(
            "unlink: removed '{}' (inode {}) from directory {}",
            target.name, target.inode, dir
        );
        Ok(())
    }

    fn fstat(&mut self, ino: Inode) -> Result<FileStat, StrataError> {
        let inode = self.require_inode(ino)?;
        let mut mode = 0o777;
        if inode.is_directory() {
            mode |= S_DIR;
        }
        Ok(FileStat {
            size: inode.size as u64,
            mode,
            atime: inode.atime,
            ctime: inode.ctime,
            mtime: inode.mtime,
        })
    }

    fn mkdir(&mut self, parent: Inode, name: &str) -> Result<(), StrataError> {
        self.require_directory(parent)?;
        let now = chrono::Utc::now().timestamp();
        let st = FileStat {
            size: 0,
            mode: S_DIR | 0o755,
            atime: now,
            ctime: now,
            mtime: now,
        };
        let child = self.touch(&st)?;
        self.link(child, parent, name)?;

        // The fresh cluster must read as an empty directory
        let zeros = vec![0u8; self.bpb.cluster_size() as usize];
        self.write(child, &zeros, 0)?;

        self.link(child, child, DOT_NAME)?;
        self.link(parent, child, DOTDOT_NAME)?;
        debug!("mkdir: '{}' -> inode {} under {}", name, child, parent);
        Ok(())
    }

    fn rmdir(&mut self, dir: Inode, index: usize) -> Result<(), StrataError> {
        let target = self
            .readdir(dir, index)?
            .ok_or_else(|| StrataError::NotFound(format!("directory entry {}", index)))?;
        // An entry past . and .. means the directory still has children
        if self.readdir(target.inode, 2)?.is_some() {
            return Err(StrataError::NotEmpty);
        }
        self.unlink(dir, index)
    }

    fn sync(&mut self) -> Result<(), StrataError> {
        FatFilesystem::sync(self)
    }

    fn close(self: Box<Self>) -> Result<(), StrataError> {
        FatFilesystem::close(*self)
    }

    fn filesystem_type(&self) -> &str {
        "fat12"
    }
}
