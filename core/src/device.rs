use crate::StrataError;
use log::debug;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Fixed block size for all image I/O.
pub const BLOCK_SIZE: usize = 512;

/// A device addressable in fixed 512-byte blocks.
pub trait BlockDevice: Send {
    /// Read `count` blocks starting at `start_block` into `buf`.
    fn read_blocks(
        &mut self,
        buf: &mut [u8],
        start_block: u64,
        count: usize,
    ) -> Result<(), StrataError>;

    /// Write `count` blocks starting at `start_block` from `buf`.
    fn write_blocks(
        &mut self,
        buf: &[u8],
        start_block: u64,
        count: usize,
    ) -> Result<(), StrataError>;

    fn total_blocks(&self) -> u64;
}

/// A raw disk image backed by a regular file.
pub struct FileImage {
    file: std::fs::File,
    blocks: u64,
}

impl FileImage {
    /// Open an existing image. The file length must be block-aligned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StrataError> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len % BLOCK_SIZE as u64 != 0 {
            return Err(StrataError::InvalidArgument(format!(
                "image size {} is not a multiple of {} bytes",
                len, BLOCK_SIZE
            )));
        }
        let blocks = len / BLOCK_SIZE as u64;
        debug!("Opened image {} ({} blocks)", path.as_ref().display(), blocks);
        Ok(Self { file, blocks })
    }

    /// Create a zero-filled image of `blocks` blocks, truncating any
    /// existing file at the path.
    pub fn create<P: AsRef<Path>>(path: P, blocks: u64) -> Result<Self, StrataError> {
        if blocks == 0 {
            return Err(StrataError::InvalidArgument(
                "image must hold at least one block".to_string(),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(blocks * BLOCK_SIZE as u64)?;
        debug!("Created image {} ({} blocks)", path.as_ref().display(), blocks);
        Ok(Self { file, blocks })
    }

    fn check_range(
        &self,
        start_block: u64,
        count: usize,
        buf_len: usize,
    ) -> Result<(), StrataError> {
        if buf_len < count * BLOCK_SIZE {
            return Err(StrataError::InvalidArgument(format!(
                "buffer of {} bytes cannot hold {} blocks",
                buf_len, count
            )));
        }
        if start_block + count as u64 > self.blocks {
            return Err(StrataError::InvalidArgument(format!(
                "blocks {}..{} are outside an image of {} blocks",
                start_block,
                start_block + count as u64,
                self.blocks
            )));
        }
        Ok(())
    }
}

impl BlockDevice for FileImage {
    fn read_blocks(
        &mut self,
        buf: &mut [u8],
        start_block: u64,
        count: usize,
    ) -> Result<(), StrataError> {
        self.check_range(start_block, count, buf.len())?;
        self.file
            .seek(SeekFrom::Start(start_block * BLOCK_SIZE as u64))?;
        self.file.read_exact(&mut buf[..count * BLOCK_SIZE])?;
        Ok(())
    }

    fn write_blocks(
        &mut self,
        buf: &[u8],
        start_block: u64,
        count: usize,
    ) -> Result<(), StrataError> {
        self.check_range(start_block, count, buf.len())?;
        self.file
            .seek(SeekFrom::Start(start_block * BLOCK_SIZE as u64))?;
        self.file.write_all(&buf[..count * BLOCK_SIZE])?;
        self.file.flush()?;
        Ok(())
    }

    fn total_blocks(&self) -> u64 {
        self.blocks
    }
}
