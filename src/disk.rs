//! Disk images and CHS geometry for the INT 13h/FDh BIOS disk services.
//!
//! Grounded on `examples/original_source/src/fake86/disk.c`: floppy geometry
//! is looked up from file size against the standard format table; hard
//! disks default to 63 sectors x 16 heads with the cylinder count derived
//! from the image size. CHS-to-LBA uses the same `((cyl*heads)+head)*sects
//! + sect - 1` formula as the original.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{EmulatorError, Result};

/// A seekable, readable/writable disk backing store. File-backed and
/// memory-backed images both implement this so the BIOS disk service code
/// doesn't care which one it's talking to.
pub trait DiskImage: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize>;
    fn size(&self) -> u64;
}

pub struct FileImage {
    file: File,
    size: u64,
}

impl FileImage {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(|source| {
            EmulatorError::DiskOpen { path: path.to_path_buf(), source }
        })?;
        let size = file.metadata().map_err(|source| EmulatorError::DiskOpen { path: path.to_path_buf(), source })?.len();
        Ok(Self { file, size })
    }
}

impl DiskImage for FileImage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let n = self.file.write(buf)?;
        self.file.flush()?;
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// An in-RAM floppy, for the `-fd0 *` "scratch disk" form.
pub struct MemImage {
    data: Vec<u8>,
}

impl MemImage {
    pub fn new(size: usize) -> Self {
        let mut data = vec![0x41u8; size];
        if size >= 512 {
            data[510] = 0x55;
            data[511] = 0xAA;
        }
        Self { data }
    }
}

impl DiskImage for MemImage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        self.data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub cyls: u16,
    pub heads: u8,
    pub sects: u8,
}

const FLOPPY_TYPES: [(u64, Geometry); 6] = [
    (80 * 18 * 2 * 512, Geometry { cyls: 80, heads: 2, sects: 18 }), // 1.44 MB
    (80 * 15 * 2 * 512, Geometry { cyls: 80, heads: 2, sects: 15 }), // 1.2 MB
    (80 * 9 * 2 * 512, Geometry { cyls: 80, heads: 2, sects: 9 }),   // 720 KB
    (80 * 8 * 2 * 512, Geometry { cyls: 80, heads: 2, sects: 8 }),   // 640 KB
    (40 * 9 * 2 * 512, Geometry { cyls: 40, heads: 2, sects: 9 }),   // 360 KB
    (40 * 8 * 1 * 512, Geometry { cyls: 40, heads: 1, sects: 8 }),   // 160 KB
];

pub fn floppy_geometry(size: u64) -> Option<Geometry> {
    FLOPPY_TYPES.iter().find(|(sz, _)| *sz == size).map(|(_, g)| *g)
}

pub fn hard_disk_geometry(size: u64) -> Geometry {
    let sects = 63u64;
    let heads = 16u64;
    let cyls = (size / (sects * heads * 512)).max(1).min(u16::MAX as u64);
    Geometry { cyls: cyls as u16, heads: 16, sects: 63 }
}

/// CHS-to-LBA, matching the original's `((cyl*heads)+head)*sects + sect - 1`.
/// `sect` is 1-based; returns `None` for the invalid `sect == 0`.
pub fn chs_to_lba(cyl: u16, head: u8, sect: u8, geometry: Geometry) -> Option<u64> {
    if sect == 0 {
        return None;
    }
    let lba = (cyl as u64 * geometry.heads as u64 + head as u64) * geometry.sects as u64 + sect as u64 - 1;
    Some(lba)
}

pub struct Drive {
    pub image: Box<dyn DiskImage>,
    pub geometry: Geometry,
    pub is_hard: bool,
    pub path: Option<PathBuf>,
}

impl Drive {
    pub fn open_floppy(path: &Path) -> Result<Self> {
        let image = FileImage::open(path)?;
        let geometry = floppy_geometry(image.size())
            .ok_or_else(|| EmulatorError::UnknownGeometry(path.to_path_buf()))?;
        Ok(Self { image: Box::new(image), geometry, is_hard: false, path: Some(path.to_path_buf()) })
    }

    pub fn open_hard_disk(path: &Path) -> Result<Self> {
        let image = FileImage::open(path)?;
        let geometry = hard_disk_geometry(image.size());
        Ok(Self { image: Box::new(image), geometry, is_hard: true, path: Some(path.to_path_buf()) })
    }

    pub fn scratch_floppy() -> Self {
        let geometry = Geometry { cyls: 80, heads: 2, sects: 18 };
        let size = 512 * geometry.sects as usize * geometry.cyls as usize * geometry.heads as usize;
        Self { image: Box::new(MemImage::new(size)), geometry, is_hard: false, path: None }
    }

    pub fn read_sector(&mut self, lba: u64, buf: &mut [u8; 512]) -> io::Result<bool> {
        let n = self.image.read_at(lba * 512, buf)?;
        Ok(n == 512)
    }

    pub fn write_sector(&mut self, lba: u64, buf: &[u8; 512]) -> io::Result<bool> {
        let n = self.image.write_at(lba * 512, buf)?;
        Ok(n == 512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floppy_geometry_matches_known_sizes() {
        let g = floppy_geometry(80 * 18 * 2 * 512).unwrap();
        assert_eq!((g.cyls, g.heads, g.sects), (80, 2, 18));
        assert!(floppy_geometry(123).is_none());
    }

    #[test]
    fn hard_disk_geometry_derives_cylinders() {
        let size = 63 * 16 * 512 * 100; // 100 cylinders worth
        let g = hard_disk_geometry(size);
        assert_eq!((g.heads, g.sects), (16, 63));
        assert_eq!(g.cyls, 100);
    }

    #[test]
    fn chs_to_lba_matches_formula() {
        let g = Geometry { cyls: 80, heads: 2, sects: 18 };
        assert_eq!(chs_to_lba(0, 0, 1, g), Some(0));
        assert_eq!(chs_to_lba(0, 0, 2, g), Some(1));
        assert_eq!(chs_to_lba(0, 1, 1, g), Some(18));
        assert_eq!(chs_to_lba(1, 0, 1, g), Some(36));
        assert_eq!(chs_to_lba(0, 0, 0, g), None);
    }

    #[test]
    fn file_image_read_and_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("floppy.img");
        std::fs::write(&path, vec![0u8; 80 * 18 * 2 * 512]).unwrap();

        let mut drive = Drive::open_floppy(&path).unwrap();
        assert_eq!((drive.geometry.cyls, drive.geometry.heads, drive.geometry.sects), (80, 2, 18));

        let sector = [0x42u8; 512];
        assert!(drive.write_sector(5, &sector).unwrap());
        let mut readback = [0u8; 512];
        assert!(drive.read_sector(5, &mut readback).unwrap());
        assert_eq!(readback, sector);
    }

    #[test]
    fn opening_unknown_size_floppy_image_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.img");
        std::fs::write(&path, vec![0u8; 12345]).unwrap();

        let err = Drive::open_floppy(&path).unwrap_err();
        assert!(matches!(err, EmulatorError::UnknownGeometry(_)));
    }
}
