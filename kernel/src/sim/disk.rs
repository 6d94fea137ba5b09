// Simulated swap disk: a flat sector store behind the block-driver trait.

use spin::Mutex;

use crate::services::{DiskDriver, DiskError, DiskGeometry};

pub struct SimDisk {
    geometry: DiskGeometry,
    data: Mutex<Vec<u8>>,
}

impl SimDisk {
    pub fn new(geometry: DiskGeometry) -> Self {
        Self {
            geometry,
            data: Mutex::new(vec![0u8; geometry.capacity()]),
        }
    }

    fn run(&self, track: usize, first_sector: usize, sectors: usize, len: usize)
        -> Result<(usize, usize), DiskError> {
        let start = (track * self.geometry.sectors_per_track + first_sector)
            * self.geometry.sector_size;
        let bytes = sectors * self.geometry.sector_size;
        if start + bytes > self.geometry.capacity() || bytes > len {
            return Err(DiskError::OutOfRange);
        }
        Ok((start, bytes))
    }
}

impl DiskDriver for SimDisk {
    fn geometry(&self) -> DiskGeometry {
        self.geometry
    }

    fn read(
        &self,
        track: usize,
        first_sector: usize,
        sectors: usize,
        buf: &mut [u8],
    ) -> Result<(), DiskError> {
        let (start, bytes) = self.run(track, first_sector, sectors, buf.len())?;
        let data = self.data.lock();
        buf[..bytes].copy_from_slice(&data[start..start + bytes]);
        Ok(())
    }

    fn write(
        &self,
        track: usize,
        first_sector: usize,
        sectors: usize,
        buf: &[u8],
    ) -> Result<(), DiskError> {
        let (start, bytes) = self.run(track, first_sector, sectors, buf.len())?;
        let mut data = self.data.lock();
        data[start..start + bytes].copy_from_slice(&buf[..bytes]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk() -> SimDisk {
        SimDisk::new(DiskGeometry {
            sector_size: 16,
            sectors_per_track: 4,
            tracks: 2,
        })
    }

    #[test]
    fn sector_runs_round_trip() {
        let disk = disk();
        let out = [7u8; 32];
        disk.write(1, 1, 2, &out).unwrap();
        let mut back = [0u8; 32];
        disk.read(1, 1, 2, &mut back).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn runs_past_the_end_are_rejected() {
        let disk = disk();
        let mut buf = [0u8; 32];
        assert_eq!(disk.read(1, 3, 2, &mut buf), Err(DiskError::OutOfRange));
        assert_eq!(disk.read(2, 0, 1, &mut buf), Err(DiskError::OutOfRange));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let disk = disk();
        let mut buf = [0u8; 8];
        assert_eq!(disk.read(0, 0, 1, &mut buf), Err(DiskError::OutOfRange));
    }
}
