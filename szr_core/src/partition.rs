//! Block partitioning of a 3-D volume and per-block staging buffers.
//!
//! The volume is cut into cubes of edge [`BLOCK_SIZE`]. Blocks that run
//! past the volume edge are clipped: out-of-range coordinates are clamped
//! to the last valid index, so the staged block repeats the last in-bounds
//! sample along that axis.

use crate::error::{Result, SzError};

/// Edge length of a block.
pub const BLOCK_SIZE: usize = 6;

/// Samples staged per block, clipped positions included.
pub const BLOCK_ELEMENTS: usize = BLOCK_SIZE * BLOCK_SIZE * BLOCK_SIZE;

/// Edge length of a staging buffer: one halo plane in front of each axis.
pub const HALO_EDGE: usize = BLOCK_SIZE + 1;

const HALO_ELEMENTS: usize = HALO_EDGE * HALO_EDGE * HALO_EDGE;
const HALO_DIM0: usize = HALO_EDGE * HALO_EDGE;
const HALO_DIM1: usize = HALO_EDGE;

/// Extents of a row-major volume, slowest axis first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub r1: usize,
    pub r2: usize,
    pub r3: usize,
}

impl Dims {
    pub fn new(r1: usize, r2: usize, r3: usize) -> Result<Self> {
        if r1 == 0 || r2 == 0 || r3 == 0 {
            return Err(SzError::InvalidDimensions { r1, r2, r3 });
        }
        r1.checked_mul(r2)
            .and_then(|n| n.checked_mul(r3))
            .ok_or_else(|| {
                SzError::InvalidConfig(format!("volume {r1}x{r2}x{r3} overflows usize"))
            })?;
        Ok(Self { r1, r2, r3 })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.r1 * self.r2 * self.r3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stride of the slowest axis.
    #[inline]
    pub fn dim0(&self) -> usize {
        self.r2 * self.r3
    }

    /// Stride of the middle axis.
    #[inline]
    pub fn dim1(&self) -> usize {
        self.r3
    }

    #[inline]
    pub fn offset(&self, x: usize, y: usize, z: usize) -> usize {
        x * self.dim0() + y * self.dim1() + z
    }
}

/// Position of one block in the block grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCoord {
    /// Linear block index in `(i, j, k)` order, `k` fastest.
    pub index: usize,
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

/// The block grid covering a volume.
#[derive(Debug, Clone, Copy)]
pub struct BlockGrid {
    pub dims: Dims,
    pub num_x: usize,
    pub num_y: usize,
    pub num_z: usize,
}

impl BlockGrid {
    pub fn new(dims: Dims) -> Self {
        Self {
            dims,
            num_x: dims.r1.div_ceil(BLOCK_SIZE),
            num_y: dims.r2.div_ceil(BLOCK_SIZE),
            num_z: dims.r3.div_ceil(BLOCK_SIZE),
        }
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.num_x * self.num_y * self.num_z
    }

    pub fn block(&self, index: usize) -> Option<BlockCoord> {
        if index >= self.num_blocks() {
            return None;
        }
        let plane = self.num_y * self.num_z;
        Some(BlockCoord {
            index,
            i: index / plane,
            j: (index % plane) / self.num_z,
            k: index % self.num_z,
        })
    }

    /// All blocks, `i` outermost and `k` innermost.
    pub fn blocks(&self) -> impl Iterator<Item = BlockCoord> + '_ {
        (0..self.num_blocks()).filter_map(move |index| self.block(index))
    }

    /// Volume offset of local position `(ii, jj, kk)` in `block`, with each
    /// coordinate clamped to the last valid index.
    #[inline]
    pub fn clamped_offset(&self, block: BlockCoord, ii: usize, jj: usize, kk: usize) -> usize {
        let x = (block.i * BLOCK_SIZE + ii).min(self.dims.r1 - 1);
        let y = (block.j * BLOCK_SIZE + jj).min(self.dims.r2 - 1);
        let z = (block.k * BLOCK_SIZE + kk).min(self.dims.r3 - 1);
        self.dims.offset(x, y, z)
    }

    /// Volume offset of `(ii, jj, kk)` in `block`, or `None` if the position
    /// was clipped away.
    #[inline]
    pub fn offset_in_bounds(
        &self,
        block: BlockCoord,
        ii: usize,
        jj: usize,
        kk: usize,
    ) -> Option<usize> {
        let x = block.i * BLOCK_SIZE + ii;
        let y = block.j * BLOCK_SIZE + jj;
        let z = block.k * BLOCK_SIZE + kk;
        (x < self.dims.r1 && y < self.dims.r2 && z < self.dims.r3)
            .then(|| self.dims.offset(x, y, z))
    }

    /// Copy `block` out of `volume` in local `(ii, jj, kk)` order.
    pub fn gather(&self, volume: &[f32], block: BlockCoord) -> [f32; BLOCK_ELEMENTS] {
        let mut out = [0f32; BLOCK_ELEMENTS];
        let mut n = 0;
        for ii in 0..BLOCK_SIZE {
            for jj in 0..BLOCK_SIZE {
                for kk in 0..BLOCK_SIZE {
                    out[n] = volume[self.clamped_offset(block, ii, jj, kk)];
                    n += 1;
                }
            }
        }
        out
    }

    /// Write a reconstructed block back into `volume`, skipping clipped
    /// positions.
    pub fn scatter(&self, values: &[f32; BLOCK_ELEMENTS], block: BlockCoord, volume: &mut [f32]) {
        let mut n = 0;
        for ii in 0..BLOCK_SIZE {
            for jj in 0..BLOCK_SIZE {
                for kk in 0..BLOCK_SIZE {
                    if let Some(off) = self.offset_in_bounds(block, ii, jj, kk) {
                        volume[off] = values[n];
                    }
                    n += 1;
                }
            }
        }
    }
}

/// A block staged behind one plane of left context along each axis.
///
/// Halo coordinates run `0..=BLOCK_SIZE`; the block occupies `1..=BLOCK_SIZE`
/// and the halo (any coordinate 0) is always zero, so every block predicts
/// from its own samples only.
#[derive(Clone)]
pub struct HaloBlock {
    data: [f32; HALO_ELEMENTS],
}

impl HaloBlock {
    pub fn zeroed() -> Self {
        Self {
            data: [0f32; HALO_ELEMENTS],
        }
    }

    /// Stage `block` from `volume` with clipped positions clamped.
    pub fn load(volume: &[f32], grid: &BlockGrid, block: BlockCoord) -> Self {
        let mut staged = Self::zeroed();
        for ii in 0..BLOCK_SIZE {
            for jj in 0..BLOCK_SIZE {
                for kk in 0..BLOCK_SIZE {
                    let v = volume[grid.clamped_offset(block, ii, jj, kk)];
                    staged.set(ii + 1, jj + 1, kk + 1, v);
                }
            }
        }
        staged
    }

    #[inline]
    fn index(x: usize, y: usize, z: usize) -> usize {
        x * HALO_DIM0 + y * HALO_DIM1 + z
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[Self::index(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        self.data[Self::index(x, y, z)] = value;
    }

    /// Lorenzo prediction at halo position `(x, y, z)`, each >= 1: the
    /// inclusion-exclusion sum over the seven lower neighbors.
    #[inline]
    pub fn lorenzo(&self, x: usize, y: usize, z: usize) -> f32 {
        let p = Self::index(x, y, z);
        let d = &self.data;
        d[p - 1] + d[p - HALO_DIM1] + d[p - HALO_DIM0]
            - d[p - HALO_DIM1 - 1]
            - d[p - HALO_DIM0 - 1]
            - d[p - HALO_DIM0 - HALO_DIM1]
            + d[p - HALO_DIM0 - HALO_DIM1 - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dims: Dims) -> Vec<f32> {
        (0..dims.len()).map(|i| i as f32).collect()
    }

    #[test]
    fn test_block_counts() {
        let grid = BlockGrid::new(Dims::new(7, 7, 7).unwrap());
        assert_eq!((grid.num_x, grid.num_y, grid.num_z), (2, 2, 2));
        assert_eq!(grid.num_blocks(), 8);

        let grid = BlockGrid::new(Dims::new(12, 1, 13).unwrap());
        assert_eq!(grid.num_blocks(), 6);
    }

    #[test]
    fn test_zero_extent_rejected() {
        assert!(matches!(
            Dims::new(4, 0, 4),
            Err(SzError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_block_order_k_fastest() {
        let grid = BlockGrid::new(Dims::new(12, 12, 18).unwrap());
        let coords: Vec<_> = grid.blocks().take(4).map(|b| (b.i, b.j, b.k)).collect();
        assert_eq!(coords, vec![(0, 0, 0), (0, 0, 1), (0, 0, 2), (0, 1, 0)]);
        assert_eq!(grid.blocks().count(), grid.num_blocks());
    }

    #[test]
    fn test_clipped_block_repeats_last_sample() {
        let dims = Dims::new(7, 7, 7).unwrap();
        let grid = BlockGrid::new(dims);
        let volume = ramp(dims);
        let last = grid.block(7).unwrap();
        let staged = grid.gather(&volume, last);
        // Only (6, 6, 6) is in bounds; every local position repeats it.
        let corner = volume[dims.offset(6, 6, 6)];
        assert!(staged.iter().all(|&v| v == corner));
    }

    #[test]
    fn test_scatter_skips_clipped_positions() {
        let dims = Dims::new(7, 2, 3).unwrap();
        let grid = BlockGrid::new(dims);
        let volume = ramp(dims);
        let mut out = vec![f32::NAN; dims.len()];
        for b in grid.blocks() {
            let staged = grid.gather(&volume, b);
            grid.scatter(&staged, b, &mut out);
        }
        assert_eq!(out, volume);
    }

    #[test]
    fn test_halo_stays_zero() {
        let dims = Dims::new(12, 12, 12).unwrap();
        let grid = BlockGrid::new(dims);
        let volume = vec![3.0f32; dims.len()];
        let staged = HaloBlock::load(&volume, &grid, grid.block(7).unwrap());
        assert_eq!(staged.get(0, 3, 3), 0.0);
        assert_eq!(staged.get(3, 0, 3), 0.0);
        assert_eq!(staged.get(3, 3, 0), 0.0);
        assert_eq!(staged.get(1, 1, 1), 3.0);
    }

    #[test]
    fn test_lorenzo_is_exact_on_linear_field() {
        let mut staged = HaloBlock::zeroed();
        for x in 0..HALO_EDGE {
            for y in 0..HALO_EDGE {
                for z in 0..HALO_EDGE {
                    staged.set(x, y, z, (2 * x + 3 * y + 5 * z) as f32);
                }
            }
        }
        assert_eq!(staged.lorenzo(3, 4, 5), (2 * 3 + 3 * 4 + 5 * 5) as f32);
    }
}
