//! Tile grid geometry.
//!
//! Pure arithmetic over plane and tile extents: how many tiles cover a plane and
//! where each (possibly clipped) tile sits. No I/O happens here, which keeps the
//! edge-tile rules testable on their own.

use crate::image_pipeline::common::error::{ConversionError, Result};

/// Requested or negotiated tile extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl TileSize {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ConversionError::InvalidTileSize(width, height));
        }
        Ok(Self { width, height })
    }
}

/// A rectangle inside a plane's pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True when the region is non-empty and lies inside a `width` x `height` plane.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

/// Number of tiles needed along each axis, i.e. `ceil(extent / tile)`.
pub fn compute_grid(
    plane_width: u32,
    plane_height: u32,
    tile_width: u32,
    tile_height: u32,
) -> Result<(u32, u32)> {
    if tile_width == 0 || tile_height == 0 {
        return Err(ConversionError::InvalidTileSize(tile_width, tile_height));
    }
    if plane_width == 0 || plane_height == 0 {
        return Err(ConversionError::InvalidDimensions(plane_width, plane_height));
    }

    let mut x_tiles = plane_width / tile_width;
    if x_tiles * tile_width != plane_width {
        x_tiles += 1;
    }
    let mut y_tiles = plane_height / tile_height;
    if y_tiles * tile_height != plane_height {
        y_tiles += 1;
    }

    Ok((x_tiles, y_tiles))
}

/// Offset and clipped size of tile `tile_index` along one axis.
///
/// The last tile is clipped to the plane boundary so reads never run past it.
pub fn effective_tile_extent(tile_index: u32, tile_size: u32, plane_extent: u32) -> (u32, u32) {
    let offset = tile_index as u64 * tile_size as u64;
    let size = if offset + (tile_size as u64) < plane_extent as u64 {
        tile_size as u64
    } else {
        (plane_extent as u64).saturating_sub(offset)
    };
    (offset as u32, size as u32)
}

/// Tile grid of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub plane_width: u32,
    pub plane_height: u32,
    pub tile: TileSize,
    pub x_tiles: u32,
    pub y_tiles: u32,
}

impl TileGrid {
    pub fn new(plane_width: u32, plane_height: u32, tile: TileSize) -> Result<Self> {
        let (x_tiles, y_tiles) = compute_grid(plane_width, plane_height, tile.width, tile.height)?;
        Ok(Self {
            plane_width,
            plane_height,
            tile,
            x_tiles,
            y_tiles,
        })
    }

    pub fn tile_count(&self) -> usize {
        self.x_tiles as usize * self.y_tiles as usize
    }

    /// Region covered by tile `(tx, ty)`, clipped at the right and bottom edges.
    pub fn region(&self, tx: u32, ty: u32) -> Region {
        let (x, width) = effective_tile_extent(tx, self.tile.width, self.plane_width);
        let (y, height) = effective_tile_extent(ty, self.tile.height, self.plane_height);
        Region::new(x, y, width, height)
    }

    /// Row-major linear index of `region` if it is exactly one tile of this grid.
    pub fn tile_index(&self, region: &Region) -> Option<usize> {
        if region.x % self.tile.width != 0 || region.y % self.tile.height != 0 {
            return None;
        }
        let tx = region.x / self.tile.width;
        let ty = region.y / self.tile.height;
        if tx >= self.x_tiles || ty >= self.y_tiles || self.region(tx, ty) != *region {
            return None;
        }
        Some(ty as usize * self.x_tiles as usize + tx as usize)
    }

    /// Tiles in row-major order: y outer, x inner.
    pub fn tiles(&self) -> impl Iterator<Item = Region> + '_ {
        (0..self.y_tiles).flat_map(move |ty| (0..self.x_tiles).map(move |tx| self.region(tx, ty)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_divisible_plane_has_full_tiles() {
        let grid = TileGrid::new(512, 256, TileSize::new(128, 128).unwrap()).unwrap();
        assert_eq!((grid.x_tiles, grid.y_tiles), (4, 2));
        assert!(grid.tiles().all(|r| r.width == 128 && r.height == 128));
    }

    #[test]
    fn test_single_pixel_plane() {
        let grid = TileGrid::new(1, 1, TileSize::new(256, 256).unwrap()).unwrap();
        assert_eq!(grid.tile_count(), 1);
        assert_eq!(grid.region(0, 0), Region::new(0, 0, 1, 1));
    }

    #[test]
    fn test_edge_tiles_are_clipped() {
        let grid = TileGrid::new(300, 300, TileSize::new(128, 128).unwrap()).unwrap();
        assert_eq!((grid.x_tiles, grid.y_tiles), (3, 3));
        assert_eq!(grid.region(2, 0), Region::new(256, 0, 44, 128));
        assert_eq!(grid.region(0, 2), Region::new(0, 256, 128, 44));
        assert_eq!(grid.region(2, 2), Region::new(256, 256, 44, 44));
    }

    #[test]
    fn test_tiles_are_row_major() {
        let grid = TileGrid::new(20, 20, TileSize::new(10, 10).unwrap()).unwrap();
        let origins: Vec<(u32, u32)> = grid.tiles().map(|r| (r.x, r.y)).collect();
        assert_eq!(origins, vec![(0, 0), (10, 0), (0, 10), (10, 10)]);
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        assert!(matches!(
            TileSize::new(0, 0),
            Err(ConversionError::InvalidTileSize(0, 0))
        ));
        assert!(matches!(
            compute_grid(100, 100, 16, 0),
            Err(ConversionError::InvalidTileSize(16, 0))
        ));
    }

    #[test]
    fn test_zero_plane_rejected() {
        assert!(matches!(
            compute_grid(0, 10, 16, 16),
            Err(ConversionError::InvalidDimensions(0, 10))
        ));
    }

    #[test]
    fn test_extent_does_not_overflow_near_u32_max() {
        let (offset, size) = effective_tile_extent(1, u32::MAX - 10, u32::MAX);
        assert_eq!(offset, u32::MAX - 10);
        assert_eq!(size, 10);
    }

    #[test]
    fn test_tile_index_accepts_only_grid_tiles() {
        let grid = TileGrid::new(300, 300, TileSize::new(128, 128).unwrap()).unwrap();
        assert_eq!(grid.tile_index(&Region::new(256, 128, 44, 128)), Some(5));
        assert_eq!(grid.tile_index(&Region::new(256, 128, 128, 128)), None);
        assert_eq!(grid.tile_index(&Region::new(10, 0, 128, 128)), None);
        assert_eq!(grid.tile_index(&Region::new(384, 0, 44, 128)), None);
    }
}
