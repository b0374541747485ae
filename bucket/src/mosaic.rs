use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use squark_common::frame::FrameBuffer;
use tracing::debug;

/// Fill colour of canvas areas no tile covers.
pub const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Near-square arrangement of `slots` cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub cols: u32,
    pub rows: u32,
}

impl Grid {
    /// `cols = ceil(sqrt(slots))`, `rows = ceil(slots / cols)`.
    pub fn for_slots(slots: u32) -> Self {
        let slots = slots.max(1);
        let mut cols = 1;
        while cols * cols < slots {
            cols += 1;
        }
        Self {
            cols,
            rows: slots.div_ceil(cols),
        }
    }
}

/// Canvas geometry for one mosaic.
///
/// Tiles use integer division, so up to `cols - 1` columns and `rows - 1`
/// rows of pixels on the right and bottom edges stay background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub grid: Grid,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl Layout {
    pub fn new(width: u32, height: u32, slots: u32) -> Self {
        let grid = Grid::for_slots(slots);
        Self {
            width,
            height,
            grid,
            tile_width: width / grid.cols,
            tile_height: height / grid.rows,
        }
    }

    /// Top-left pixel of the cell holding batch entry `index`, row-major.
    pub fn cell_origin(&self, index: usize) -> (u32, u32) {
        let index = index as u32;
        let row = index / self.grid.cols;
        let col = index % self.grid.cols;
        (col * self.tile_width, row * self.tile_height)
    }

    pub fn blank_canvas(&self) -> RgbImage {
        RgbImage::from_pixel(self.width, self.height, BACKGROUND)
    }
}

/// A composed canvas and what happened to each frame of the batch.
pub struct Mosaic {
    pub canvas: RgbImage,
    pub tiles_placed: usize,
    pub map_failures: usize,
    pub degenerate: usize,
}

impl Mosaic {
    pub fn is_empty(&self) -> bool {
        self.canvas.width() == 0 || self.canvas.height() == 0
    }
}

/// Resample `src` to exactly `width x height`.
pub fn resize(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(src, width, height, FilterType::Triangle)
}

/// Copy `src` onto `dst` with its top-left corner at `(x, y)`, clipping at
/// the edges of `dst`.
pub fn blit(dst: &mut RgbImage, x: u32, y: u32, src: &RgbImage) {
    imageops::replace(dst, src, i64::from(x), i64::from(y));
}

/// Tile a batch onto a fresh canvas.
///
/// Frames are consumed: each one is released as soon as it has been copied,
/// or immediately if it cannot be mapped. A frame that cannot be mapped, or
/// whose tile would be empty, leaves its cell at the background colour.
pub fn compose(layout: &Layout, batch: Vec<FrameBuffer>) -> Mosaic {
    let mut mosaic = Mosaic {
        canvas: layout.blank_canvas(),
        tiles_placed: 0,
        map_failures: 0,
        degenerate: 0,
    };

    for (i, frame) in batch.into_iter().enumerate() {
        let pts_ns = frame.pts_ns();
        let source = match frame.into_image() {
            Ok(img) => img,
            Err(e) => {
                debug!(pts_ns, slot = i, error = %e, "failed to map frame, skipping slot");
                mosaic.map_failures += 1;
                continue;
            }
        };

        if layout.tile_width == 0 || layout.tile_height == 0 {
            debug!(pts_ns, slot = i, "tile has no area, leaving background");
            mosaic.degenerate += 1;
            continue;
        }

        let tile = resize(&source, layout.tile_width, layout.tile_height);
        drop(source);

        let (x, y) = layout.cell_origin(i);
        blit(&mut mosaic.canvas, x, y, &tile);
        mosaic.tiles_placed += 1;
    }

    mosaic
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const BLUE: [u8; 3] = [0, 0, 255];
    const YELLOW: [u8; 3] = [255, 255, 0];

    #[test]
    fn grid_sizing() {
        assert_eq!(Grid::for_slots(1), Grid { cols: 1, rows: 1 });
        assert_eq!(Grid::for_slots(2), Grid { cols: 2, rows: 1 });
        assert_eq!(Grid::for_slots(4), Grid { cols: 2, rows: 2 });
        assert_eq!(Grid::for_slots(5), Grid { cols: 3, rows: 2 });
        assert_eq!(Grid::for_slots(9), Grid { cols: 3, rows: 3 });
        assert_eq!(Grid::for_slots(10), Grid { cols: 4, rows: 3 });
        assert_eq!(Grid::for_slots(16), Grid { cols: 4, rows: 4 });
    }

    #[test]
    fn grid_always_fits_all_slots() {
        for n in 1..=16 {
            let g = Grid::for_slots(n);
            assert!(g.cols * g.rows >= n, "grid {g:?} too small for {n}");
            assert!((g.cols - 1) * (g.cols - 1) < n, "grid {g:?} too wide for {n}");
        }
    }

    #[test]
    fn layout_uses_integer_tiles() {
        let layout = Layout::new(100, 50, 9);
        assert_eq!(layout.tile_width, 33);
        assert_eq!(layout.tile_height, 16);
        assert_eq!(layout.cell_origin(0), (0, 0));
        assert_eq!(layout.cell_origin(4), (33, 16));
        assert_eq!(layout.cell_origin(8), (66, 32));
    }

    #[test]
    fn four_colours_in_row_major_order() {
        let layout = Layout::new(4, 4, 4);
        let batch = [RED, GREEN, BLUE, YELLOW]
            .iter()
            .enumerate()
            .map(|(i, &c)| FrameBuffer::solid(2, 2, c, i as u64))
            .collect();

        let mosaic = compose(&layout, batch);
        assert_eq!(mosaic.tiles_placed, 4);

        let canvas = &mosaic.canvas;
        let expect = |x0: u32, y0: u32, colour: [u8; 3]| {
            for y in y0..y0 + 2 {
                for x in x0..x0 + 2 {
                    assert_eq!(canvas.get_pixel(x, y).0, colour, "pixel ({x}, {y})");
                }
            }
        };
        expect(0, 0, RED);
        expect(2, 0, GREEN);
        expect(0, 2, BLUE);
        expect(2, 2, YELLOW);
    }

    #[test]
    fn frames_are_scaled_into_tiles() {
        let layout = Layout::new(8, 8, 4);
        let batch = vec![FrameBuffer::solid(16, 16, [200, 100, 50], 0)];
        let mosaic = compose(&layout, batch);
        assert_eq!(mosaic.tiles_placed, 1);

        let inside = mosaic.canvas.get_pixel(1, 1).0;
        for (got, want) in inside.iter().zip([200u8, 100, 50]) {
            assert!(got.abs_diff(want) <= 1, "got {inside:?}");
        }
        // The remaining cells were never filled.
        assert_eq!(*mosaic.canvas.get_pixel(5, 5), BACKGROUND);
    }

    #[test]
    fn unmappable_frame_leaves_background() {
        let layout = Layout::new(4, 4, 4);
        let batch = vec![
            FrameBuffer::new(vec![1, 2, 3], 2, 2, 0),
            FrameBuffer::solid(2, 2, GREEN, 1),
        ];
        let mosaic = compose(&layout, batch);
        assert_eq!(mosaic.map_failures, 1);
        assert_eq!(mosaic.tiles_placed, 1);
        assert_eq!(*mosaic.canvas.get_pixel(0, 0), BACKGROUND);
        assert_eq!(mosaic.canvas.get_pixel(2, 0).0, GREEN);
    }

    #[test]
    fn zero_sized_tiles_are_skipped() {
        // 9 slots on a 2x2 canvas: tiles are 0x0.
        let layout = Layout::new(2, 2, 9);
        let batch = (0..9).map(|i| FrameBuffer::solid(4, 4, RED, i)).collect();
        let mosaic = compose(&layout, batch);
        assert_eq!(mosaic.degenerate, 9);
        assert_eq!(mosaic.tiles_placed, 0);
        assert!(!mosaic.is_empty());
        assert!(mosaic.canvas.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn edge_remainder_stays_background() {
        let layout = Layout::new(5, 5, 4);
        let batch = (0..4).map(|i| FrameBuffer::solid(2, 2, BLUE, i)).collect();
        let mosaic = compose(&layout, batch);
        assert_eq!(mosaic.tiles_placed, 4);
        for i in 0..5 {
            assert_eq!(*mosaic.canvas.get_pixel(4, i), BACKGROUND);
            assert_eq!(*mosaic.canvas.get_pixel(i, 4), BACKGROUND);
        }
        assert_eq!(mosaic.canvas.get_pixel(3, 3).0, BLUE);
    }
}
