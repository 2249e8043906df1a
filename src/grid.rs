//! Thumbnail grid layout for the gallery view.
//!
//! All geometry is computed from plain numbers so the layout can be tested
//! without a window. Coordinates follow nannou's convention: origin at the
//! window center, y up. Each cell is `thumb_size + gap` square with the
//! thumbnail centered inside it.

/// Rows of thumbnails kept warm beyond the visible viewport.
pub const PREFETCH_ROWS: usize = 1;

#[derive(Debug, Clone, Copy)]
pub struct GalleryGrid {
    width: f32,
    height: f32,
    cell: f32,
    cols: usize,
    rows: usize,
    half_gap: f32,
    thumb_size: f32,
    scroll: f32,
    total: usize,
}

impl GalleryGrid {
    pub fn new(width: f32, height: f32, thumb_size: f32, gap: f32, scroll: f32, total: usize) -> Self {
        let cell = thumb_size + gap;
        let cols = (((width + gap) / cell).floor() as isize).max(1) as usize;
        Self {
            width,
            height,
            cell,
            cols,
            rows: total.div_ceil(cols),
            half_gap: gap / 2.0,
            thumb_size,
            scroll,
            total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Scroll offset at which the last row rests at the bottom edge.
    pub fn max_scroll(&self) -> f32 {
        (self.rows as f32 * self.cell - self.height).max(0.0)
    }

    /// Inclusive row range worth keeping textures for, i.e. the rows
    /// intersecting the viewport padded by [`PREFETCH_ROWS`].
    pub fn visible_rows(&self) -> Option<(usize, usize)> {
        if self.is_empty() {
            return None;
        }
        let first = (self.scroll - self.thumb_size - self.half_gap) / self.cell;
        let last = (self.height + self.scroll - self.half_gap) / self.cell;
        let mut row_min = first.ceil() as isize - PREFETCH_ROWS as isize;
        let mut row_max = last.floor() as isize + PREFETCH_ROWS as isize;
        let bottom_row = self.rows.saturating_sub(1) as isize;
        row_min = row_min.max(0);
        row_max = row_max.min(bottom_row).max(row_min);
        Some((row_min as usize, row_max as usize))
    }

    pub fn visible_indices(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        if let Some((row_min, row_max)) = self.visible_rows() {
            for row in row_min..=row_max {
                let base = row * self.cols;
                for col in 0..self.cols {
                    let idx = base + col;
                    if idx >= self.total {
                        break;
                    }
                    indices.push(idx);
                }
            }
        }
        indices
    }

    /// Window-space center of the cell holding `idx`.
    pub fn index_center(&self, idx: usize) -> Option<(f32, f32)> {
        if idx >= self.total {
            return None;
        }
        let row = idx / self.cols;
        let col = idx % self.cols;
        let x = -self.width / 2.0 + self.cell / 2.0 + col as f32 * self.cell;
        let y = self.height / 2.0 - self.cell / 2.0 - row as f32 * self.cell + self.scroll;
        Some((x, y))
    }

    pub fn row_for_index(&self, idx: usize) -> Option<usize> {
        (idx < self.total).then(|| idx / self.cols)
    }

    /// Distance of row `row`'s top edge from the top of the content.
    pub fn row_top(&self, row: usize) -> f32 {
        row as f32 * self.cell
    }

    pub fn row_bottom(&self, row: usize) -> f32 {
        self.row_top(row) + self.cell
    }

    /// Number of occupied cells in `row` (the last row may be partial).
    pub fn row_length(&self, row: usize) -> usize {
        if row >= self.rows {
            return 0;
        }
        self.total.saturating_sub(row * self.cols).min(self.cols)
    }

    /// Load priority for background work: distance from the viewport
    /// center, smaller is sooner.
    pub fn viewport_priority(&self, idx: usize) -> f32 {
        let Some((x, y)) = self.index_center(idx) else {
            return f32::MAX;
        };
        y.abs() + x.abs() * 0.01
    }

    /// Grid cell containing the window-space point, if any. Points in the
    /// gap between thumbnails miss.
    pub fn hit_test(&self, x: f32, y: f32) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        // translate into content space: x from the left edge, y down from
        // the top of the scrolled content
        let gx = x + self.width / 2.0;
        let gy = self.height / 2.0 - y + self.scroll;
        if gx < 0.0 || gy < 0.0 {
            return None;
        }
        let col = (gx / self.cell) as usize;
        let row = (gy / self.cell) as usize;
        if col >= self.cols || row >= self.rows {
            return None;
        }
        let in_x = gx - col as f32 * self.cell;
        let in_y = gy - row as f32 * self.cell;
        let lo = self.half_gap;
        let hi = self.cell - self.half_gap;
        if in_x < lo || in_x > hi || in_y < lo || in_y > hi {
            return None;
        }
        let idx = row * self.cols + col;
        (idx < self.total).then_some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(total: usize) -> GalleryGrid {
        // 4 columns: (800 + 10) / 170 = 4.76
        GalleryGrid::new(800.0, 600.0, 160.0, 10.0, 0.0, total)
    }

    #[test]
    fn column_count_follows_width() {
        assert_eq!(grid(12).cols(), 4);
        assert_eq!(grid(12).rows(), 3);
        // too narrow for one full cell still yields a single column
        let narrow = GalleryGrid::new(100.0, 600.0, 160.0, 10.0, 0.0, 5);
        assert_eq!(narrow.cols(), 1);
        assert_eq!(narrow.rows(), 5);
    }

    #[test]
    fn last_row_may_be_partial() {
        let g = grid(10);
        assert_eq!(g.rows(), 3);
        assert_eq!(g.row_length(0), 4);
        assert_eq!(g.row_length(2), 2);
        assert_eq!(g.row_length(3), 0);
    }

    #[test]
    fn empty_grid_has_nothing_visible() {
        let g = grid(0);
        assert!(g.is_empty());
        assert_eq!(g.visible_rows(), None);
        assert!(g.visible_indices().is_empty());
        assert_eq!(g.hit_test(0.0, 0.0), None);
    }

    #[test]
    fn visible_rows_track_scroll() {
        // 40 items in 4 columns = 10 rows, viewport fits ~3.5 rows
        let top = GalleryGrid::new(800.0, 600.0, 160.0, 10.0, 0.0, 40);
        let (first, last) = top.visible_rows().unwrap();
        assert_eq!(first, 0);
        assert!(last >= 3);
        assert!(last < 6);

        let scrolled = GalleryGrid::new(800.0, 600.0, 160.0, 10.0, 900.0, 40);
        let (first, last) = scrolled.visible_rows().unwrap();
        assert!(first >= 4);
        assert!(last >= first);
        assert!(last <= 9);
    }

    #[test]
    fn visible_indices_stop_at_total() {
        let g = grid(6);
        let indices = g.visible_indices();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn max_scroll_is_zero_when_content_fits() {
        assert_eq!(grid(4).max_scroll(), 0.0);
        let tall = GalleryGrid::new(800.0, 600.0, 160.0, 10.0, 0.0, 40);
        assert!(tall.max_scroll() > 0.0);
    }

    #[test]
    fn hit_test_round_trips_index_center() {
        let g = grid(10);
        for idx in 0..10 {
            let (x, y) = g.index_center(idx).unwrap();
            assert_eq!(g.hit_test(x, y), Some(idx), "index {idx}");
        }
    }

    #[test]
    fn hit_test_misses_the_gap_and_the_void() {
        let g = grid(10);
        // exactly between the first two cells
        let (x0, y0) = g.index_center(0).unwrap();
        let (x1, _) = g.index_center(1).unwrap();
        assert_eq!(g.hit_test((x0 + x1) / 2.0 + 0.1, y0), None);
        // beyond the last occupied cell of the partial row
        let (x, y) = g.index_center(9).unwrap();
        assert_eq!(g.hit_test(x + 340.0, y), None);
        // off the left edge
        assert_eq!(g.hit_test(-500.0, y0), None);
    }

    #[test]
    fn index_center_respects_scroll() {
        let still = grid(10);
        let scrolled = GalleryGrid::new(800.0, 600.0, 160.0, 10.0, 170.0, 10);
        let (_, y_still) = still.index_center(0).unwrap();
        let (_, y_scrolled) = scrolled.index_center(0).unwrap();
        assert!((y_scrolled - y_still - 170.0).abs() < f32::EPSILON);
    }

    #[test]
    fn priority_prefers_the_viewport_center() {
        let g = GalleryGrid::new(800.0, 600.0, 160.0, 10.0, 400.0, 40);
        let (first, last) = g.visible_rows().unwrap();
        let mid_row = (first + last) / 2;
        let center_idx = mid_row * g.cols();
        assert!(g.viewport_priority(center_idx) < g.viewport_priority(0));
        assert_eq!(g.viewport_priority(usize::MAX), f32::MAX);
    }
}
