/// A point (or extent) on the reference grid or in component coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Coords {
    pub x: u32,
    pub y: u32,
}

impl Coords {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A rectangle given by its top-left position and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub pos: Coords,
    pub size: Coords,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            pos: Coords::new(x, y),
            size: Coords::new(width, height),
        }
    }

    /// Builds a rectangle from inclusive-exclusive edge coordinates.
    pub fn from_edges(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    pub fn right(&self) -> u32 {
        self.pos.x + self.size.x
    }

    pub fn bottom(&self) -> u32 {
        self.pos.y + self.size.y
    }

    pub fn is_empty(&self) -> bool {
        self.size.x == 0 || self.size.y == 0
    }

    pub fn area(&self) -> usize {
        self.size.x as usize * self.size.y as usize
    }

    /// Maps a reference-grid rectangle onto a grid sub-sampled by `factor`.
    pub fn sub_sampled(&self, factor: Coords) -> Self {
        Self::from_edges(
            ceil_div(self.pos.x, factor.x),
            ceil_div(self.pos.y, factor.y),
            ceil_div(self.right(), factor.x),
            ceil_div(self.bottom(), factor.y),
        )
    }

    /// The rectangle seen at a resolution `levels` halvings below this one.
    pub fn reduced(&self, levels: u8) -> Self {
        // 32 halvings collapse any u32 edge to 0 or 1.
        let factor = 1u64.checked_shl(levels.into()).unwrap_or(u64::MAX);
        let edge = |v: u32| u64::from(v).div_ceil(factor) as u32;
        Self::from_edges(edge(self.pos.x), edge(self.pos.y), edge(self.right()), edge(self.bottom()))
    }
}

pub fn ceil_div(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_sampled_odd_origin() {
        // Edges 3..10 on a 2x grid cover component samples 2..5.
        let r = Rect::from_edges(3, 0, 10, 4).sub_sampled(Coords::new(2, 1));
        assert_eq!(r, Rect::new(2, 0, 3, 4));
    }

    #[test]
    fn test_reduced_partitions_match() {
        // Two adjacent tiles must still partition the reduced grid.
        let a = Rect::from_edges(0, 0, 5, 1).reduced(1);
        let b = Rect::from_edges(5, 0, 11, 1).reduced(1);
        let whole = Rect::from_edges(0, 0, 11, 1).reduced(1);
        assert_eq!(a.right(), b.pos.x);
        assert_eq!(a.size.x + b.size.x, whole.size.x);
    }

    #[test]
    fn test_reduced_at_maximum_levels() {
        let r = Rect::from_edges(0, 0, 8, 8);
        assert_eq!(r.reduced(31), Rect::new(0, 0, 1, 1));
        assert_eq!(r.reduced(32), Rect::new(0, 0, 1, 1));
        assert_eq!(Rect::from_edges(u32::MAX - 1, 0, u32::MAX, 1).reduced(32), Rect::new(1, 0, 0, 1));
    }
}
