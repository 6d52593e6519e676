//! Pixel rectangles used for the full window and per-eye regions.

/// Viewport rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Width over height; 1.0 for a zero-height rectangle.
    pub fn aspect(&self) -> f32 {
        if self.h == 0 {
            1.0
        } else {
            self.w as f32 / self.h as f32
        }
    }

    /// Left and right halves. With an odd width the right half gets the
    /// extra column, so the halves always tile the full rectangle.
    pub fn split_left_right(&self) -> (Viewport, Viewport) {
        let half = self.w / 2;
        let left = Viewport::new(self.x, self.y, half, self.h);
        let right = Viewport::new(self.x + half, self.y, self.w - half, self.h);
        (left, right)
    }

    /// Rectangle scaled by the scene render scale, each component rounded up.
    pub fn scaled(&self, scale: f32) -> Viewport {
        let s = |v: i32| (scale * v as f32).ceil() as i32;
        Viewport::new(s(self.x), s(self.y), s(self.w), s(self.h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reconstructs_full() {
        let full = Viewport::new(10, 20, 1281, 800);
        let (l, r) = full.split_left_right();
        assert_eq!(l.x, full.x);
        assert_eq!(l.x + l.w, r.x);
        assert_eq!(l.w + r.w, full.w);
        assert_eq!(l.h, full.h);
        assert_eq!(r.y, full.y);
    }

    #[test]
    fn test_scaled_rounds_up() {
        let vp = Viewport::new(0, 0, 640, 801).scaled(1.5);
        assert_eq!(vp, Viewport::new(0, 0, 960, 1202));
    }

    #[test]
    fn test_zero_height_aspect() {
        assert_eq!(Viewport::new(0, 0, 100, 0).aspect(), 1.0);
    }
}
