//! Pure size and offset calculations used by the pipeline.

use crate::params::{Alignment, AxisAlign, CropRect};

/// Resolve the output box from the requested dimensions and source size.
///
/// A missing dimension is derived from the source aspect ratio (floored);
/// with neither given the source size is kept.
pub fn target_size(requested: (Option<u32>, Option<u32>), source: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (source.0.max(1) as u64, source.1.max(1) as u64);
    match requested {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, ((sh * w as u64) / sw).max(1) as u32),
        (None, Some(h)) => (((sw * h as u64) / sh).max(1) as u32, h),
        (None, None) => (sw as u32, sh as u32),
    }
}

/// Clamp a box to upper bounds without changing a dimension already inside
/// them.
pub fn clamp_size(size: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    (size.0.min(max.0).max(1), size.1.min(max.1).max(1))
}

/// Size that covers `target` while keeping the source aspect ratio.
///
/// The side that fits exactly uses the target size; the other overflows.
pub fn cover_size(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let (tw, th) = (target.0 as f64, target.1 as f64);

    let ratio = if sh * (tw / sw) > th {
        tw / sw
    } else {
        th / sh
    };
    (
        ((sw * ratio).round() as u32).max(target.0),
        ((sh * ratio).round() as u32).max(target.1),
    )
}

/// Largest size inside `target` that keeps the source aspect ratio.
pub fn fit_size(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let ratio = (target.0 as f64 / sw).min(target.1 as f64 / sh);
    (
        ((sw * ratio).round() as u32).clamp(1, target.0.max(1)),
        ((sh * ratio).round() as u32).clamp(1, target.1.max(1)),
    )
}

/// Top-left corner of the `target` window inside a `scaled` image.
pub fn align_offset(align: &Alignment, scaled: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    (
        axis_offset(align.horizontal, scaled.0, target.0),
        axis_offset(align.vertical, scaled.1, target.1),
    )
}

fn axis_offset(align: AxisAlign, scaled: u32, target: u32) -> u32 {
    let overflow = scaled.saturating_sub(target);
    match align {
        AxisAlign::Start => 0,
        AxisAlign::Center => overflow / 2,
        AxisAlign::End => overflow,
    }
}

/// Offset that centres `inner` inside `outer`.
pub fn centered_offset(inner: (u32, u32), outer: (u32, u32)) -> (i64, i64) {
    (
        (outer.0 as i64 - inner.0 as i64) / 2,
        (outer.1 as i64 - inner.1 as i64) / 2,
    )
}

/// How a crop rectangle maps onto the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlacement {
    /// Output canvas size (the rectangle's extent).
    pub canvas: (u32, u32),
    /// Region of the source inside the rectangle, if any.
    pub region: Option<SourceRegion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Where the region lands on the canvas.
    pub dest_x: i64,
    pub dest_y: i64,
}

impl CropPlacement {
    /// True when the rectangle lies fully inside the source.
    pub fn is_inside_source(&self) -> bool {
        matches!(self.region, Some(r) if (r.width, r.height) == self.canvas)
    }
}

/// Intersect a crop rectangle with the source bounds.
pub fn crop_placement(rect: &CropRect, source: (u32, u32)) -> CropPlacement {
    let canvas = (rect.width().max(1), rect.height().max(1));
    let (left, top) = (rect.left(), rect.top());

    let x0 = left.max(0);
    let y0 = top.max(0);
    let x1 = (left + canvas.0 as i64).min(source.0 as i64);
    let y1 = (top + canvas.1 as i64).min(source.1 as i64);

    let region = (x1 > x0 && y1 > y0).then(|| SourceRegion {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
        dest_x: x0 - left,
        dest_y: y0 - top,
    });

    CropPlacement { canvas, region }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_size_derives_missing_dimension() {
        assert_eq!(target_size((Some(400), None), (800, 400)), (400, 200));
        assert_eq!(target_size((None, Some(100)), (800, 400)), (200, 100));
        assert_eq!(target_size((Some(100), None), (300, 200)), (100, 66));
        assert_eq!(target_size((Some(50), Some(60)), (800, 400)), (50, 60));
        assert_eq!(target_size((None, None), (64, 32)), (64, 32));
    }

    #[test]
    fn test_target_size_never_zero() {
        assert_eq!(target_size((Some(1), None), (1000, 1)), (1, 1));
    }

    #[test]
    fn test_clamp_size() {
        assert_eq!(clamp_size((2000, 100), (1500, 1500)), (1500, 100));
        assert_eq!(clamp_size((10, 10), (5, 20)), (5, 10));
    }

    #[test]
    fn test_cover_size_and_center_offset() {
        let scaled = cover_size((100, 50), (60, 60));
        assert_eq!(scaled, (120, 60));
        assert_eq!(align_offset(&Alignment::center(), scaled, (60, 60)), (30, 0));
    }

    #[test]
    fn test_cover_size_tall_source() {
        assert_eq!(cover_size((50, 100), (60, 60)), (60, 120));
    }

    #[test]
    fn test_align_offsets() {
        let scaled = (120, 60);
        let target = (60, 60);
        assert_eq!(align_offset(&Alignment::parse("l"), scaled, target), (0, 0));
        assert_eq!(align_offset(&Alignment::parse("r"), scaled, target), (60, 0));

        let scaled = (60, 120);
        assert_eq!(align_offset(&Alignment::parse("t"), scaled, target), (0, 0));
        assert_eq!(align_offset(&Alignment::parse("b"), scaled, target), (0, 60));
        assert_eq!(align_offset(&Alignment::parse("c"), scaled, target), (0, 30));
    }

    #[test]
    fn test_fit_size() {
        assert_eq!(fit_size((400, 200), (200, 200)), (200, 100));
        assert_eq!(fit_size((200, 400), (200, 200)), (100, 200));
        assert_eq!(fit_size((10, 10), (200, 100)), (100, 100));
    }

    #[test]
    fn test_centered_offset() {
        assert_eq!(centered_offset((200, 100), (200, 200)), (0, 50));
        assert_eq!(centered_offset((100, 100), (120, 80)), (10, -10));
    }

    #[test]
    fn test_crop_placement_inside() {
        let rect = CropRect::parse("10,10,50,40").unwrap();
        let placement = crop_placement(&rect, (100, 100));
        assert_eq!(placement.canvas, (40, 30));
        assert!(placement.is_inside_source());
        let region = placement.region.unwrap();
        assert_eq!((region.x, region.y, region.dest_x, region.dest_y), (10, 10, 0, 0));
    }

    #[test]
    fn test_crop_placement_partially_outside() {
        let rect = CropRect::parse("-10,-5,30,20").unwrap();
        let placement = crop_placement(&rect, (20, 20));
        assert_eq!(placement.canvas, (40, 25));
        assert!(!placement.is_inside_source());
        let region = placement.region.unwrap();
        assert_eq!((region.x, region.y), (0, 0));
        assert_eq!((region.width, region.height), (20, 20));
        assert_eq!((region.dest_x, region.dest_y), (10, 5));
    }

    #[test]
    fn test_crop_placement_fully_outside() {
        let rect = CropRect::parse("200,200,220,230").unwrap();
        let placement = crop_placement(&rect, (100, 100));
        assert_eq!(placement.canvas, (20, 30));
        assert!(placement.region.is_none());
    }
}
