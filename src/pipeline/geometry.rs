//! Mapping between document space and raster pixels, and table-title lookup.
//!
//! Converter boxes use PDF points with the origin at the bottom-left; rasters
//! have their origin at the top-left. Every crop goes through
//! [`bbox_to_pixel_crop`], which never yields a rectangle outside the image.

use crate::config::TitleRules;
use crate::model::{BBox, TextBlock};

/// Pixel rectangle `[left, right) × [top, bottom)` inside a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Convert a document-space box to a pixel crop rectangle.
///
/// Returns `None` when the page dimensions are not positive or the clamped
/// rectangle is empty.
pub fn bbox_to_pixel_crop(
    bbox: &BBox,
    page_w: f64,
    page_h: f64,
    img_w: u32,
    img_h: u32,
) -> Option<PixelRect> {
    if !(page_w > 0.0 && page_h > 0.0) {
        return None;
    }
    let scale_x = img_w as f64 / page_w;
    let scale_y = img_h as f64 / page_h;

    let clamp = |v: f64, max: u32| -> u32 {
        if v.is_nan() {
            0
        } else {
            v.round().clamp(0.0, max as f64) as u32
        }
    };
    let left = clamp(bbox.left * scale_x, img_w);
    let right = clamp(bbox.right * scale_x, img_w);
    let top = clamp((page_h - bbox.top) * scale_y, img_h);
    let bottom = clamp((page_h - bbox.bottom) * scale_y, img_h);

    if right <= left || bottom <= top {
        return None;
    }
    Some(PixelRect {
        left,
        top,
        right,
        bottom,
    })
}

/// Overlap width divided by the narrower of the two boxes.
pub fn horizontal_overlap_ratio(a: &BBox, b: &BBox) -> f64 {
    let left = a.left.max(b.left);
    let right = a.right.min(b.right);
    if right <= left {
        return 0.0;
    }
    let width_a = (a.right - a.left).max(1e-3);
    let width_b = (b.right - b.left).max(1e-3);
    (right - left) / width_a.min(width_b)
}

/// Pick the text block that best serves as the table's title.
///
/// A block is eligible when it overlaps the table horizontally, is short, and
/// sits just above the table top. Among eligible blocks the one minimising
/// `gap − 10·overlap` wins; the first one enumerated wins ties.
pub fn detect_table_title(table: &BBox, blocks: &[TextBlock], rules: &TitleRules) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for block in blocks {
        let overlap = horizontal_overlap_ratio(&block.bbox, table);
        if overlap < rules.min_overlap {
            continue;
        }
        let len = block.text.chars().count();
        if len == 0 || len > rules.max_chars {
            continue;
        }
        let gap = block.bbox.bottom - table.top;
        if !(0.0..=rules.max_gap).contains(&gap) {
            continue;
        }
        let score = gap - overlap * 10.0;
        if best.map_or(true, |(_, s)| score < s) {
            best = Some((block.text.as_str(), score));
        }
    }
    best.map(|(text, _)| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(text: &str, left: f64, top: f64, right: f64, bottom: f64) -> TextBlock {
        TextBlock {
            text: text.into(),
            bbox: BBox::new(left, top, right, bottom),
        }
    }

    #[test]
    fn crop_scales_and_flips() {
        // 100×200 pt page rendered at 2×.
        let r = bbox_to_pixel_crop(&BBox::new(10.0, 190.0, 60.0, 150.0), 100.0, 200.0, 200, 400).unwrap();
        assert_eq!(r, PixelRect { left: 20, top: 20, right: 120, bottom: 100 });
        assert_eq!(r.width(), 100);
        assert_eq!(r.height(), 80);
    }

    #[test]
    fn crop_is_clamped_inside_image() {
        let boxes = [
            BBox::new(-50.0, 900.0, 500.0, -20.0),
            BBox::new(90.0, 210.0, 130.0, 195.0),
            BBox::new(0.0, 200.0, 100.0, 0.0),
            BBox::new(f64::NAN, 10.0, 20.0, 5.0),
        ];
        for b in boxes {
            if let Some(r) = bbox_to_pixel_crop(&b, 100.0, 200.0, 150, 300) {
                assert!(r.right <= 150 && r.bottom <= 300, "{b:?} → {r:?}");
                assert!(r.left < r.right && r.top < r.bottom);
            }
        }
    }

    #[test]
    fn degenerate_crop_is_none() {
        assert!(bbox_to_pixel_crop(&BBox::new(50.0, 100.0, 50.0, 10.0), 100.0, 200.0, 200, 400).is_none());
        assert!(bbox_to_pixel_crop(&BBox::new(10.0, 100.0, 20.0, 100.0), 100.0, 200.0, 200, 400).is_none());
        assert!(bbox_to_pixel_crop(&BBox::new(10.0, 100.0, 20.0, 50.0), 0.0, 200.0, 200, 400).is_none());
        // Entirely off the page.
        assert!(bbox_to_pixel_crop(&BBox::new(150.0, 100.0, 180.0, 50.0), 100.0, 200.0, 200, 400).is_none());
    }

    #[test]
    fn overlap_ratio_uses_narrower_box() {
        let a = BBox::new(0.0, 10.0, 100.0, 0.0);
        let b = BBox::new(50.0, 10.0, 70.0, 0.0);
        assert_eq!(horizontal_overlap_ratio(&a, &b), 1.0);
        assert_eq!(horizontal_overlap_ratio(&a, &BBox::new(200.0, 1.0, 300.0, 0.0)), 0.0);
    }

    #[test]
    fn title_picks_closest_block_above() {
        let table = BBox::new(50.0, 500.0, 550.0, 300.0);
        let blocks = vec![
            block("환경 성과", 50.0, 640.0, 300.0, 625.0),          // gap 125, too far
            block("온실가스 배출량 현황", 50.0, 530.0, 300.0, 510.0), // gap 10
            block("단위: tCO2eq", 400.0, 512.0, 550.0, 503.0),      // gap 3, overlap 1
            block("본문 아래", 50.0, 290.0, 300.0, 280.0),          // below the table
        ];
        let rules = TitleRules::default();
        // 3 − 10 beats 10 − 10.
        assert_eq!(detect_table_title(&table, &blocks, &rules).as_deref(), Some("단위: tCO2eq"));
        assert_eq!(
            detect_table_title(&table, &blocks[..2], &rules).as_deref(),
            Some("온실가스 배출량 현황")
        );
    }

    #[test]
    fn title_ties_keep_first() {
        let table = BBox::new(0.0, 100.0, 200.0, 0.0);
        let blocks = vec![
            block("첫 번째", 0.0, 120.0, 100.0, 110.0),
            block("두 번째", 100.0, 120.0, 200.0, 110.0),
        ];
        assert_eq!(
            detect_table_title(&table, &blocks, &TitleRules::default()).as_deref(),
            Some("첫 번째")
        );
    }

    #[test]
    fn title_rejects_long_or_narrow_blocks() {
        let table = BBox::new(0.0, 100.0, 200.0, 0.0);
        let long = "가".repeat(61);
        let blocks = vec![
            block(&long, 0.0, 120.0, 200.0, 110.0),
            block("옆 블록", 190.0, 120.0, 400.0, 110.0),
            block("", 0.0, 120.0, 200.0, 110.0),
        ];
        assert!(detect_table_title(&table, &blocks, &TitleRules::default()).is_none());
    }
}
