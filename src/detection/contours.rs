use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::models::Contour;

impl Contour {
    fn seed(label: u32, x: u32, y: u32) -> Self {
        Self {
            label,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            pixel_count: 0,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.pixel_count += 1;
    }
}

/// Extent of every foreground region of a binary mask with at least `min_area` pixels,
/// largest first.
pub fn find_contours(mask: &GrayImage, min_area: u32) -> Vec<Contour> {
    let labeled = connected_components(mask, Connectivity::Eight, Luma([0]));

    let mut regions: HashMap<u32, Contour> = HashMap::new();
    for (x, y, label) in labeled.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        regions
            .entry(label)
            .or_insert_with(|| Contour::seed(label, x, y))
            .include(x, y);
    }

    let mut contours: Vec<Contour> = regions
        .into_values()
        .filter(|c| c.pixel_count >= min_area)
        .collect();
    // Ties broken by label so the order is deterministic.
    contours.sort_by(|a, b| b.pixel_count.cmp(&a.pixel_count).then(a.label.cmp(&b.label)));
    contours
}
