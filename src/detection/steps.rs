use crate::pipeline::{PipelineData, PipelineStep, PipelineContext, AttributeValue};
use crate::detection::{preprocessing, contours};
use anyhow::Result;
use image::GenericImageView;

/// Convert image to grayscale
pub struct GrayscaleStep;

impl PipelineStep for GrayscaleStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        Ok(data
            .iter()
            .map(|item| item.with_image(image::DynamicImage::ImageLuma8(preprocessing::to_grayscale(&item.image))))
            .collect())
    }

    fn name(&self) -> &str {
        "Grayscale Conversion"
    }
}

/// Apply Gaussian blur
pub struct BlurStep {
    pub sigma: f32,
}

impl PipelineStep for BlurStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let gray = item.image.to_luma8();
            let blurred = preprocessing::apply_blur(&gray, self.sigma);
            result.push(item.with_image(image::DynamicImage::ImageLuma8(blurred)));
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Gaussian Blur"
    }
}

/// Isolate dark regions: pixels at or below `level` become foreground
pub struct InverseThresholdStep {
    pub level: u8,
}

impl PipelineStep for InverseThresholdStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();
        for item in data {
            let gray = item.image.to_luma8();
            let mask = preprocessing::inverse_threshold(&gray, self.level);
            result.push(item.with_image(image::DynamicImage::ImageLuma8(mask)));
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Inverse Threshold"
    }
}

/// Find dark regions in the mask - splits one image into many regions
pub struct ContourDetectionStep {
    pub min_area: u32,
}

impl PipelineStep for ContourDetectionStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();

        for item in data {
            let mask = item.image.to_luma8();
            let detected_contours = contours::find_contours(&mask, self.min_area);
            let (img_width, img_height) = item.original.as_ref().dimensions();

            // Each contour becomes its own PipelineData
            for contour in detected_contours {
                let bbox = contour.bounding_box();
                let cropped = item.original.crop_imm(
                    contour.min_x,
                    contour.min_y,
                    contour.width(),
                    contour.height(),
                );

                let region = PipelineData::from_region(cropped, item.original.clone(), bbox)
                    .with_attribute("pixel_count", AttributeValue::Int(contour.pixel_count as i64))
                    .with_attribute("area_fraction", AttributeValue::Float(contour.area_fraction(img_width, img_height)))
                    .with_attribute("aspect_ratio", AttributeValue::Float(contour.aspect_ratio()));

                result.push(region);
            }
        }

        Ok(result)
    }

    fn name(&self) -> &str {
        "Contour Detection"
    }
}

/// Keep regions of plausible pothole size and shape
pub struct RegionFilterStep {
    pub min_area_fraction: f32,
    pub max_area_fraction: f32,
    /// Rejects elongated shapes such as lane markings and cracks
    pub max_aspect_ratio: f32,
}

impl PipelineStep for RegionFilterStep {
    fn process(&self, data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        let mut result = Vec::new();

        for item in data {
            let area_fraction = item.get_float("area_fraction").unwrap_or(0.0);
            let aspect_ratio = item.get_float("aspect_ratio").unwrap_or(f32::INFINITY);

            let plausible = area_fraction >= self.min_area_fraction
                && area_fraction <= self.max_area_fraction
                && aspect_ratio < self.max_aspect_ratio;

            if plausible {
                result.push(item.with_attribute("is_candidate", AttributeValue::Bool(true)));
            }
        }

        Ok(result)
    }

    fn name(&self) -> &str {
        "Region Filtering"
    }
}

/// Keep at most `max_items` regions (input order is preserved)
pub struct LimitStep {
    pub max_items: usize,
}

impl PipelineStep for LimitStep {
    fn process(&self, mut data: Vec<PipelineData>, _context: &PipelineContext) -> Result<Vec<PipelineData>> {
        data.truncate(self.max_items);
        Ok(data)
    }

    fn name(&self) -> &str {
        "Limit"
    }
}
