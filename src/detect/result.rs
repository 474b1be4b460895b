use serde::Serialize;

/// Detection as produced by an engine, before label resolution.
///
/// `bbox` is `[x1, y1, x2, y2]` in source-image pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

impl RawDetection {
    pub fn new(class_id: usize, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// One recognized food item.
///
/// Fields are read-only; `area` is always derived from `bbox` at construction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    class_id: usize,
    class_name: String,
    confidence: f32,
    bbox: [f32; 4],
    area: f32,
}

impl Detection {
    /// Build a detection. Corners are reordered so that `x1 <= x2` and `y1 <= y2`,
    /// and confidence is clamped into `[0, 1]`.
    pub fn new(
        class_id: usize,
        class_name: impl Into<String>,
        confidence: f32,
        bbox: [f32; 4],
    ) -> Self {
        let [ax, ay, bx, by] = bbox;
        let bbox = [ax.min(bx), ay.min(by), ax.max(bx), ay.max(by)];
        let area = (bbox[2] - bbox[0]) * (bbox[3] - bbox[1]);
        Self {
            class_id,
            class_name: class_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            area,
        }
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> [f32; 4] {
        self.bbox
    }

    pub fn area(&self) -> f32 {
        self.area
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_is_derived_from_bbox() {
        let det = Detection::new(3, "boiled egg", 0.9, [10.0, 20.0, 40.0, 60.0]);
        assert_eq!(det.area(), 30.0 * 40.0);
    }

    #[test]
    fn swapped_corners_are_normalized() {
        let det = Detection::new(0, "rice", 0.5, [50.0, 80.0, 10.0, 20.0]);
        assert_eq!(det.bbox(), [10.0, 20.0, 50.0, 80.0]);
        assert_eq!(det.area(), 40.0 * 60.0);
    }

    #[test]
    fn serializes_with_area() {
        let det = Detection::new(20, "rice", 0.5, [0.0, 0.0, 2.0, 3.0]);
        let value = serde_json::to_value(&det).unwrap();
        assert_eq!(value["class_id"], 20);
        assert_eq!(value["class_name"], "rice");
        assert_eq!(value["bbox"].as_array().unwrap().len(), 4);
        assert_eq!(value["area"], 6.0);
    }
}
