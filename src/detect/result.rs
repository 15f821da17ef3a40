use serde::{Deserialize, Serialize};

use crate::zone::BoundingBox;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Model label, e.g. `person` or `bird`.
    pub label: String,
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    /// 0..=1
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        let label = label.into();
        Self {
            class: ObjectClass::from_label(&label),
            label,
            bbox,
            confidence,
        }
    }

    pub fn person(bbox: BoundingBox, confidence: f32) -> Self {
        Self::new("person", bbox, confidence)
    }

    /// Only people take part in zone logic.
    pub fn is_person(&self) -> bool {
        self.class == ObjectClass::Person
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Unknown,
}

impl ObjectClass {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "person" => Self::Person,
            "bicycle" | "car" | "motorcycle" | "airplane" | "bus" | "train" | "truck" | "boat" => {
                Self::Vehicle
            }
            "bird" | "cat" | "dog" | "horse" | "sheep" | "cow" | "elephant" | "bear" | "zebra"
            | "giraffe" => Self::Animal,
            _ => Self::Unknown,
        }
    }
}
