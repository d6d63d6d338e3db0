use serde::{Serialize, Deserialize};
use uuid::Uuid;

pub mod history;

pub use history::{BoardHistory, StaleEpoch};

/// One point of a freehand path, in board coordinates.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Stroke payload as submitted by a client: geometry plus style.
///
/// Sequence number and timestamp are assigned by the history store on
/// append, not by the client.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct StrokeInput {
    pub path: Vec<Point>,
    /// RGBA color
    pub color: [f32; 4],
    pub width: f32,
}

/// A stroke accepted into a board's history. Immutable once appended.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct StrokeRecord {
    /// Sequence number, monotonic per board per epoch.
    pub seq: u64,
    /// Connection that authored the stroke.
    pub author: Uuid,
    pub path: Vec<Point>,
    /// RGBA color
    pub color: [f32; 4],
    pub width: f32,
    /// Server-assigned, Unix millis.
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stroke_input_holds_geometry() {
        let input = StrokeInput {
            path: vec![Point::new(0.0, 0.0), Point::new(10.0, 5.0)],
            color: [1.0, 0.0, 0.0, 1.0],
            width: 2.5,
        };
        assert_eq!(input.path.len(), 2);
        assert_eq!(input.path[1].x, 10.0);
        assert_eq!(input.width, 2.5);
    }

    #[test]
    fn test_point_default_is_origin() {
        let p = Point::default();
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, 0.0);
    }
}
