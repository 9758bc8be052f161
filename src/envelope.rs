use geo::{coord, Rect};

/// An axis-aligned bounding box in projected (EPSG:3857) meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Builds an envelope from two opposite corners in any order.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Envelope {
        Envelope {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grows the envelope by `dx` on the left and right and `dy` on the top and bottom.
    pub fn expand_by(&self, dx: f64, dy: f64) -> Envelope {
        Envelope {
            min_x: self.min_x - dx,
            min_y: self.min_y - dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
        }
    }

    /// The envelope grown by its own width and height on every side, making it three
    /// times as wide and tall. Fetching with this keeps geometries and labels that
    /// straddle the tile edge from being cut off.
    pub fn padded(&self) -> Envelope {
        self.expand_by(self.width(), self.height())
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }
}

impl From<Rect<f64>> for Envelope {
    fn from(rect: Rect<f64>) -> Envelope {
        Envelope {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_is_three_times_the_size() {
        let envelope = Envelope::new(10.0, 20.0, 30.0, 60.0);
        let padded = envelope.padded();

        assert_eq!(padded.width(), envelope.width() * 3.0);
        assert_eq!(padded.height(), envelope.height() * 3.0);
        assert_eq!(padded, Envelope::new(-10.0, -20.0, 50.0, 100.0));
    }

    #[test]
    fn test_new_orders_corners() {
        let envelope = Envelope::new(5.0, 5.0, -5.0, -5.0);
        assert!(envelope.min_x <= envelope.max_x);
        assert!(envelope.min_y <= envelope.max_y);
    }

    #[test]
    fn test_intersects_touching_edges() {
        let a = Envelope::new(0.0, 0.0, 10.0, 10.0);
        let b = Envelope::new(10.0, 0.0, 20.0, 10.0);
        let c = Envelope::new(10.1, 0.0, 20.0, 10.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
