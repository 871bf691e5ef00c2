#[derive(PartialEq, Debug, Clone, Copy, Default, serde::Deserialize, serde::Serialize)]
pub struct Value {
    pub value: f64,
    pub uncertainty: f64,
}

impl Value {
    pub fn new(value: f64, uncertainty: f64) -> Self {
        Self { value, uncertainty }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} ± {:.3}", self.value, self.uncertainty)
    }
}

/// Fitted linear background of a region. The channel axis starts at `origin`, the
/// first channel of the region.
#[derive(PartialEq, Debug, Clone, Copy, Default, serde::Deserialize, serde::Serialize)]
pub struct Background {
    pub intercept: Value,
    pub slope: Value,
    pub origin: i32,
}

impl Background {
    pub fn at(&self, channel: f64) -> f64 {
        self.intercept.value + self.slope.value * (channel - f64::from(self.origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_measured_from_origin() {
        let background = Background {
            intercept: Value::new(100.0, 1.0),
            slope: Value::new(-0.5, 0.1),
            origin: 1000,
        };
        assert!((background.at(1000.0) - 100.0).abs() < 1e-12);
        assert!((background.at(1010.0) - 95.0).abs() < 1e-12);
        assert_eq!(format!("{}", background.intercept), "100.000 ± 1.000");
    }
}
