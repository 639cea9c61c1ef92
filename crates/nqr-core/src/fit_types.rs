//! Fit result types stored alongside a measurement

use serde::{Deserialize, Serialize};

/// Which representation of the measurement a fit was made on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitDomain {
    /// Magnitude of the time-domain signal
    Time,
    /// Magnitude of the spectrum
    Frequency,
}

/// Result of fitting a model to a measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    /// Model name, e.g. "T2*"
    pub name: String,
    /// Domain the model was fitted in
    pub domain: FitDomain,
    /// Fitted parameters in model order
    pub parameters: Vec<FitParameter>,
    /// Parameter covariance matrix (row-major, square)
    pub covariance: Vec<Vec<f64>>,
    /// Abscissa of the model curve
    pub x: Vec<f64>,
    /// Model curve evaluated at `x`
    pub y: Vec<f64>,
}

/// A single named fit parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParameter {
    pub name: String,
    pub value: f64,
}

impl FitRecord {
    /// Look up a fitted parameter value by name
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }

    /// One-sigma uncertainties from the covariance diagonal
    pub fn standard_errors(&self) -> Vec<f64> {
        self.covariance
            .iter()
            .enumerate()
            .map(|(i, row)| row.get(i).copied().unwrap_or(f64::NAN).abs().sqrt())
            .collect()
    }
}

impl std::fmt::Display for FitDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitDomain::Time => write!(f, "time"),
            FitDomain::Frequency => write!(f, "frequency"),
        }
    }
}

impl std::fmt::Display for FitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.domain)?;
        let errors = self.standard_errors();
        for (i, param) in self.parameters.iter().enumerate() {
            match errors.get(i) {
                Some(err) if err.is_finite() => {
                    write!(f, " {} = {:.6} ± {:.2e}", param.name, param.value, err)?
                }
                _ => write!(f, " {} = {:.6}", param.name, param.value)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FitRecord {
        FitRecord {
            name: "T2*".to_string(),
            domain: FitDomain::Time,
            parameters: vec![
                FitParameter { name: "S0".to_string(), value: 2.0 },
                FitParameter { name: "T2star".to_string(), value: 15.0 },
            ],
            covariance: vec![vec![0.04, 0.0], vec![0.0, 0.25]],
            x: vec![0.0, 1.0],
            y: vec![2.0, 1.9],
        }
    }

    #[test]
    fn test_parameter_lookup() {
        let fit = record();
        assert_eq!(fit.parameter("T2star"), Some(15.0));
        assert_eq!(fit.parameter("missing"), None);
    }

    #[test]
    fn test_standard_errors() {
        let errors = record().standard_errors();
        assert!((errors[0] - 0.2).abs() < 1e-12);
        assert!((errors[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_domain_serializes_lowercase() {
        let json = serde_json::to_string(&FitDomain::Frequency).unwrap();
        assert_eq!(json, "\"frequency\"");
    }
}
