//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - carried through fitting without borrowing the signal
//! - exported to JSON/CSV
//! - reloaded later for comparisons

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::metadata::DictionaryTree;

/// Microscope settings an EELS model needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EelsParameters {
    /// Beam energy in keV.
    pub beam_energy: f64,
    /// Convergence semi-angle in mrad.
    pub convergence_angle: f64,
    /// Collection semi-angle in mrad.
    pub collection_angle: f64,
}

impl Default for EelsParameters {
    fn default() -> Self {
        Self {
            beam_energy: 100.0,
            convergence_angle: 15.0,
            collection_angle: 10.0,
        }
    }
}

/// Which microscope an EDS acquisition was made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdsMicroscope {
    Sem,
    Tem,
}

/// Detector geometry and resolution for EDS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdsParameters {
    pub microscope: EdsMicroscope,
    /// Beam energy in kV.
    pub beam_energy: f64,
    /// Stage tilt in degrees.
    pub tilt_stage: f64,
    /// Detector azimuth in degrees.
    pub azimuth_angle: f64,
    /// Detector elevation in degrees.
    pub elevation_angle: f64,
    /// FWHM of Mn Kα in eV.
    pub energy_resolution_mnka: f64,
}

impl Default for EdsParameters {
    fn default() -> Self {
        Self {
            microscope: EdsMicroscope::Sem,
            beam_energy: 15.0,
            tilt_stage: 0.0,
            azimuth_angle: 0.0,
            elevation_angle: 35.0,
            energy_resolution_mnka: 130.0,
        }
    }
}

/// What kind of signal a dataset holds.
///
/// The kind decides which components `model::create_model` adds and which
/// instrument parameters are available to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalKind {
    Generic,
    Eels(EelsParameters),
    Eds(EdsParameters),
}

impl SignalKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            SignalKind::Generic => "Signal",
            SignalKind::Eels(_) => "EELS",
            SignalKind::Eds(p) => match p.microscope {
                EdsMicroscope::Sem => "EDS_SEM",
                EdsMicroscope::Tem => "EDS_TEM",
            },
        }
    }

    /// Resolve the kind from `Signal.signal_type` and fill instrument
    /// parameters from `Acquisition_instrument.*`, using defaults for
    /// anything missing.
    pub fn from_metadata(md: &DictionaryTree) -> Self {
        let signal_type = md
            .get_str("Signal.signal_type")
            .unwrap_or("")
            .to_ascii_uppercase();
        match signal_type.as_str() {
            "EELS" => {
                let d = EelsParameters::default();
                let tem = "Acquisition_instrument.TEM";
                SignalKind::Eels(EelsParameters {
                    beam_energy: md.get_f64(&format!("{tem}.beam_energy")).unwrap_or(d.beam_energy),
                    convergence_angle: md
                        .get_f64(&format!("{tem}.convergence_angle"))
                        .unwrap_or(d.convergence_angle),
                    collection_angle: md
                        .get_f64(&format!("{tem}.Detector.EELS.collection_angle"))
                        .unwrap_or(d.collection_angle),
                })
            }
            "EDS_SEM" | "EDS_TEM" | "EDS" => {
                let d = EdsParameters::default();
                let (microscope, root) = if signal_type == "EDS_TEM" {
                    (EdsMicroscope::Tem, "Acquisition_instrument.TEM")
                } else {
                    (EdsMicroscope::Sem, "Acquisition_instrument.SEM")
                };
                let get = |key: &str, default: f64| md.get_f64(&format!("{root}.{key}")).unwrap_or(default);
                SignalKind::Eds(EdsParameters {
                    microscope,
                    beam_energy: get("beam_energy", d.beam_energy),
                    tilt_stage: get("tilt_stage", d.tilt_stage),
                    azimuth_angle: get("Detector.EDS.azimuth_angle", d.azimuth_angle),
                    elevation_angle: get("Detector.EDS.elevation_angle", d.elevation_angle),
                    energy_resolution_mnka: get(
                        "Detector.EDS.energy_resolution_MnKa",
                        d.energy_resolution_mnka,
                    ),
                })
            }
            _ => SignalKind::Generic,
        }
    }
}

/// How observations are weighted in the fit objective.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightMode {
    /// Ordinary least squares.
    #[default]
    Uniform,
    /// Counting statistics: weight `1 / max(y, 1)`.
    Poisson,
    /// Explicit per-channel variance; weights are its inverse.
    Variance(Vec<f64>),
}

/// Order in which a multifit visits navigation positions.
///
/// With more than one navigation axis the hot-start chain depends on this
/// order, so it is always explicit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationPath {
    /// Flat navigation order (last navigation axis fastest).
    #[default]
    RowMajor,
    /// Row-major, reversing the fastest axis on every other row so that
    /// consecutive positions are always neighbours.
    Serpentine,
    /// Start at `start` and visit positions by increasing distance from it.
    Outward { start: Vec<usize> },
    /// Caller-supplied flat indices.
    Explicit(Vec<usize>),
}

/// Where each position's initial guess comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// Seed from the previously visited position.
    #[default]
    HotStart,
    /// Always start from the model values captured when the fit began.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    NotFit,
    Fitting,
    Converged,
    Failed,
}

impl FitStatus {
    pub fn display_name(self) -> &'static str {
        match self {
            FitStatus::NotFit => "not fit",
            FitStatus::Fitting => "fitting",
            FitStatus::Converged => "converged",
            FitStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    SingularJacobian,
    MaxIterationsExceeded,
    /// No step reduced chisq before the damping limit was reached.
    Stalled,
    InvalidInitialGuess,
}

impl FailureReason {
    pub fn display_name(self) -> &'static str {
        match self {
            FailureReason::SingularJacobian => "singular Jacobian",
            FailureReason::MaxIterationsExceeded => "max iterations exceeded",
            FailureReason::Stalled => "stalled",
            FailureReason::InvalidInitialGuess => "invalid initial guess",
        }
    }
}

/// Fit record for one navigation position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitState {
    pub status: FitStatus,
    pub failure: Option<FailureReason>,
    /// Free-parameter vector the fit started from.
    #[serde(with = "nan_as_null::vec")]
    pub initial_values: Vec<f64>,
    /// Free-parameter vector retained after the fit.
    #[serde(with = "nan_as_null::vec")]
    pub parameter_values: Vec<f64>,
    #[serde(default, with = "nan_as_null::opt_vec")]
    pub std_errors: Option<Vec<f64>>,
    pub covariance: Option<Vec<Vec<f64>>>,
    #[serde(with = "nan_as_null")]
    pub chisq: f64,
    pub degrees_of_freedom: usize,
    pub iterations: usize,
}

impl FitState {
    /// Fresh record for a position that is about to be fitted.
    pub fn fitting(initial_values: Vec<f64>) -> Self {
        Self {
            status: FitStatus::Fitting,
            failure: None,
            parameter_values: initial_values.clone(),
            initial_values,
            std_errors: None,
            covariance: None,
            chisq: f64::NAN,
            degrees_of_freedom: 0,
            iterations: 0,
        }
    }

    pub fn converged(&self) -> bool {
        self.status == FitStatus::Converged
    }

    pub fn reduced_chisq(&self) -> f64 {
        if self.degrees_of_freedom == 0 {
            f64::NAN
        } else {
            self.chisq / self.degrees_of_freedom as f64
        }
    }
}

/// JSON has no NaN; non-finite values are written as `null` and read back as NaN.
mod nan_as_null {
    use super::*;

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        v.is_finite().then_some(*v).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }

    fn to_options(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|v| v.is_finite().then_some(*v)).collect()
    }

    fn from_options(values: Vec<Option<f64>>) -> Vec<f64> {
        values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
    }

    pub mod vec {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[f64], s: S) -> Result<S::Ok, S::Error> {
            to_options(v).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
            Ok(from_options(Vec::deserialize(d)?))
        }
    }

    pub mod opt_vec {
        use super::*;

        pub fn serialize<S: Serializer>(v: &Option<Vec<f64>>, s: S) -> Result<S::Ok, S::Error> {
            v.as_deref().map(to_options).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<f64>>, D::Error> {
            Ok(Option::<Vec<Option<f64>>>::deserialize(d)?.map(from_options))
        }
    }
}
