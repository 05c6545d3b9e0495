// file: inference.rs
// desc: classifier capability, model readiness gate and predict sequencing

use std::rc::Rc;

use image::RgbaImage;

use crate::canvas::{DrawingSurface, Point, Region};
use crate::error::{RecognizerError, Result};
use crate::preprocess::{self, NormalizedImage};

pub const DIGIT_CLASSES: usize = 10;

/// Anything that maps a normalized digit image to one score per digit.
///
/// The input is consumed and the returned scores are dropped by the caller
/// as soon as the prediction has been read, so nothing outlives one call.
pub trait Classifier {
    type Scores: AsRef<[f32]>;

    fn predict(&self, input: NormalizedImage) -> Result<Self::Scores>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub digit: u8,
    /// Probability of `digit`, as a percentage.
    pub confidence: f32,
}

impl Prediction {
    /// Argmax over exactly ten scores. Ties go to the lowest digit.
    pub fn from_scores(scores: &[f32]) -> Result<Self> {
        if scores.len() != DIGIT_CLASSES {
            return Err(RecognizerError::InvalidScores(format!(
                "expected {} scores, got {}",
                DIGIT_CLASSES,
                scores.len()
            )));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(RecognizerError::InvalidScores(format!("non-finite score {}", bad)));
        }

        let (digit, best) = scores
            .iter()
            .copied()
            .enumerate()
            .fold((0, scores[0]), |best, (i, s)| if s > best.1 { (i, s) } else { best });

        Ok(Self {
            digit: digit as u8,
            confidence: (best * 100.0).clamp(0.0, 100.0),
        })
    }

    pub fn confidence_label(&self) -> String {
        format!("{:.0}% sure", self.confidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed,
}

enum GateState<C> {
    Loading,
    Ready(Rc<C>),
    Failed(RecognizerError),
}

/// Holds the classifier once it has loaded. Only the first outcome (load
/// result or timeout) is accepted.
pub struct ModelGate<C> {
    state: GateState<C>,
}

impl<C> Default for ModelGate<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ModelGate<C> {
    pub fn new() -> Self {
        Self {
            state: GateState::Loading,
        }
    }

    pub fn status(&self) -> ModelStatus {
        match self.state {
            GateState::Loading => ModelStatus::Loading,
            GateState::Ready(_) => ModelStatus::Ready,
            GateState::Failed(_) => ModelStatus::Failed,
        }
    }

    pub fn failure(&self) -> Option<&RecognizerError> {
        match &self.state {
            GateState::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn ready(&self) -> Option<Rc<C>> {
        match &self.state {
            GateState::Ready(classifier) => Some(Rc::clone(classifier)),
            _ => None,
        }
    }

    pub fn publish(&mut self, loaded: Result<C>) -> bool {
        if !matches!(self.state, GateState::Loading) {
            log::warn!("Ignoring model load result, model is already {:?}", self.status());
            return false;
        }

        self.state = match loaded {
            Ok(classifier) => {
                log::info!("Digit model ready");
                GateState::Ready(Rc::new(classifier))
            }
            Err(e) => {
                log::error!("Digit model unavailable: {}", e);
                GateState::Failed(e)
            }
        };
        true
    }

    pub fn time_out(&mut self, after_ms: u32) -> bool {
        if !matches!(self.state, GateState::Loading) {
            return false;
        }

        let error = RecognizerError::LoadTimeout(after_ms);
        log::error!("Digit model unavailable: {}", error);
        self.state = GateState::Failed(error);
        true
    }
}

/// Everything one prediction needs, detached from the live surface.
pub struct PredictJob<C> {
    sequence: u64,
    snapshot: RgbaImage,
    classifier: Rc<C>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictOutcome {
    sequence: u64,
    /// `Ok(None)` when nothing was drawn and the classifier was not invoked.
    result: Result<Option<Prediction>>,
}

impl PredictOutcome {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn result(&self) -> &Result<Option<Prediction>> {
        &self.result
    }
}

impl<C: Classifier> PredictJob<C> {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn run(self) -> PredictOutcome {
        let result = self.evaluate();
        PredictOutcome {
            sequence: self.sequence,
            result,
        }
    }

    fn evaluate(&self) -> Result<Option<Prediction>> {
        let Some(input) = preprocess::prepare(&self.snapshot)? else {
            return Ok(None);
        };

        let scores = self.classifier.predict(input)?;
        Prediction::from_scores(scores.as_ref()).map(Some)
    }
}

/// Drawing surface, model gate and the displayed prediction.
///
/// Every stroke end that produces a job and every clear advances the
/// sequence number; outcomes carrying an older number are dropped, so the
/// most recently issued prediction always wins.
pub struct Recognizer<C> {
    surface: DrawingSurface,
    gate: ModelGate<C>,
    prediction: Option<Prediction>,
    sequence: u64,
}

impl<C> Default for Recognizer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Recognizer<C> {
    pub fn new() -> Self {
        Self {
            surface: DrawingSurface::new(),
            gate: ModelGate::new(),
            prediction: None,
            sequence: 0,
        }
    }

    pub fn surface(&self) -> &DrawingSurface {
        &self.surface
    }

    pub fn prediction(&self) -> Option<Prediction> {
        self.prediction
    }

    pub fn model_status(&self) -> ModelStatus {
        self.gate.status()
    }

    pub fn model(&self) -> &ModelGate<C> {
        &self.gate
    }

    pub fn publish_model(&mut self, loaded: Result<C>) -> bool {
        self.gate.publish(loaded)
    }

    pub fn time_out_model(&mut self, after_ms: u32) -> bool {
        self.gate.time_out(after_ms)
    }

    pub fn begin_stroke(&mut self, point: Point) {
        self.surface.begin_stroke(point);
    }

    pub fn extend_stroke(&mut self, point: Point) -> Option<Region> {
        self.surface.extend_stroke(point)
    }

    /// Close the active stroke and hand back a prediction job for it.
    /// Yields nothing when no stroke was active or the model is not ready.
    pub fn end_stroke(&mut self) -> Option<PredictJob<C>> {
        if !self.surface.end_stroke() {
            return None;
        }

        let Some(classifier) = self.gate.ready() else {
            log::debug!("Model is {:?}, skipping prediction", self.gate.status());
            return None;
        };

        self.sequence += 1;
        Some(PredictJob {
            sequence: self.sequence,
            snapshot: self.surface.snapshot(),
            classifier,
        })
    }

    pub fn clear(&mut self) {
        self.surface.clear();
        self.prediction = None;
        self.sequence += 1;
    }

    /// Returns whether the displayed prediction changed.
    pub fn apply(&mut self, outcome: PredictOutcome) -> bool {
        if outcome.sequence != self.sequence {
            log::debug!(
                "Discarding stale prediction #{} (current #{})",
                outcome.sequence,
                self.sequence
            );
            return false;
        }

        match outcome.result {
            Ok(Some(prediction)) => {
                log::debug!(
                    "Predicted {} with {:.1}% confidence",
                    prediction.digit,
                    prediction.confidence
                );
                self.prediction = Some(prediction);
                true
            }
            Ok(None) => {
                log::debug!("Nothing drawn, prediction unchanged");
                false
            }
            Err(e) => {
                log::warn!("Prediction failed: {}", e);
                false
            }
        }
    }
}
