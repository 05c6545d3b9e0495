// file: model.rs
// desc: digit classifier network, loaded at runtime from a burn record

use burn::{
    backend::ndarray::NdArray,
    module::Module,
    nn::{
        Linear, LinearConfig, Relu,
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{Tensor, activation::softmax},
};

use crate::error::{RecognizerError, Result};
use crate::inference::{Classifier, DIGIT_CLASSES};
use crate::preprocess::{IMAGE_SIDE, NormalizedImage};

type Backend = NdArray<f32>;

/// Small two-stage CNN: `[batch, 1, 28, 28]` in, `[batch, 10]` probabilities out.
#[derive(Module, Debug)]
pub struct DigitNet<B: burn::tensor::backend::Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: burn::tensor::backend::Backend> DigitNet<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            conv1: Conv2dConfig::new([1, 8], [3, 3]).init(device),
            conv2: Conv2dConfig::new([8, 16], [3, 3]).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            // 28 -> 26 -> 13 -> 11 -> 5
            fc1: LinearConfig::new(16 * 5 * 5, 64).init(device),
            fc2: LinearConfig::new(64, DIGIT_CLASSES).init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(self.activation.forward(self.conv1.forward(input)));
        let x = self.pool.forward(self.activation.forward(self.conv2.forward(x)));
        let x = x.flatten::<2>(1, 3);
        let x = self.activation.forward(self.fc1.forward(x));

        softmax(self.fc2.forward(x), 1)
    }
}

pub struct DigitClassifier {
    model: DigitNet<Backend>,
    device: <Backend as burn::tensor::backend::Backend>::Device,
}

impl DigitClassifier {
    /// Decode a bincode `DigitNet` record and warm the model up.
    pub fn from_record_bytes(bytes: Vec<u8>) -> Result<Self> {
        let device = <Backend as burn::tensor::backend::Backend>::Device::default();

        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(bytes, &device)
            .map_err(|e| RecognizerError::ModelLoad(format!("{:?}", e)))?;
        let model = DigitNet::new(&device).load_record(record);

        Self::from_model(model)
    }

    pub fn from_model(model: DigitNet<Backend>) -> Result<Self> {
        let classifier = Self {
            model,
            device: Default::default(),
        };
        classifier.warm_up()?;
        Ok(classifier)
    }

    pub fn to_record_bytes(&self) -> Result<Vec<u8>> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(self.model.clone().into_record(), ())
            .map_err(|e| RecognizerError::ModelLoad(format!("{:?}", e)))
    }

    // First forward pass on a blank image. Surfaces shape problems at load
    // time instead of on the visitor's first stroke.
    fn warm_up(&self) -> Result<()> {
        let scores = self.predict(NormalizedImage::zeros())?;
        if scores.len() != DIGIT_CLASSES {
            return Err(RecognizerError::ModelShape(scores.len()));
        }
        log::debug!("Digit model warm-up complete");
        Ok(())
    }
}

impl Classifier for DigitClassifier {
    type Scores = Vec<f32>;

    fn predict(&self, input: NormalizedImage) -> Result<Vec<f32>> {
        let tensor = Tensor::<Backend, 1>::from_floats(input.as_slice(), &self.device)
            .reshape([1, 1, IMAGE_SIDE, IMAGE_SIDE]);

        let output = self.model.forward(tensor);
        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| RecognizerError::Inference(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawingSurface, Point};
    use crate::inference::Prediction;
    use crate::preprocess::normalize;

    fn untrained() -> DigitNet<Backend> {
        DigitNet::new(&Default::default())
    }

    #[test]
    fn forward_yields_a_distribution() {
        let classifier = DigitClassifier::from_model(untrained()).unwrap();
        let scores = classifier.predict(NormalizedImage::zeros()).unwrap();

        assert_eq!(scores.len(), DIGIT_CLASSES);
        assert!(scores.iter().all(|&s| (0.0..=1.0).contains(&s)));
        let total: f32 = scores.iter().sum();
        assert!((total - 1.0).abs() < 1e-4, "scores sum to {total}");
    }

    #[test]
    fn record_bytes_round_trip() {
        let original = DigitClassifier::from_model(untrained()).unwrap();
        let bytes = original.to_record_bytes().unwrap();
        let loaded = DigitClassifier::from_record_bytes(bytes).unwrap();

        let mut surface = DrawingSurface::new();
        surface.begin_stroke(Point::new(200.0, 80.0));
        surface.extend_stroke(Point::new(200.0, 320.0));
        let input = normalize(&surface.snapshot());

        let expected = original.predict(input.clone()).unwrap();
        let actual = loaded.predict(input).unwrap();
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(
            Prediction::from_scores(&expected).unwrap().digit,
            Prediction::from_scores(&actual).unwrap().digit
        );
    }

    #[test]
    fn corrupt_record_is_a_load_error() {
        let result = DigitClassifier::from_record_bytes(vec![0xde, 0xad, 0xbe]);
        assert!(matches!(result, Err(RecognizerError::ModelLoad(_))));
    }
}
