//! JSON payloads returned to inference clients.

use crate::inference::{InferenceError, PredictionResult, Stage};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// `label → probability` in label order.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityMap(Vec<(String, f32)>);

impl Serialize for ProbabilityMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, probability) in &self.0 {
            map.serialize_entry(label, probability)?;
        }
        map.end()
    }
}

/// Successful classification.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SuccessPayload {
    pub success: bool,
    pub emotion: String,
    /// Percentage with one decimal, without the sign
    pub confidence: String,
    pub probabilities: ProbabilityMap,
}

impl From<&PredictionResult> for SuccessPayload {
    fn from(result: &PredictionResult) -> Self {
        Self {
            success: true,
            emotion: result.emotion(),
            confidence: format!("{:.1}", result.confidence()),
            probabilities: ProbabilityMap(
                result
                    .iter()
                    .map(|(label, p)| (label.to_string(), p))
                    .collect(),
            ),
        }
    }
}

/// Failed request, tagged with the stage that failed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailurePayload {
    pub success: bool,
    pub stage: Stage,
    pub error: String,
}

impl From<&InferenceError> for FailurePayload {
    fn from(error: &InferenceError) -> Self {
        Self {
            success: false,
            stage: error.stage(),
            error: error.to_string(),
        }
    }
}

/// Either payload, serialized without a wrapper.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Success(SuccessPayload),
    Failure(FailurePayload),
}

impl From<&Result<PredictionResult, InferenceError>> for PredictionResponse {
    fn from(outcome: &Result<PredictionResult, InferenceError>) -> Self {
        match outcome {
            Ok(result) => PredictionResponse::Success(result.into()),
            Err(error) => PredictionResponse::Failure(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Probabilities;
    use crate::labels::LabelSet;

    #[test]
    fn success_payload_keeps_label_order() {
        let result = PredictionResult::new(
            LabelSet::four_class(),
            Probabilities::new(vec![0.05, 0.125, 0.75, 0.075]).unwrap(),
        )
        .unwrap();

        let json = serde_json::to_string(&SuccessPayload::from(&result)).unwrap();

        assert_eq!(
            json,
            r#"{"success":true,"emotion":"Sad","confidence":"75.0","probabilities":{"neutral":0.05,"happy":0.125,"sad":0.75,"angry":0.075}}"#
        );
    }

    #[test]
    fn failure_payload_names_stage() {
        let outcome: Result<PredictionResult, InferenceError> = Err(InferenceError::NoFile);

        let value = serde_json::to_value(PredictionResponse::from(&outcome)).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["stage"], "request");
        assert_eq!(value["error"], "request: no audio file provided");
    }
}
