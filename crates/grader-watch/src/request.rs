use serde::{Deserialize, Serialize};

/// Batch evaluation request as the server's form handler expects it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(rename = "exams[]")]
    pub exams: Vec<String>,
    #[serde(rename = "models[]")]
    pub models: Vec<String>,
    pub repetitions: u32,
    #[serde(default)]
    pub user_prompt: String,
}

impl BatchRequest {
    /// Number of evaluations the server will run.
    pub fn total_evaluations(&self) -> u64 {
        self.exams.len() as u64 * self.models.len() as u64 * u64::from(self.repetitions)
    }

    pub fn plan_summary(&self) -> String {
        match self.validate() {
            Ok(()) => format!(
                "Total evaluations to run: {} ({} exam(s) x {} model(s) x {} repetition(s))",
                self.total_evaluations(),
                self.exams.len(),
                self.models.len(),
                self.repetitions
            ),
            Err(msg) => msg,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.exams.is_empty() || self.models.is_empty() || self.repetitions == 0 {
            return Err("Select at least one exam, one model, and set repetitions.".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(exams: &[&str], models: &[&str], repetitions: u32) -> BatchRequest {
        BatchRequest {
            exams: exams.iter().map(|s| s.to_string()).collect(),
            models: models.iter().map(|s| s.to_string()).collect(),
            repetitions,
            user_prompt: String::new(),
        }
    }

    #[test]
    fn serializes_with_form_array_keys() {
        let mut req = request(&["3", "4"], &["7"], 2);
        req.user_prompt = "Answer briefly".into();
        let value = serde_json::to_value(&req).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "exams[]": ["3", "4"],
                "models[]": ["7"],
                "repetitions": 2,
                "user_prompt": "Answer briefly",
            })
        );
    }

    #[test]
    fn counts_every_exam_model_repetition_combination() {
        let req = request(&["a", "b", "c"], &["m1", "m2"], 4);
        assert_eq!(req.total_evaluations(), 24);
        assert_eq!(
            req.plan_summary(),
            "Total evaluations to run: 24 (3 exam(s) x 2 model(s) x 4 repetition(s))"
        );
    }

    #[test]
    fn incomplete_selection_is_invalid() {
        for req in [
            request(&[], &["m"], 1),
            request(&["e"], &[], 1),
            request(&["e"], &["m"], 0),
        ] {
            assert_eq!(req.total_evaluations(), 0);
            assert!(req.validate().is_err());
            assert!(req.plan_summary().starts_with("Select at least one exam"));
        }
    }

    #[test]
    fn user_prompt_defaults_to_empty() {
        let req: BatchRequest =
            serde_json::from_str(r#"{"exams[]":["1"],"models[]":["2"],"repetitions":1}"#)
                .expect("parse");
        assert_eq!(req.user_prompt, "");
        assert_eq!(req.total_evaluations(), 1);
    }
}
