//! Strict parsing of generated quiz output.
//!
//! The model is asked for a JSON array. Anything that does not yield exactly
//! the requested shape is a [`BuddyError::Validation`]; nothing is repaired
//! or guessed.

use super::model::{option_index, Question, QuestionKind};
use crate::error::{BuddyError, Result};
use serde_json::Value;

/// Locate the question list in raw model output.
fn extract_items(raw: &str) -> Result<Vec<Value>> {
    let text = raw.trim();

    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Ok(items);
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(mut obj)) = serde_json::from_str::<Value>(&text[start..=end]) {
                if let Some(Value::Array(items)) = obj.remove("questions") {
                    return Ok(items);
                }
            }
        }
    }

    Err(BuddyError::Validation("no JSON question list found in output".into()))
}

fn required_text(item: &Value, keys: &[&str], number: usize, what: &str) -> Result<String> {
    keys.iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BuddyError::Validation(format!("question {}: empty or missing {}", number, what)))
}

fn parse_mcq(item: &Value, number: usize, option_count: usize) -> Result<Question> {
    let prompt = required_text(item, &["question", "prompt"], number, "question text")?;

    let options = item
        .get("options")
        .and_then(Value::as_array)
        .ok_or_else(|| BuddyError::Validation(format!("question {}: missing options", number)))?;
    if options.len() != option_count {
        return Err(BuddyError::Validation(format!(
            "question {}: expected {} options, got {}",
            number,
            option_count,
            options.len()
        )));
    }
    let options = options
        .iter()
        .map(|o| o.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
        .collect::<Option<Vec<String>>>()
        .ok_or_else(|| BuddyError::Validation(format!("question {}: empty option", number)))?;

    let correct_index = match item.get("correct_index") {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(_) => None,
        None => item
            .get("correct_answer")
            .and_then(Value::as_str)
            .and_then(option_index),
    }
    .ok_or_else(|| BuddyError::Validation(format!("question {}: missing correct index", number)))?;
    if correct_index >= option_count {
        return Err(BuddyError::Validation(format!(
            "question {}: correct index {} out of range",
            number, correct_index
        )));
    }

    let explanation = item
        .get("explanation")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(Question::Mcq {
        prompt,
        options,
        correct_index,
        explanation,
    })
}

fn parse_open(item: &Value, number: usize) -> Result<Question> {
    let prompt = required_text(item, &["question", "prompt"], number, "question text")?;
    let reference_answer = required_text(item, &["reference_answer", "answer"], number, "reference answer")?;
    let rubric = item
        .get("rubric")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    Ok(Question::Open {
        prompt,
        reference_answer,
        rubric,
    })
}

/// Parse and validate `count` questions of `kind` from cleaned model output.
///
/// Extra questions beyond `count` are ignored; fewer is a validation error.
pub fn parse_questions(
    raw: &str,
    kind: QuestionKind,
    count: usize,
    option_count: usize,
) -> Result<Vec<Question>> {
    let items = extract_items(raw)?;
    if items.len() < count {
        return Err(BuddyError::Validation(format!(
            "expected {} questions, got {}",
            count,
            items.len()
        )));
    }

    items
        .iter()
        .take(count)
        .enumerate()
        .map(|(i, item)| {
            if !item.is_object() {
                return Err(BuddyError::Validation(format!("question {}: not an object", i + 1)));
            }
            match kind {
                QuestionKind::Mcq => parse_mcq(item, i + 1, option_count),
                QuestionKind::Open => parse_open(item, i + 1),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MCQ: &str = r#"Here is your quiz:
```json
[
  {"question": "Where is ATP mostly made?", "options": ["Nucleus", "Mitochondria", "Ribosome", "Vacuole"], "correct_index": 1, "explanation": "Oxidative phosphorylation."},
  {"question": "What does chlorophyll absorb?", "options": ["Light", "Water", "Oxygen", "Glucose"], "correct_answer": "A"}
]
```"#;

    #[test]
    fn test_parses_fenced_mcq() {
        let questions = parse_questions(MCQ, QuestionKind::Mcq, 2, 4).unwrap();
        assert_eq!(questions.len(), 2);
        match &questions[1] {
            Question::Mcq { correct_index, explanation, .. } => {
                assert_eq!(*correct_index, 0);
                assert!(explanation.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extra_questions_truncated() {
        let questions = parse_questions(MCQ, QuestionKind::Mcq, 1, 4).unwrap();
        assert_eq!(questions.len(), 1);
    }

    #[test]
    fn test_too_few_questions() {
        let err = parse_questions(MCQ, QuestionKind::Mcq, 5, 4).unwrap_err();
        assert!(matches!(err, BuddyError::Validation(_)));
    }

    #[test]
    fn test_wrong_option_count() {
        let raw = r#"[{"question": "Q?", "options": ["a", "b", "c"], "correct_index": 0}]"#;
        let err = parse_questions(raw, QuestionKind::Mcq, 1, 4).unwrap_err();
        assert!(err.to_string().contains("expected 4 options, got 3"));
    }

    #[test]
    fn test_missing_or_bad_correct_index() {
        let missing = r#"[{"question": "Q?", "options": ["a", "b", "c", "d"]}]"#;
        assert!(parse_questions(missing, QuestionKind::Mcq, 1, 4).is_err());

        let out_of_range = r#"[{"question": "Q?", "options": ["a", "b", "c", "d"], "correct_index": 4}]"#;
        assert!(parse_questions(out_of_range, QuestionKind::Mcq, 1, 4).is_err());

        let negative = r#"[{"question": "Q?", "options": ["a", "b", "c", "d"], "correct_index": -1}]"#;
        assert!(parse_questions(negative, QuestionKind::Mcq, 1, 4).is_err());
    }

    #[test]
    fn test_empty_question_text() {
        let raw = r#"[{"question": "  ", "options": ["a", "b", "c", "d"], "correct_index": 0}]"#;
        let err = parse_questions(raw, QuestionKind::Mcq, 1, 4).unwrap_err();
        assert!(err.to_string().contains("question text"));
    }

    #[test]
    fn test_open_questions() {
        let raw = r#"{"questions": [
            {"question": "Explain osmosis.", "reference_answer": "Water moves across a membrane toward higher solute concentration.", "rubric": "membrane, water, concentration"}
        ]}"#;
        let questions = parse_questions(raw, QuestionKind::Open, 1, 4).unwrap();
        assert_eq!(questions[0].kind(), QuestionKind::Open);

        let no_reference = r#"[{"question": "Explain osmosis.", "reference_answer": ""}]"#;
        assert!(parse_questions(no_reference, QuestionKind::Open, 1, 4).is_err());
    }

    #[test]
    fn test_not_json() {
        let err = parse_questions("Question 1: What is ATP?", QuestionKind::Mcq, 1, 4).unwrap_err();
        assert!(matches!(err, BuddyError::Validation(_)));
    }
}
