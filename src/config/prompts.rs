//! Prompt templates for AI Buddy.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub quiz: QuizPrompts,
    pub tutor: TutorPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for quiz generation and grading feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizPrompts {
    pub mcq: String,
    pub open: String,
    /// Qualitative judgment of an open-ended answer, appended as feedback.
    pub judgment: String,
}

impl Default for QuizPrompts {
    fn default() -> Self {
        Self {
            mcq: r#"Create EXACTLY {{count}} multiple choice questions based on the study material below.

RULES:
- Focus on concepts, principles and understanding, not memorization
- Never ask about page numbers, sections, paragraphs or where something appears in the document
- Do not show any thinking process
- Each question has exactly 4 options and exactly one correct option
- Write every question at {{difficulty}} difficulty
{{topic}}
GOOD QUESTION TYPES:
- What is the main purpose of...?
- Which principle states that...?
- How does [concept A] relate to [concept B]?
- Which of the following best describes...?

STUDY MATERIAL:
{{context}}

Respond with ONLY a JSON array, one object per question:
[
  {"question": "...", "options": ["...", "...", "...", "..."], "correct_index": 0, "explanation": "why the correct option is right"}
]
"correct_index" is the 0-based position of the correct option."#
                .to_string(),

            open: r#"Create EXACTLY {{count}} open-ended questions based on the study material below.

RULES:
- Focus on analysis, explanation and critical thinking
- Never ask about page numbers, sections, paragraphs or where something appears in the document
- Do not show any thinking process
- Each question must require a short written explanation
- Write every question at {{difficulty}} difficulty
{{topic}}
GOOD QUESTION TYPES:
- Explain the significance of...
- Compare and contrast [concept A] and [concept B]...
- What are the implications of...?

STUDY MATERIAL:
{{context}}

Respond with ONLY a JSON array, one object per question:
[
  {"question": "...", "reference_answer": "a model answer in 1-3 sentences", "rubric": "the key points a full-credit answer mentions"}
]"#
            .to_string(),

            judgment: r#"You are grading a student's written answer. Be brief, direct and encouraging.

Question: {{question}}
Reference answer: {{reference_answer}}
Grading rubric: {{rubric}}
Student answer: {{answer}}

In at most three sentences, say what the answer got right and what it missed."#
                .to_string(),
        }
    }
}

/// Prompts for tutoring answers, hints and explanations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorPrompts {
    pub answer: String,
    /// Guided tutoring: explain concepts without handing over answers.
    pub guide: String,
    pub hint: String,
    pub explanation: String,
    /// Substituted for the study material when retrieval found nothing.
    pub no_context: String,
}

impl Default for TutorPrompts {
    fn default() -> Self {
        Self {
            answer: r#"You are an AI tutor. Answer the student's question clearly and helpfully using the reference material.

Reference material:
{{context}}

{{history}}{{quiz_context}}Student's question: {{question}}

Give a clear, educational answer. Be concise but thorough. Base the answer on the reference material; if it does not contain enough information, say so clearly."#
                .to_string(),

            guide: r#"You are an AI tutor helping a student learn. Guide them toward understanding instead of handing over answers.

Reference material:
{{context}}

{{history}}{{quiz_context}}Student's question: {{question}}

INSTRUCTIONS:
- Help the student understand the concepts without giving direct answers to quiz questions
- If they ask about a specific quiz question, refer to it by number
- Be encouraging and supportive
- Base your guidance on the reference material"#
                .to_string(),

            hint: r#"You are an AI tutor giving a HINT. Never state the final answer, never name the correct option, and never confirm or reject a specific option.

Reference material:
{{context}}

{{history}}{{quiz_context}}Student's request: {{question}}

Give one or two guiding hints that point the student to the relevant concept in the material so they can work out the answer themselves."#
                .to_string(),

            explanation: r#"You are an AI tutor explaining a quiz answer.

Reference material:
{{context}}

Question: {{question}}
Correct answer: {{correct_answer}}
Student's answer: {{student_answer}}

Explain why the correct answer is right and, if the student's answer differs, why it is wrong. Base the explanation on the reference material."#
                .to_string(),

            no_context: "(No relevant study material was found for this request. Say so clearly. You may answer from general knowledge, but label it as not coming from the student's material.)"
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let quiz_path = custom_path.join("quiz.toml");
            if quiz_path.exists() {
                let content = std::fs::read_to_string(&quiz_path)?;
                prompts.quiz = toml::from_str(&content)?;
            }

            let tutor_path = custom_path.join("tutor.toml");
            if tutor_path.exists() {
                let content = std::fs::read_to_string(&tutor_path)?;
                prompts.tutor = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    ///
    /// Single pass: substituted values are never scanned for placeholders, and
    /// unknown placeholders are left as-is.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            result.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            match after.find("}}") {
                Some(close) => {
                    let key = &after[..close];
                    match vars.get(key) {
                        Some(value) => result.push_str(value),
                        None => {
                            result.push_str("{{");
                            result.push_str(key);
                            result.push_str("}}");
                        }
                    }
                    rest = &after[close + 2..];
                }
                None => {
                    result.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        result.push_str(rest);
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}
