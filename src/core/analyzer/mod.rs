//! Context analyzer
//!
//! Classifies a prompt (plus prior history) into a [`TaskContext`]:
//! task type with confidence, complexity, language, and urgency/depth
//! flags. Analysis is pure: the same input always yields the same output.

pub mod keywords;

use serde::{Deserialize, Serialize};

use crate::core::types::ChatMessage;
use keywords::{
    DEPTH_KEYWORDS, LANGUAGE_FUNCTION_WORDS, TASK_KEYWORDS, TECHNICAL_TERMS, URGENCY_KEYWORDS,
};

/// Minimum keyword score for a type to win; below it the task is General.
const CONFIDENCE_THRESHOLD: f64 = 0.3;

/// Closed task-type set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Coding,
    Creative,
    Analysis,
    Translation,
    Fast,
    General,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            TaskType::Coding => "coding",
            TaskType::Creative => "creative",
            TaskType::Analysis => "analysis",
            TaskType::Translation => "translation",
            TaskType::Fast => "fast",
            TaskType::General => "general",
        };
        write!(f, "{tag}")
    }
}

/// Structured classification of a prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    /// Detected task type
    pub task_type: TaskType,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Complexity heuristic in [0, 1]
    pub complexity: f64,
    /// Detected language tag
    pub language: String,
    /// Urgency keyword hit
    pub requires_fast_response: bool,
    /// Depth keyword hit
    pub requires_high_quality: bool,
    /// Matched task keywords, in table order
    pub keywords: Vec<String>,
    /// Original prompt
    pub prompt: String,
}

/// Analyze a prompt and its prior history.
pub fn analyze(prompt: &str, history: &[ChatMessage]) -> TaskContext {
    // Classification runs over the lower-cased concatenation of the
    // prompt and all prior message text.
    let mut text = prompt.to_lowercase();
    for message in history {
        text.push(' ');
        text.push_str(&message.text_content().to_lowercase());
    }

    let (task_type, confidence, keywords) = classify(&text);
    let requires_fast_response = URGENCY_KEYWORDS.iter().any(|k| text.contains(k));
    let requires_high_quality = DEPTH_KEYWORDS.iter().any(|k| text.contains(k));

    TaskContext {
        task_type,
        confidence,
        complexity: complexity(&text),
        language: detect_language(&text),
        requires_fast_response,
        requires_high_quality,
        keywords,
        prompt: prompt.to_string(),
    }
}

/// Score each bag; winner is the argmax when it clears the threshold.
fn classify(text: &str) -> (TaskType, f64, Vec<String>) {
    let mut best = (TaskType::General, 0.0);
    let mut keywords = Vec::new();

    for (task_type, bag) in TASK_KEYWORDS {
        let matched: Vec<&str> = bag.iter().filter(|k| text.contains(**k)).copied().collect();
        let score = matched.len() as f64 / bag.len() as f64;
        for keyword in &matched {
            if !keywords.iter().any(|k: &String| k == keyword) {
                keywords.push(keyword.to_string());
            }
        }
        if score > best.1 {
            best = (*task_type, score);
        }
    }

    if best.1 >= CONFIDENCE_THRESHOLD {
        (best.0, best.1, keywords)
    } else {
        (TaskType::General, 1.0, keywords)
    }
}

/// Complexity heuristic: monotone in each contributor, clamped to [0, 1].
fn complexity(text: &str) -> f64 {
    let mut score: f64 = 0.1;

    let chars = text.chars().count();
    if chars > 500 {
        score += 0.25;
    } else if chars > 200 {
        score += 0.15;
    } else if chars > 80 {
        score += 0.05;
    }

    let words = text.split_whitespace().count();
    if words > 100 {
        score += 0.2;
    } else if words > 40 {
        score += 0.1;
    }

    let technical_hits = TECHNICAL_TERMS.iter().filter(|t| text.contains(**t)).count();
    score += (technical_hits as f64 * 0.05).min(0.2);

    if text.contains("step by step") || text.contains("step-by-step") {
        score += 0.15;
    }

    let questions = text.matches('?').count();
    score += (questions as f64 * 0.05).min(0.15);

    score.clamp(0.0, 1.0)
}

/// Count function-word hits per language and pick the argmax.
///
/// Defaults to `it` when every language scores zero.
fn detect_language(text: &str) -> String {
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut best: (&str, usize) = ("it", 0);
    for (tag, words) in LANGUAGE_FUNCTION_WORDS {
        let hits = tokens
            .iter()
            .filter(|token| words.contains(*token))
            .count();
        if hits > best.1 {
            best = (tag, hits);
        }
    }
    best.0.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fibonacci_prompt_classifies_as_coding() {
        let ctx = analyze(
            "Write a Python function to calculate fibonacci numbers",
            &[],
        );
        assert_eq!(ctx.task_type, TaskType::Coding);
        assert!(ctx.confidence >= 0.1);
        assert_eq!(ctx.language, "en");
        for expected in ["write", "function", "python"] {
            assert!(
                ctx.keywords.iter().any(|k| k == expected),
                "missing keyword {expected}"
            );
        }
    }

    #[test]
    fn unmatched_prompt_falls_back_to_general() {
        let ctx = analyze("hello there", &[]);
        assert_eq!(ctx.task_type, TaskType::General);
        assert_eq!(ctx.confidence, 1.0);
    }

    #[test]
    fn urgency_and_depth_flags() {
        let ctx = analyze("give me a quick answer", &[]);
        assert!(ctx.requires_fast_response);
        assert!(!ctx.requires_high_quality);

        let ctx = analyze("a thorough and detailed review", &[]);
        assert!(ctx.requires_high_quality);
    }

    #[test]
    fn analysis_is_pure() {
        let prompt = "Analyze this dataset and compare the statistics";
        let a = analyze(prompt, &[]);
        let b = analyze(prompt, &[]);
        assert_eq!(a.task_type, b.task_type);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.complexity, b.complexity);
        assert_eq!(a.keywords, b.keywords);
    }

    #[test]
    fn history_contributes_to_classification() {
        let history = vec![crate::core::types::user_message(
            "I am trying to debug a python script that won't compile",
        )];
        let ctx = analyze("can you help?", &history);
        assert_eq!(ctx.task_type, TaskType::Coding);
    }

    #[test]
    fn complexity_is_monotone_and_bounded() {
        let simple = analyze("hi", &[]);
        let technical = analyze(
            "Design a distributed database protocol with encryption and \
             optimization, explain step by step? How does the algorithm scale? \
             What about concurrency?",
            &[],
        );
        assert!(technical.complexity > simple.complexity);
        assert!(simple.complexity >= 0.0 && simple.complexity <= 1.0);
        assert!(technical.complexity <= 1.0);
    }

    #[test]
    fn language_detection_argmax_and_default() {
        assert_eq!(analyze("what is the meaning of this", &[]).language, "en");
        assert_eq!(analyze("per favore scrivi il codice che serve", &[]).language, "it");
        assert_eq!(analyze("xyzzy", &[]).language, "it");
    }
}
