//! Closed keyword tables for prompt classification
//!
//! Each task type owns a keyword bag; a type's score is the number of
//! matched keywords divided by its bag size. The lists below are closed:
//! changing them changes classification behavior.

use super::TaskType;

/// Keyword bag per task type, in scoring order.
pub const TASK_KEYWORDS: &[(TaskType, &[&str])] = &[
    (
        TaskType::Coding,
        &[
            "code",
            "python",
            "function",
            "debug",
            "script",
            "program",
            "write",
            "algorithm",
            "implement",
            "compile",
        ],
    ),
    (
        TaskType::Creative,
        &[
            "story",
            "poem",
            "creative",
            "imagine",
            "fiction",
            "character",
            "plot",
            "invent",
            "song",
            "narrative",
        ],
    ),
    (
        TaskType::Analysis,
        &[
            "analyze",
            "analysis",
            "compare",
            "evaluate",
            "data",
            "statistics",
            "research",
            "summarize",
            "report",
            "trend",
        ],
    ),
    (
        TaskType::Translation,
        &[
            "translate",
            "translation",
            "italian",
            "english",
            "spanish",
            "french",
            "language",
            "meaning",
        ],
    ),
    (
        TaskType::Fast,
        &["quick", "quickly", "instant", "brief", "short", "oneliner"],
    ),
];

/// Any hit sets `requires_fast_response`.
pub const URGENCY_KEYWORDS: &[&str] =
    &["quick", "fast", "brief", "short", "urgent", "immediately", "asap"];

/// Any hit sets `requires_high_quality`.
pub const DEPTH_KEYWORDS: &[&str] = &[
    "detailed",
    "comprehensive",
    "thorough",
    "professional",
    "in-depth",
    "extensive",
    "meticulous",
    "rigorous",
];

/// Technical-term hits feed the complexity heuristic.
pub const TECHNICAL_TERMS: &[&str] = &[
    "api",
    "database",
    "algorithm",
    "async",
    "distributed",
    "kubernetes",
    "encryption",
    "protocol",
    "optimization",
    "concurrency",
];

/// Function-word tables for language detection.
pub const LANGUAGE_FUNCTION_WORDS: &[(&str, &[&str])] = &[
    ("en", &["the", "is", "and", "to", "of", "what", "how", "please"]),
    ("it", &["il", "la", "di", "che", "per", "con", "come", "cosa"]),
    ("es", &["el", "los", "una", "por", "para", "como", "donde", "usted"]),
    ("fr", &["le", "les", "des", "une", "pour", "avec", "comment", "quoi"]),
];
