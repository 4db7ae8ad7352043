//! Named structuring strategies the upstream model can apply.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One labeled aspect of a strategy's application guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuideAspect {
    /// Single-letter tag shown in the guide, e.g. `C`.
    pub tag: &'static str,
    pub name: &'static str,
    pub prompt: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Audience-facing, persuasive, creative writing.
    #[serde(rename = "CO-STAR")]
    CoStar,
    /// Technical, code, and data work.
    #[serde(rename = "RISEN")]
    Risen,
    /// Short single-intent utility requests.
    #[serde(rename = "RACE")]
    Race,
}

const CO_STAR_GUIDE: &[GuideAspect] = &[
    GuideAspect {
        tag: "C",
        name: "Context",
        prompt: "What is the background situation or problem?",
    },
    GuideAspect {
        tag: "O",
        name: "Objective",
        prompt: "What is the specific, measurable goal?",
    },
    GuideAspect {
        tag: "S",
        name: "Style",
        prompt: "What writing style? (Formal, casual, technical, journalistic, conversational)",
    },
    GuideAspect {
        tag: "T",
        name: "Tone",
        prompt: "What emotional register? (Authoritative, empathetic, witty, urgent, friendly)",
    },
    GuideAspect {
        tag: "A",
        name: "Audience",
        prompt: "Who is this for? Define their expertise level, concerns, and what they care about.",
    },
    GuideAspect {
        tag: "R",
        name: "Response",
        prompt: "What format, length, and constraints? (Markdown, 500 words max, include CTA, bullet points)",
    },
];

const RISEN_GUIDE: &[GuideAspect] = &[
    GuideAspect {
        tag: "R",
        name: "Role",
        prompt: "Acting as who? (Senior Engineer, Data Scientist, Security Analyst)",
    },
    GuideAspect {
        tag: "I",
        name: "Instruction",
        prompt: "What specific commands to execute? Be precise and unambiguous.",
    },
    GuideAspect {
        tag: "S",
        name: "Structure",
        prompt: "How should the output be organized? (Table, Code block, List, JSON schema)",
    },
    GuideAspect {
        tag: "E",
        name: "Examples",
        prompt: "Demonstrate the exact transformation with 1-2 input->output pairs so the model can follow the pattern.",
    },
    GuideAspect {
        tag: "N",
        name: "Nuance",
        prompt: "What constraints, edge cases, or reasoning approach? For complex logic, ask for a step-by-step plan before code.",
    },
];

const RACE_GUIDE: &[GuideAspect] = &[
    GuideAspect {
        tag: "R",
        name: "Role",
        prompt: "Who is performing the task? (Keep brief)",
    },
    GuideAspect {
        tag: "A",
        name: "Action",
        prompt: "What specific action to take? (One clear verb)",
    },
    GuideAspect {
        tag: "C",
        name: "Context",
        prompt: "Why is this needed? What is the user's situation?",
    },
    GuideAspect {
        tag: "E",
        name: "Expectation",
        prompt: "What does the final result look like? (Length, format)",
    },
];

impl Strategy {
    /// All strategies in selection-policy order.
    pub fn all() -> [Strategy; 3] {
        [Strategy::CoStar, Strategy::Risen, Strategy::Race]
    }

    /// Identifier used in the strategy-label block.
    pub fn id(&self) -> &'static str {
        match self {
            Strategy::CoStar => "CO-STAR",
            Strategy::Risen => "RISEN",
            Strategy::Race => "RACE",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::CoStar => "Context, Objective, Style, Tone, Audience, Response",
            Strategy::Risen => "Role, Instruction, Structure, Examples, Nuance",
            Strategy::Race => "Role, Action, Context, Expectation",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Strategy::CoStar => {
                "Best for business, marketing, and creative writing. High focus on persona and audience."
            }
            Strategy::Risen => {
                "Best for technical tasks, coding, and logical analysis. Emphasizes precision and few-shot examples."
            }
            Strategy::Race => {
                "Streamlined structure for quick summaries, simple queries, or utility requests where full structure would be overkill."
            }
        }
    }

    pub fn use_case(&self) -> &'static str {
        match self {
            Strategy::CoStar => "Professional & Creative",
            Strategy::Risen => "Technical & Data",
            Strategy::Race => "Quick Tasks",
        }
    }

    /// Informational only; selection happens upstream.
    pub fn trigger_keywords(&self) -> &'static [&'static str] {
        match self {
            Strategy::CoStar => &[
                "marketing",
                "creative",
                "persuasion",
                "audience-aware",
                "writing",
                "blog",
                "social media",
                "email",
                "content",
                "copy",
                "brand",
            ],
            Strategy::Risen => &[
                "coding",
                "programming",
                "data analysis",
                "technical",
                "json",
                "xml",
                "script",
                "logic",
                "math",
                "algorithm",
                "function",
                "api",
                "database",
            ],
            Strategy::Race => &[
                "summary",
                "simple",
                "quick",
                "brief",
                "explanation",
                "definition",
                "translate",
                "convert",
            ],
        }
    }

    pub fn guide(&self) -> &'static [GuideAspect] {
        match self {
            Strategy::CoStar => CO_STAR_GUIDE,
            Strategy::Risen => RISEN_GUIDE,
            Strategy::Race => RACE_GUIDE,
        }
    }

    /// Render the application guide as markdown headings.
    pub fn render_guide(&self) -> String {
        self.guide()
            .iter()
            .map(|a| format!("### [{}] {} - {}", a.tag, a.name, a.prompt))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "costar" => Ok(Strategy::CoStar),
            "risen" => Ok(Strategy::Risen),
            "race" => Ok(Strategy::Race),
            _ => Err(format!(
                "unknown strategy '{}' (expected auto, co-star, risen, or race)",
                s.trim()
            )),
        }
    }
}

/// Either let the model pick, or pin one strategy.
///
/// Serialized as the same plain name the CLI accepts: `"auto"`, `"RISEN"`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StrategyMode {
    #[default]
    Auto,
    Fixed(Strategy),
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyMode::Auto => f.write_str("auto"),
            StrategyMode::Fixed(s) => write!(f, "{}", s),
        }
    }
}

impl From<StrategyMode> for String {
    fn from(mode: StrategyMode) -> Self {
        mode.to_string()
    }
}

impl TryFrom<String> for StrategyMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(StrategyMode::Auto);
        }
        s.parse::<Strategy>().map(StrategyMode::Fixed)
    }
}
