use super::parse::{
    PROMPT_CLOSE, PROMPT_OPEN, QUESTIONS_CLOSE, QUESTIONS_OPEN, STRATEGY_CLOSE, STRATEGY_OPEN,
};
use promptfix_core::strategy::{Strategy, StrategyMode};

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED BUILDING BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed core template. The strategy section is spliced in after it.
const CORE_SYSTEM: &str = r#"You are a prompt architect. You turn a short, rough intent into a clear, structured, ready-to-use prompt for a large language model.

PRINCIPLES:
- Preserve every concrete detail, constraint, and name the user gives you.
- Make implicit goals explicit; never invent facts the user did not imply.
- Write the prompt in the second person, addressed to the model that will run it.
- Prefer short sections and concrete instructions over abstract advice.
- The prompt must stand on its own: no references to this conversation."#;

const PROPORTIONALITY_RULE: &str = r#"**Proportionality Override:**
- If the input is a simple factual question or trivial request, apply the strategy's PRINCIPLES but do NOT generate verbose headers. Keep output proportional to input."#;

const SELECTION_RULES: &str = r#"## Selection Rules

**Priority Order (when multiple could apply):**
1. If request involves code, data, logic, or technical output -> RISEN
2. If request involves audience, persuasion, marketing, or creative content -> CO-STAR
3. If request is simple (under 15 words) with a single clear action -> RACE
4. When genuinely uncertain between CO-STAR and RISEN -> default to CO-STAR (more versatile)"#;

fn use_when(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::CoStar => {
            "Content creation, persuasion, marketing, audience-aware writing, emails, blogs, social media."
        }
        Strategy::Risen => {
            "Coding, programming, data analysis, APIs, algorithms, technical documentation."
        }
        Strategy::Race => {
            "Simple queries, quick summaries, definitions, translations, or requests under 15 words with clear intent."
        }
    }
}

fn heading(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::CoStar => "Creative/Marketing/Audience-Focused",
        Strategy::Risen => "Technical/Logical/Data",
        Strategy::Race => "Quick/Simple/Utility",
    }
}

fn automatic_selection_section() -> String {
    let mut out = String::from(
        "INTELLIGENT STRATEGY SELECTION\n\n\
         You must analyze each request and select the most appropriate strategy. \
         Apply the selected strategy's structure to your output.\n\n\
         ## Available Strategies\n",
    );
    for (i, strategy) in [Strategy::CoStar, Strategy::Risen, Strategy::Race]
        .into_iter()
        .enumerate()
    {
        out.push_str(&format!(
            "\n### {}. {} ({})\nUse when: {}\n{}\n",
            i + 1,
            strategy.id(),
            heading(strategy),
            use_when(strategy),
            strategy.render_guide()
        ));
    }
    out.push('\n');
    out.push_str(SELECTION_RULES);
    out.push_str("\n\n");
    out.push_str(PROPORTIONALITY_RULE);
    out.push_str(
        "\n\n## Your Task\n\
         1. Analyze the user's request\n\
         2. Select the best strategy using the rules above\n\
         3. Apply that strategy's structure to your optimized prompt\n\
         4. Report which strategy you used (see output format)",
    );
    out
}

fn fixed_strategy_section(strategy: Strategy) -> String {
    format!(
        r#"MANDATORY STRATEGY: {id} ({label})

{description}

Apply the {id} structure to every request, regardless of topic. Do not switch strategies.
Address each aspect below, in order:

{guide}

{proportionality}

## Your Task
1. Analyze the user's request
2. Structure the optimized prompt strictly with {id}
3. Report {id} as the strategy you used (see output format)"#,
        id = strategy.id(),
        label = strategy.label(),
        description = strategy.description(),
        guide = strategy.render_guide(),
        proportionality = PROPORTIONALITY_RULE,
    )
}

/// Output contract for the first build. Must stay in lockstep with `parse`.
fn output_format_initial() -> String {
    format!(
        r#"CRITICAL OUTPUT STRUCTURE:
1. Use {po} and {pc} tags around the optimized prompt.
2. ONLY the final prompt to be copied goes inside these tags. NO CONVERSATIONAL FILLER.
3. Provide 3-5 refinement questions as a JSON array of strings inside {qo} and {qc}.
4. State which strategy you used: {so}STRATEGY_NAME{sc} (use exactly: CO-STAR, RISEN, or RACE)"#,
        po = PROMPT_OPEN,
        pc = PROMPT_CLOSE,
        qo = QUESTIONS_OPEN,
        qc = QUESTIONS_CLOSE,
        so = STRATEGY_OPEN,
        sc = STRATEGY_CLOSE,
    )
}

/// Output contract for batch and auto refinement.
fn output_format_refinement() -> String {
    format!(
        r#"CRITICAL OUTPUT STRUCTURE:
1. Use {po} and {pc} tags around the optimized prompt.
2. ONLY the final prompt to be copied goes inside these tags.
3. Provide 0-3 refinement questions explicitly targeting remaining gaps.
   - If the prompt is high-quality and complete, return an empty array: []
   - ONLY ask if there is a critical missing piece of context. Do not ask filler questions.
   - Output questions as a JSON array of strings inside {qo} and {qc}.
4. State which strategy you used: {so}STRATEGY_NAME{sc}"#,
        po = PROMPT_OPEN,
        pc = PROMPT_CLOSE,
        qo = QUESTIONS_OPEN,
        qc = QUESTIONS_CLOSE,
        so = STRATEGY_OPEN,
        sc = STRATEGY_CLOSE,
    )
}

/// Compose the system-role directive for one call.
pub fn build_directive(mode: StrategyMode, is_refinement: bool) -> String {
    let strategy_section = match mode {
        StrategyMode::Auto => automatic_selection_section(),
        StrategyMode::Fixed(strategy) => fixed_strategy_section(strategy),
    };
    let output_rules = if is_refinement {
        output_format_refinement()
    } else {
        output_format_initial()
    };
    format!("{CORE_SYSTEM}\n\n{strategy_section}\n\n{output_rules}")
}

// ═══════════════════════════════════════════════════════════════════════════════
// USER TURNS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn initial_user_turn(intent: &str) -> String {
    format!("Original Intent: {}", intent)
}

/// `answers` is the preformatted `Q: .. | A: ..` block.
pub fn batch_refine_user_turn(current: &str, intent: &str, answers: &str) -> String {
    format!(
        "## Current Optimized Prompt (BASE):\n{current}\n\n\
         ## Original Intent:\n{intent}\n\n\
         ## User's Refinement Answers:\n{answers}\n\n\
         ## Task: Integrate answers while preserving all existing content. \
         Enhance the prompt structure without losing any details."
    )
}

pub fn auto_refine_user_turn(current: &str) -> String {
    format!(
        "Current Draft:\n{current}\n\n\
         Task: Perform a structural audit. Remove redundancy and sharpen logic. \
         IMPORTANT: Preserve all specific details, constraints, and intent from the Current Draft; \
         do not lose existing detail or constraints. \
         Return only the improved prompt inside {PROMPT_OPEN} tags."
    )
}
