//! Prompt composition for tutoring requests.
//!
//! Turns the three form inputs (problem description, code, skill level) into
//! the system/user prompt pair sent to the model. Composition is a pure
//! function of its inputs: the skill level is embedded verbatim and only
//! selects which guidance line, if any, is appended.

use std::fmt;

/// Language tag used for the student's code fence.
const CODE_FENCE_LANGUAGE: &str = "python";

/// Fixed persona and behavioral rules for the tutor.
pub const SYSTEM_PROMPT: &str = r"You are 'PyGuide', a friendly and encouraging AI tutor for Python programming. Your primary goal is to help students learn by guiding them to find and fix bugs in their own code. You must act as a Socratic guide, not as a code solver.

**Your Core Mission:**
Help the student understand the *'why'* behind their error, not just the *'what'*. Your guidance should build their debugging skills and confidence.

**The Golden Rule: NEVER PROVIDE THE CORRECT CODE**
Under no circumstances should you provide the complete, corrected code or a direct line-for-line fix. Your purpose is to lead the student to the solution, not to give it to them.

**Formatting Instructions:**
- You MUST format your entire response using clean, web-friendly Markdown.
- Use standard paragraphs for explanations. Separate paragraphs with a blank line.
- Use bulleted lists with a dash (`-`) or numbered lists with (`1.`) for steps or distinct points.
- Use bold text with (`**...**`) to emphasize key terms.
- For code snippets, use triple backticks `` ```python ... ``` ``.

**Your Process for Responding:**
1.  **Acknowledge and Encourage:** Start with a positive and encouraging tone.
2.  **Analyze the Code Holistically:** Briefly analyze the student's overall approach.
3.  **Provide Hints in a Graduated Manner:** Offer hints from high-level to specific questions.
4.  **Promote Debugging Practices:** Suggest using `print()` statements or manual tracing.
5.  **End with an Open Question:** Put the ball back in the student's court.
";

/// Conventional skill levels with dedicated guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillLevel {
    /// New to Python.
    Beginner,
    /// Comfortable with the basics.
    Intermediate,
    /// Experienced programmer.
    Advanced,
}

impl SkillLevel {
    /// All conventional levels, in ascending order.
    pub const ALL: [Self; 3] = [Self::Beginner, Self::Intermediate, Self::Advanced];

    /// Parses a string into a `SkillLevel`, case-insensitively.
    ///
    /// Surrounding whitespace is ignored. Returns `None` for anything else;
    /// callers treat that as "no extra guidance", never as an error.
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    /// Guidance line appended to the system prompt for this level.
    #[must_use]
    pub const fn guidance(self) -> &'static str {
        match self {
            Self::Beginner => "- Focus on fundamental syntax (like missing colons), variable initialization, and simple logic errors.",
            Self::Intermediate => "- Suggest better Pythonic practices, standard library functions, or ways to avoid common pitfalls.",
            Self::Advanced => "- You can discuss algorithmic efficiency (Big-O), memory management, subtle edge cases, or architectural patterns.",
        }
    }
}

impl fmt::Display for SkillLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginner => write!(f, "Beginner"),
            Self::Intermediate => write!(f, "Intermediate"),
            Self::Advanced => write!(f, "Advanced"),
        }
    }
}

/// The system/user prompt pair for one tutoring request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    /// Persona, rules and skill-adaptive guidance.
    pub system_prompt: String,
    /// The student's problem, code and skill level.
    pub user_prompt: String,
}

/// Builds both prompts for a tutoring request.
///
/// Any input is accepted, including empty strings and unrecognized skill
/// levels.
pub fn compose(problem: &str, code: &str, skill: &str) -> ComposedPrompt {
    ComposedPrompt {
        system_prompt: system_prompt(skill),
        user_prompt: user_prompt(problem, code, skill),
    }
}

/// Builds the system prompt: [`SYSTEM_PROMPT`] plus the skill-adaptive block.
pub fn system_prompt(skill: &str) -> String {
    let mut prompt = String::with_capacity(SYSTEM_PROMPT.len() + 512);
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\nIMPORTANT: The user has identified their skill level as '");
    prompt.push_str(skill);
    prompt.push_str("'.\n");
    if let Some(level) = SkillLevel::from_str_case_insensitive(skill) {
        prompt.push_str(level.guidance());
        prompt.push('\n');
    }
    prompt.push_str("Tailor the depth and complexity of your hint to this specific skill level.\n");
    prompt
}

/// Builds the user prompt with the code wrapped in a fenced block.
pub fn user_prompt(problem: &str, code: &str, skill: &str) -> String {
    format!(
        "Here is the problem I'm trying to solve:\n\
         {problem}\n\
         \n\
         And here is my code that has a bug:\n\
         ```{CODE_FENCE_LANGUAGE}\n\
         {code}\n\
         ```\n\
         My skill level is {skill}. Can you help me find the bug without giving me the answer?\n"
    )
}
