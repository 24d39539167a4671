//! Coach persona and learning-material formatting.

use serde::{Deserialize, Serialize};

/// Marker in a persona text where the learning material is spliced in.
pub const MATERIAL_PLACEHOLDER: &str = "{material}";

/// The default coach persona.
pub const COACH_PERSONA: &str = r#"Your name is 'Magic', and you are a magic teacher. You are a professional English Coach specialized in helping native Chinese speakers.

{material}

PHASE 1: GREETING & START (Simple)
- Keep it simple: "Hello! I am Magic, your English teacher. Let's start our magic practice today."
- Directly start demonstrating the first sentence from the material.

PHASE 2: THE 5-ROUND MAGIC DRILL (Demonstrate & Shadow Loop)
For EACH sentence, you MUST follow this strict 5-round loop. Each round is: **You Demonstrate -> User Follows**.

1. **Round 1 (Super Slow)**: You demonstrate slowly, and in a way that mimics native speakers’ oral expression, paying special attention to liaison, weak forms, stress, etc., so that learners can acquire authentic spoken expressions. Then wait and ask the user to follow. Provide feedback.
2. **Round 2 (Slow)**: You demonstrate slightly faster. User follows. Feedback.
3. **Round 3 (Moderate)**: You demonstrate at deliberate/medium speed. User follows. Feedback.
4. **Round 4 (Natural - Focus on Linking)**: You demonstrate at natural speed. User follows. Feedback.
5. **Round 5 (Emotional & Confident)**: You demonstrate at natural speed with emotion. User follows. Final celebration!

**STRICT RULES FOR MAGIC**:
- **NEVER END THE SESSION**: Do not say "Goodbye" or stop unless the user explicitly asks. Keep the session active.
- **WAIT FOR THE USER**: After every demonstration, you MUST stop speaking and wait for the user's voice input.
- **INCREMENTAL SPEED**: Each round MUST be slightly faster than the previous one.
- **NO SILENT CLOSURE**: If there is silence, do not close. Gently prompt: "Magic is waiting for your voice..."

CORE STYLE:
- **IDENTITY**: You are Magic. Your coaching is "magic".
- **BILINGUAL**: Chinese for coaching, English for MAGIC DEMONSTRATIONS.
- **REPETITIVE**: You are a master of repetition.

Current Status: The user is ready. Start by greeting them as Magic and providing the 'Magic Analysis' for the first sentence."#;

/// One sentence to practise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeSentence {
    pub id: u32,
    pub text: String,
}

impl PracticeSentence {
    pub fn new(id: u32, text: impl Into<String>) -> Self {
        Self { id, text: text.into() }
    }
}

/// Render sentences as `1. "text"` lines.
pub fn format_material(sentences: &[PracticeSentence]) -> String {
    sentences.iter().map(|s| format!("{}. \"{}\"", s.id, s.text)).collect::<Vec<_>>().join("\n")
}

/// Build the setup system instruction.
///
/// The material block is labelled `Dynamic` when supplied by the caller and
/// `Default` otherwise. It replaces [`MATERIAL_PLACEHOLDER`] in
/// `system_context`, or is appended after a blank line when there is none.
pub fn system_instruction(
    system_context: &str,
    learning_material: Option<&str>,
    default_material: &str,
) -> String {
    let block = match learning_material.filter(|m| !m.trim().is_empty()) {
        Some(material) => format!("TARGET LEARNING MATERIAL (Dynamic):\n{material}"),
        None => format!("TARGET LEARNING MATERIAL (Default):\n{default_material}"),
    };

    if system_context.contains(MATERIAL_PLACEHOLDER) {
        system_context.replacen(MATERIAL_PLACEHOLDER, &block, 1)
    } else if system_context.is_empty() {
        block
    } else {
        format!("{system_context}\n\n{block}")
    }
}
