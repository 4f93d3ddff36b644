//! Grounded prompt assembly under a fixed persona.
//!
//! [`assemble`] turns retrieved passages, the persona, and recent
//! conversation turns into a [`GenerationRequest`]. The instruction always
//! restricts the answer to the supplied passages, and when no passage is
//! available it tells the model to state that the evidence does not
//! support an answer.
//!
//! Passages are added in rank order while they fit in the context budget.
//! A passage that does not fit is dropped whole, together with everything
//! ranked below it, so no passage is ever cut mid-sentence.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ConversationTurn, RetrievedPassage, Role};

const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

/// The behavioural constraint given to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub instruction: String,
    /// The exact reply required when the evidence has no answer.
    pub no_evidence_reply: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Cold Case Detective".to_string(),
            instruction: "You are a veteran Cold Case Detective with decades of experience \
                          solving complex mysteries. Think methodically, connect evidence \
                          logically, and keep a professional but gritty tone."
                .to_string(),
            no_evidence_reply: "I don't have that information in the evidence yet, Detective. \
                                We need more leads."
                .to_string(),
        }
    }
}

/// Size limits applied while assembling.
#[derive(Debug, Clone, Copy)]
pub struct PromptBudget {
    /// Characters available for tagged passages (tags included).
    pub context_chars: usize,
    /// Most recent conversation turns to carry over.
    pub max_history_turns: usize,
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            context_chars: 6000,
            max_history_turns: 6,
        }
    }
}

/// One chat message in the wire order expected by chat-style services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Everything the generation service needs for one answer.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Persona, grounding rules, and the tagged evidence block.
    pub system: String,
    pub history: Vec<ConversationTurn>,
    pub question: String,
    /// Passages that made it into the context, in rank order.
    pub passages: Vec<RetrievedPassage>,
    /// Passages dropped because the budget ran out.
    pub dropped: usize,
    pub evidence_absent: bool,
    /// Copy of the persona's required no-evidence reply.
    pub no_evidence_reply: String,
}

impl GenerationRequest {
    /// Render as chat messages: system, prior turns, then the question.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.history.len() + 2);
        out.push(ChatMessage::new("system", self.system.clone()));
        for turn in &self.history {
            out.push(ChatMessage::new(turn.role.as_str(), turn.content.clone()));
        }
        out.push(ChatMessage::new(Role::User.as_str(), self.question.clone()));
        out
    }
}

/// The stable tag attached to a passage in the prompt and matched later
/// by the citation extractor.
pub fn reference_token(filename: &str, chunk_id: &str) -> String {
    format!("[source: {}, chunk: {}]", filename, chunk_id)
}

/// Build the generation request for `question`.
pub fn assemble(
    question: &str,
    passages: &[RetrievedPassage],
    persona: &Persona,
    history: &[ConversationTurn],
    budget: &PromptBudget,
) -> GenerationRequest {
    let mut included = Vec::new();
    let mut blocks = Vec::new();
    let mut used = 0usize;

    for p in passages {
        let block = format!("{}\n{}", reference_token(&p.filename, &p.chunk_id), p.text);
        let cost = block.chars().count()
            + if blocks.is_empty() {
                0
            } else {
                PASSAGE_SEPARATOR.len()
            };
        if used + cost > budget.context_chars {
            break;
        }
        used += cost;
        blocks.push(block);
        included.push(p.clone());
    }

    let dropped = passages.len() - included.len();
    let evidence_absent = included.is_empty();
    let system = if evidence_absent {
        evidence_absent_instruction(persona)
    } else {
        grounded_instruction(persona, &blocks.join(PASSAGE_SEPARATOR))
    };

    let skip = history.len().saturating_sub(budget.max_history_turns);
    let history = history[skip..].to_vec();

    debug!(
        included = included.len(),
        dropped,
        context_chars = used,
        history_turns = history.len(),
        evidence_absent,
        "assembled prompt"
    );

    GenerationRequest {
        system,
        history,
        question: question.trim().to_string(),
        passages: included,
        dropped,
        evidence_absent,
        no_evidence_reply: persona.no_evidence_reply.clone(),
    }
}

/// Persona name and instruction, the opening of every system prompt.
fn persona_header(persona: &Persona) -> String {
    format!("Role: {}\n{}", persona.name, persona.instruction)
}

fn grounded_instruction(persona: &Persona, context: &str) -> String {
    format!(
        "{header}\n\n\
         Your guidelines:\n\
         1. Use ONLY the evidence passages below to answer. Never use outside knowledge.\n\
         2. If the answer is not found in the evidence, say exactly: \"{reply}\"\n\
         3. Cite every statement by repeating the tag of the passage it came from, \
         for example [source: file.txt, chunk: id].\n\n\
         Evidence passages:\n{context}",
        header = persona_header(persona),
        reply = persona.no_evidence_reply,
        context = context,
    )
}

fn evidence_absent_instruction(persona: &Persona) -> String {
    format!(
        "{header}\n\n\
         No evidence supports an answer to this question. Do not guess and do not use \
         outside knowledge. Reply exactly: \"{reply}\"",
        header = persona_header(persona),
        reply = persona.no_evidence_reply,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(file: &str, chunk: &str, text: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            chunk_id: chunk.to_string(),
            document_id: "d".to_string(),
            filename: file.to_string(),
            text: text.to_string(),
            score,
        }
    }

    #[test]
    fn test_empty_passages_produce_absence_instruction() {
        let persona = Persona::default();
        let req = assemble("Who did it?", &[], &persona, &[], &PromptBudget::default());
        assert!(req.evidence_absent);
        assert!(req.system.contains("No evidence supports an answer"));
        assert!(req.system.contains(&persona.no_evidence_reply));
        assert!(req.passages.is_empty());
    }

    #[test]
    fn test_passages_tagged_in_rank_order() {
        let passages = vec![
            passage("a.txt", "a:00000", "First.", 0.9),
            passage("b.txt", "b:00003", "Second.", 0.5),
        ];
        let req = assemble("q", &passages, &Persona::default(), &[], &PromptBudget::default());
        let a = req.system.find("[source: a.txt, chunk: a:00000]").unwrap();
        let b = req.system.find("[source: b.txt, chunk: b:00003]").unwrap();
        assert!(a < b);
        assert!(req.system.contains("Use ONLY the evidence passages"));
        assert!(!req.evidence_absent);
    }

    #[test]
    fn test_budget_drops_whole_passages() {
        let long = "word ".repeat(40);
        let passages = vec![
            passage("a.txt", "a:00000", "Short passage.", 0.9),
            passage("b.txt", "b:00000", &long, 0.8),
            passage("c.txt", "c:00000", "Tiny.", 0.7),
        ];
        let budget = PromptBudget {
            context_chars: 80,
            max_history_turns: 6,
        };
        let req = assemble("q", &passages, &Persona::default(), &[], &budget);
        assert_eq!(req.passages.len(), 1);
        assert_eq!(req.dropped, 2);
        assert!(!req.system.contains("word word"));
        assert!(!req.system.contains("Tiny."));
    }

    #[test]
    fn test_nothing_fits_means_evidence_absent() {
        let passages = vec![passage("a.txt", "a:00000", &"x".repeat(500), 0.9)];
        let budget = PromptBudget {
            context_chars: 100,
            max_history_turns: 6,
        };
        let req = assemble("q", &passages, &Persona::default(), &[], &budget);
        assert!(req.evidence_absent);
        assert_eq!(req.dropped, 1);
    }

    #[test]
    fn test_persona_name_opens_both_instructions() {
        let persona = Persona {
            name: "Night Desk Sergeant".to_string(),
            ..Persona::default()
        };
        let passages = vec![passage("a.txt", "a:00000", "First.", 0.9)];
        let budget = PromptBudget::default();
        let grounded = assemble("q", &passages, &persona, &[], &budget);
        let absent = assemble("q", &[], &persona, &[], &budget);
        assert!(grounded.system.starts_with("Role: Night Desk Sergeant\n"));
        assert!(absent.system.starts_with("Role: Night Desk Sergeant\n"));
    }

    #[test]
    fn test_history_trimmed_to_most_recent() {
        let history: Vec<ConversationTurn> = (0..10)
            .map(|i| ConversationTurn::user(format!("turn {}", i)))
            .collect();
        let budget = PromptBudget {
            context_chars: 1000,
            max_history_turns: 3,
        };
        let req = assemble("now?", &[], &Persona::default(), &history, &budget);
        let msgs = req.messages();
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[1].content, "turn 7");
        assert_eq!(msgs[4].content, "now?");
        assert_eq!(msgs[4].role, "user");
    }
}
