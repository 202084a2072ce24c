//! Prompt templates for every generation call a run makes.
//!
//! Each template is a variant with typed fields. [`PromptTemplate::render`]
//! validates the fields and produces the message list sent to the provider:
//! system instructions first, then the user turn.

use crate::context::assembler::truncate_snippet;
use crate::context::{AssembledContext, ContextItem};
use ragloom_core::message::{ConversationContext, Message};

/// The exact phrase the model must use when evidence is missing or weak.
pub const INSUFFICIENT_CONTEXT_PHRASE: &str =
    "I don't have enough information to answer this question";

/// Prior turns carried into synthesis.
pub const HISTORY_TURNS: usize = 3;

/// Exploratory findings shown to an informed decomposition.
pub const MAX_FINDINGS: usize = 3;

const FINDING_CHARS: usize = 600;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("Prompt '{template}' is missing required field '{field}'")]
    MissingField {
        template: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Clone)]
pub enum PromptTemplate<'a> {
    /// Split a question into 2-4 focused sub-queries.
    Decompose { query: &'a str, web: bool },

    /// Ask for 2-3 follow-ups that fill gaps in a preliminary answer.
    InformedDecompose {
        query: &'a str,
        preliminary_answer: &'a str,
        findings: &'a [ContextItem],
        web: bool,
    },

    /// A short preliminary answer used only to plan an informed decomposition.
    Exploratory {
        query: &'a str,
        context: &'a AssembledContext,
    },

    /// The final, cited answer.
    Synthesize {
        query: &'a str,
        context: &'a AssembledContext,
        sub_queries: &'a [String],
        conversation: Option<&'a ConversationContext>,
        web: bool,
    },
}

impl PromptTemplate<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Decompose { .. } => "decompose",
            Self::InformedDecompose { .. } => "informed_decompose",
            Self::Exploratory { .. } => "exploratory",
            Self::Synthesize { .. } => "synthesize",
        }
    }

    fn validate(&self) -> Result<(), PromptError> {
        let missing = |field| PromptError::MissingField {
            template: self.name(),
            field,
        };

        let query = match self {
            Self::Decompose { query, .. }
            | Self::InformedDecompose { query, .. }
            | Self::Exploratory { query, .. }
            | Self::Synthesize { query, .. } => query,
        };
        if query.trim().is_empty() {
            return Err(missing("query"));
        }

        if let Self::InformedDecompose {
            preliminary_answer, ..
        } = self
            && preliminary_answer.trim().is_empty()
        {
            return Err(missing("preliminary_answer"));
        }

        Ok(())
    }

    /// Validate and render into provider messages.
    pub fn render(&self) -> Result<Vec<Message>, PromptError> {
        self.validate()?;

        let messages = match self {
            Self::Decompose { query, web } => vec![
                Message::system(decompose_system(*web)),
                Message::user(decompose_user(query, *web)),
            ],

            Self::InformedDecompose {
                query,
                preliminary_answer,
                findings,
                web,
            } => vec![
                Message::system(decompose_system(*web)),
                Message::user(informed_user(query, preliminary_answer, findings, *web)),
            ],

            Self::Exploratory { query, context } => vec![
                Message::system(
                    "Give a short preliminary answer to the question using only the sources \
                     below. It is used to plan further research, so say plainly what the \
                     sources do not cover.",
                ),
                Message::user(format!(
                    "Question: {query}\n\nSources:\n{}",
                    context.prompt_block()
                )),
            ],

            Self::Synthesize {
                query,
                context,
                sub_queries,
                conversation,
                web,
            } => {
                let mut messages = vec![Message::system(synthesis_system(
                    *web,
                    context.needs_insufficient_notice(),
                ))];
                if let Some(history) = conversation.and_then(render_conversation) {
                    messages.push(Message::system(history));
                }
                messages.push(Message::user(synthesis_user(query, context, sub_queries)));
                messages
            }
        };

        Ok(messages)
    }
}

/// The last [`HISTORY_TURNS`] user/assistant turns as a system preamble.
pub fn render_conversation(conversation: &ConversationContext) -> Option<String> {
    let turns = conversation.recent(HISTORY_TURNS);
    if turns.is_empty() {
        return None;
    }

    let mut out = String::from("Previous conversation:");
    for turn in turns {
        out.push_str(&format!("\n{}: {}", turn.role, turn.content.trim()));
    }
    Some(out)
}

fn decompose_system(web: bool) -> &'static str {
    if web {
        "You are an expert at breaking complex questions down into effective web search queries."
    } else {
        "You are an expert at breaking complex questions down into simpler, focused sub-questions."
    }
}

fn decompose_user(query: &str, web: bool) -> String {
    let guidance = if web {
        "Break it down into 2-4 specific search queries that together answer it completely. \
         Each search query should:\n\
         - focus on one aspect of the original query\n\
         - use short, precise, search-engine-friendly terms\n\
         - leave out filler words"
    } else {
        "Break it down into 2-4 specific sub-questions that together answer it completely. \
         Each sub-question should:\n\
         - be self-contained and specific\n\
         - focus on one aspect of the original query\n\
         - be phrased as a complete question"
    };

    format!(
        "Original query: {query}\n\n{guidance}\n\n\
         Respond with a bulleted list containing ONLY the queries, one per line."
    )
}

fn informed_user(query: &str, preliminary: &str, findings: &[ContextItem], web: bool) -> String {
    let kind = if web { "search queries" } else { "questions" };

    let mut out = format!(
        "Original query: {query}\n\n\
         A preliminary search produced this answer:\n{}\n",
        preliminary.trim()
    );

    if !findings.is_empty() {
        out.push_str("\nFindings so far:\n");
        for (i, item) in findings.iter().take(MAX_FINDINGS).enumerate() {
            out.push_str(&format!(
                "Finding {} ({}): {}\n",
                i + 1,
                item.evidence.title,
                truncate_snippet(&item.evidence.content, FINDING_CHARS)
            ));
        }
    }

    out.push_str(&format!(
        "\nIdentify 2-3 focused follow-up {kind} that would:\n\
         - fill in important information missing from the preliminary answer\n\
         - cover aspects of the query that were not addressed\n\
         - resolve ambiguities or contradictions in the findings\n\n\
         Do not repeat what is already known. \
         Respond with a bulleted list containing ONLY the {kind}, one per line."
    ));
    out
}

fn synthesis_system(web: bool, force_insufficient: bool) -> String {
    let mut rules = vec![
        "Cite every factual claim with the marker of the source it comes from, for example \
         [Source 1]. Use several markers when a claim draws on several sources."
            .to_string(),
        "Never cite a source number that is not listed.".to_string(),
        "Do not add facts that are not in the sources.".to_string(),
    ];
    if web {
        rules.push("Web sources may disagree; point out conflicting information.".into());
    }
    if force_insufficient {
        rules.push(format!(
            "The sources are missing or not relevant enough to answer. Reply with \
             \"{INSUFFICIENT_CONTEXT_PHRASE}\" and briefly say what information would be \
             needed. Do not answer from general knowledge."
        ));
    } else {
        rules.push(format!(
            "If the sources do not contain the answer, reply with \
             \"{INSUFFICIENT_CONTEXT_PHRASE}\" and say what is missing."
        ));
    }

    let mut out = String::from("You answer questions using only the numbered sources provided.\n\nRules:");
    for rule in rules {
        out.push_str("\n- ");
        out.push_str(&rule);
    }
    out
}

fn synthesis_user(query: &str, context: &AssembledContext, sub_queries: &[String]) -> String {
    let mut out = format!("Question: {query}\n");

    if !sub_queries.is_empty() {
        out.push_str("\nThe question was broken into these sub-queries:\n");
        for (i, sq) in sub_queries.iter().enumerate() {
            out.push_str(&format!("{}. {sq}\n", i + 1));
        }
    }

    out.push_str("\nSources:\n");
    out.push_str(context.prompt_block());
    out
}
