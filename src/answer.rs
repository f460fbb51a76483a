//! `starpilot fortuneteller`: retrieval-augmented question answering.
//!
//! Documents are picked with MMR, every one is "stuffed" into a single
//! prompt, and the model's reply is printed followed by the sources.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::llm::{self, ChatMessage, ChatModel};
use crate::models::ScoredDocument;
use crate::retriever::{Retriever, SearchStrategy};
use crate::search::{self, RetrievalOverrides};

const STUFF_SYSTEM_PROMPT: &str = "\
You help a developer rediscover GitHub repositories they have starred. \
Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know; don't try to make up an answer. \
Mention repositories by their owner/name.";

/// A generated answer and the documents it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ScoredDocument>,
}

/// Build the single-shot prompt containing every retrieved document.
pub fn build_stuff_prompt(question: &str, documents: &[ScoredDocument]) -> Vec<ChatMessage> {
    let mut context = String::new();
    for doc in documents {
        let repo = doc
            .meta_str("full_name")
            .unwrap_or(doc.document.id.as_str());
        context.push_str(&format!("Repository: {}\n", repo));
        if let Some(url) = doc.meta_str("url") {
            context.push_str(&format!("URL: {}\n", url));
        }
        context.push_str(doc.document.text.trim());
        context.push_str("\n\n");
    }

    vec![
        ChatMessage::system(STUFF_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "{}\nQuestion: {}\nHelpful Answer:",
            context,
            question.trim()
        )),
    ]
}

pub async fn answer_question(
    retriever: &Retriever,
    chat: &dyn ChatModel,
    question: &str,
) -> Result<Answer> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }

    let sources = retriever.retrieve(question).await?;
    tracing::info!(
        "answering with {} sources via {}",
        sources.len(),
        chat.model_name()
    );

    let text = chat.complete(&build_stuff_prompt(question, &sources)).await?;
    Ok(Answer { text, sources })
}

pub async fn run_fortuneteller(config: &Config, question: &str, k: Option<usize>) -> Result<()> {
    let rc = RetrievalOverrides {
        method: Some(SearchStrategy::Mmr),
        k,
        ..RetrievalOverrides::default()
    }
    .apply(config);
    rc.validate()?;

    let retriever = search::open_retriever(config, rc).await?;
    let chat = llm::create_chat_model(&config.llm)?;

    let answer = answer_question(&retriever, chat.as_ref(), question).await?;

    println!("{}", answer.text);
    println!();
    println!("Sources:");
    search::print_results(&answer.sources);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::models::{Metadata, MetadataValue, SemanticDocument};

    fn source(full_name: &str, text: &str) -> ScoredDocument {
        let mut metadata = Metadata::new();
        metadata.insert(
            "full_name".to_string(),
            MetadataValue::String(full_name.to_string()),
        );
        metadata.insert(
            "url".to_string(),
            MetadataValue::String(format!("https://github.com/{}", full_name)),
        );
        ScoredDocument {
            document: SemanticDocument {
                id: full_name.to_string(),
                text: text.to_string(),
                metadata,
            },
            score: 0.9,
        }
    }

    #[test]
    fn prompt_stuffs_every_document() {
        let messages = build_stuff_prompt(
            "  which tool finds files?  ",
            &[
                source("sharkdp/fd", "fd A simple fast find alternative"),
                source("BurntSushi/ripgrep", "ripgrep recursively searches directories"),
            ],
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);

        let user = &messages[1].content;
        assert!(user.contains("Repository: sharkdp/fd"));
        assert!(user.contains("https://github.com/BurntSushi/ripgrep"));
        assert!(user.contains("ripgrep recursively searches directories"));
        assert!(user.ends_with("Question: which tool finds files?\nHelpful Answer:"));
    }

    #[test]
    fn prompt_without_documents_still_asks() {
        let messages = build_stuff_prompt("anything?", &[]);
        assert!(messages[1].content.starts_with("\nQuestion: anything?"));
    }
}
