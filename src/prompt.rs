//! Prompt templates, one pure function per [`QueryType`].

use crate::item::{Language, QueryType, WorkItem};
use crate::request::ChatMessage;

/// System message sent ahead of every prompt.
pub const SYSTEM_PROMPT: &str = "You are a professional language-learning assistant. \
Answer thoroughly and clearly, and organise the answer with Markdown.";

/// Builds a prompt from `(phonetic term, word, definition)`.
pub type TemplateFn = fn(&str, &str, &str) -> String;

fn synonyms(term: &str, word: &str, definition: &str) -> String {
    format!(
        "Analyse the synonyms of \"{word}\" ({definition}) and how they differ from it.\n\
         \n\
         Requirements:\n\
         1. List 3-5 main synonyms. For each give:\n   \
            - its {term}\n   \
            - the core difference from \"{word}\" (context, tone, formality)\n   \
            - a pair of example sentences, one with \"{word}\" and one with the synonym\n\
         2. Compare the key differences in a table.\n\
         3. Finish with usage recommendations.\n\
         \n\
         Use Markdown and be thorough."
    )
}

fn phrases(term: &str, word: &str, definition: &str) -> String {
    format!(
        "List the common phrases and collocations of \"{word}\" ({definition}) and how they are used.\n\
         \n\
         Requirements:\n\
         1. Give the 5-8 most frequent phrases.\n\
         2. For each phrase include:\n   \
            - the full expression with its {term}\n   \
            - a detailed translation\n   \
            - at least one natural example sentence with {term} and translation\n   \
            - when to use it (spoken or written, formal or informal)\n\
         3. Point out any fixed particles or prepositions.\n\
         \n\
         Use a Markdown list and be thorough."
    )
}

/// Template lookup table for one language, indexed by [`QueryType::index`].
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    language: Language,
    table: [TemplateFn; QueryType::ALL.len()],
}

impl PromptTemplates {
    /// Build the table for `language`.
    pub fn new(language: Language) -> Self {
        let table = QueryType::ALL.map(|query| -> TemplateFn {
            match query {
                QueryType::Synonyms => synonyms,
                QueryType::Phrases => phrases,
            }
        });
        Self { language, table }
    }

    /// User prompt for one unit of work.
    pub fn render(&self, query: QueryType, item: &WorkItem) -> String {
        self.table[query.index()](self.language.phonetic_term(), &item.key, &item.definition)
    }

    /// Full message list for one unit of work.
    pub fn messages(&self, query: QueryType, item: &WorkItem) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(self.render(query, item)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Role;

    #[test]
    fn test_templates_substitute_item() {
        let templates = PromptTemplates::new(Language::English);
        let item = WorkItem::new("abandon", "əˈbændən", "v. 放弃");

        let prompt = templates.render(QueryType::Synonyms, &item);
        assert!(prompt.contains("\"abandon\" (v. 放弃)"));
        assert!(prompt.contains("phonetic transcription"));

        let prompt = templates.render(QueryType::Phrases, &item);
        assert!(prompt.contains("collocations"));
        assert!(!templates.render(QueryType::Synonyms, &item).contains("collocations"));
    }

    #[test]
    fn test_language_changes_phonetic_term() {
        let templates = PromptTemplates::new(Language::Japanese);
        let item = WorkItem::new("食べる", "たべる", "吃");
        assert!(templates.render(QueryType::Phrases, &item).contains("kana reading"));
    }

    #[test]
    fn test_messages_start_with_system_prompt() {
        let templates = PromptTemplates::new(Language::English);
        let messages = templates.messages(QueryType::Synonyms, &WorkItem::new("a", "b", "c"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
    }
}
