//! News assistant
//!
//! Each message is classified by keyword into an intent, matching articles
//! are looked up, and the generator answers over a prompt built from them.
//! Any failure on the way produces a fixed apology instead of an error.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ai::prompts::build_chat_prompt;
use crate::ai::TextGenerator;
use crate::articles::{Article, ArticleStore};
use crate::enrichment::VALID_CATEGORIES;
use crate::error::Result;

/// Articles fetched per lookup
const LOOKUP_LIMIT: usize = 10;

/// Articles used when nothing else matched, and for "latest" questions
const RECENT_FALLBACK: usize = 5;

/// Articles attached to an assistant reply
const REPLY_ARTICLES: usize = 3;

/// Oldest messages are dropped past this many
pub const MAX_CHAT_MESSAGES: usize = 100;

pub const FALLBACK_REPLY: &str =
    "Sorry, something went wrong while processing your request. Could you try again?";

/// Countries the assistant recognizes, as a folded keyword and the stored spellings to try
const KNOWN_COUNTRIES: &[(&str, &[&str])] = &[
    ("espana", &["España", "Espana", "Spain"]),
    ("mexico", &["México", "Mexico"]),
    ("argentina", &["Argentina"]),
    ("colombia", &["Colombia"]),
    ("chile", &["Chile"]),
    ("peru", &["Perú", "Peru"]),
];

/// Words that only introduce a search
const SEARCH_WORDS: &[&str] = &["buscar", "busca", "encuentra", "sobre", "search", "find", "about"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Articles the reply was based on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub articles: Vec<Article>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            articles: Vec::new(),
        }
    }
}

/// What the reader seems to be asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatIntent {
    Category,
    Country,
    Search,
    Recent,
    General,
}

/// Lowercase and strip Spanish accents
fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' => 'a',
            'é' | 'è' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

impl ChatIntent {
    /// Classify a message; the first matching rule wins
    pub fn detect(message: &str) -> Self {
        let folded = fold(message);
        let mentions = |words: &[&str]| words.iter().any(|w| folded.contains(w));

        if mentions(&["categoria", "category"]) {
            Self::Category
        } else if mentions(&["pais", "country"]) {
            Self::Country
        } else if mentions(&["buscar", "busca", "encuentra", "search", "find"]) {
            Self::Search
        } else if mentions(&["ultimas", "recientes", "trending", "latest", "recent"]) {
            Self::Recent
        } else {
            Self::General
        }
    }
}

/// The message without its search verbs, or `None` when too little is left
fn search_terms(message: &str) -> Option<String> {
    let words: Vec<&str> = message.split_whitespace().collect();
    let mut kept = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let word = fold(words[i].trim_matches(|c: char| !c.is_alphanumeric()));
        if word == "acerca" && words.get(i + 1).is_some_and(|next| fold(next) == "de") {
            i += 2;
            continue;
        }
        if !SEARCH_WORDS.contains(&word.as_str()) {
            kept.push(words[i]);
        }
        i += 1;
    }

    let terms = kept
        .join(" ")
        .trim_matches(|c: char| c.is_whitespace() || c == '?' || c == '¿' || c == '.')
        .to_string();
    (terms.chars().count() > 2).then_some(terms)
}

/// One reader's conversation with the news assistant
pub struct ChatService {
    articles: Arc<dyn ArticleStore>,
    generator: Arc<dyn TextGenerator>,
    history: Mutex<Vec<ChatMessage>>,
}

impl ChatService {
    pub fn new(articles: Arc<dyn ArticleStore>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            articles,
            generator,
            history: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, message: ChatMessage) {
        let mut history = self.lock();
        history.push(message);
        if history.len() > MAX_CHAT_MESSAGES {
            let excess = history.len() - MAX_CHAT_MESSAGES;
            history.drain(..excess);
        }
    }

    /// Answer a reader message.
    ///
    /// Successful replies are kept in the history with up to three of the
    /// articles they cite. On failure the apology is returned but not kept.
    pub async fn send_message(&self, message: &str) -> ChatMessage {
        self.push(ChatMessage::new(ChatRole::User, message));

        match self.reply(message).await {
            Ok(reply) => {
                self.push(reply.clone());
                reply
            }
            Err(e) => {
                warn!(error = %e, "assistant reply failed");
                ChatMessage::new(ChatRole::Assistant, FALLBACK_REPLY)
            }
        }
    }

    async fn reply(&self, message: &str) -> Result<ChatMessage> {
        let intent = ChatIntent::detect(message);
        let found = self.relevant_articles(intent, message)?;
        debug!(?intent, found = found.len(), "assistant context ready");

        let prompt = build_chat_prompt(message, &found);
        let content = self.generator.generate(&prompt, None).await?;

        Ok(ChatMessage {
            articles: found.into_iter().take(REPLY_ARTICLES).collect(),
            ..ChatMessage::new(ChatRole::Assistant, content)
        })
    }

    /// Articles for the intent; falls back to a text search, then to the latest
    fn relevant_articles(&self, intent: ChatIntent, message: &str) -> Result<Vec<Article>> {
        let folded = fold(message);

        match intent {
            ChatIntent::Category => {
                if let Some(category) = VALID_CATEGORIES.iter().find(|c| folded.contains(*c)) {
                    return self.articles.by_category(category, LOOKUP_LIMIT);
                }
            }
            ChatIntent::Country => {
                if let Some((_, spellings)) =
                    KNOWN_COUNTRIES.iter().find(|(key, _)| folded.contains(key))
                {
                    for spelling in *spellings {
                        let found = self.articles.by_country(spelling, LOOKUP_LIMIT)?;
                        if !found.is_empty() {
                            return Ok(found);
                        }
                    }
                    return Ok(Vec::new());
                }
            }
            ChatIntent::Search => {
                if let Some(terms) = search_terms(message) {
                    return self.articles.search(&terms, LOOKUP_LIMIT);
                }
            }
            ChatIntent::Recent => return self.articles.recent(RECENT_FALLBACK),
            ChatIntent::General => {}
        }

        let found = self.articles.search(message.trim(), LOOKUP_LIMIT)?;
        if found.is_empty() {
            return self.articles.recent(RECENT_FALLBACK);
        }
        Ok(found)
    }

    /// Conversation so far, oldest first
    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock().clone()
    }

    pub fn clear_history(&self) {
        self.lock().clear();
    }
}
