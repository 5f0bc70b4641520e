//! Query module - retrieval, prompt assembly and answer post-processing

use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::{Config, QueryConfig};
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::QueryError;
use crate::knowledge::{
    LanceVectorStore, MemoryVectorStore, SearchResult, VectorStore, MORE_INFO_KEY,
};
use crate::links::SiteLinks;
use crate::llm::{ChatMessage, ChatModel, OllamaChat};
use crate::loader::Ingestor;

/// Answer used when the chat model fails
pub const FALLBACK_ANSWER: &str = "An error occurred while processing your query.";

// ============================================================================
// Chat History
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    #[serde(alias = "human")]
    User,
    #[serde(alias = "assistant")]
    Ai,
}

/// One turn of the client-held conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl TurnRole {
    /// Role from a client-supplied name, `None` for roles a turn cannot have
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(TurnRole::User),
            "ai" | "assistant" => Some(TurnRole::Ai),
            _ => None,
        }
    }
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Ai,
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        match turn.role {
            TurnRole::User => ChatMessage::user(turn.content.clone()),
            TurnRole::Ai => ChatMessage::assistant(turn.content.clone()),
        }
    }
}

/// Append the question and the answer to `history`
///
/// Turns always alternate: every question gets its answer, even when the
/// answer repeats the previous one.
pub fn update_history(history: &mut Vec<ChatTurn>, question: &str, answer: &str) {
    history.push(ChatTurn::user(question));
    history.push(ChatTurn::ai(answer));
}

// ============================================================================
// QueryEngine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    /// "More Info" link appended to the answer, if any
    #[serde(skip)]
    pub more_info_url: Option<String>,
}

/// Retrieval-augmented question answering
pub struct QueryEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    links: SiteLinks,
    top_k: usize,
    system_prompt: String,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        links: SiteLinks,
        config: &QueryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chat,
            links,
            top_k: config.top_k,
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Wire the Ollama clients and the configured store
    ///
    /// With `memory`, the source folder is embedded into an in-process store
    /// instead of opening the LanceDB collection.
    pub async fn from_config(config: &Config, memory: bool) -> anyhow::Result<Self> {
        let links = SiteLinks::from_config(&config.site);
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(create_embedder(&config.ollama, config.store.dimension)?);

        let store: Arc<dyn VectorStore> = if memory {
            let store = Arc::new(MemoryVectorStore::new());
            let ingestor =
                Ingestor::new(embedder.clone(), store.clone(), links.clone(), &config.ingest);
            let report = ingestor
                .ingest(&config.ingest.source_folder)
                .await
                .context("Failed to build in-memory index")?;
            tracing::info!("In-memory index ready ({} chunks)", report.chunks);
            store
        } else {
            Arc::new(
                LanceVectorStore::open(
                    &config.store.persist_dir,
                    &config.store.collection,
                    config.store.dimension,
                )
                .await?,
            )
        };

        let chat = Arc::new(OllamaChat::from_config(&config.ollama)?);
        Ok(Self::new(store, embedder, chat, links, &config.query))
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Answer `question` using the closest documents and the prior conversation
    ///
    /// # Arguments
    /// * `question` - user question, must not be blank
    /// * `history` - previous turns, oldest first
    pub async fn handle_query(
        &self,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<QueryAnswer, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let embedding = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| QueryError::Embedding(format!("{:#}", e)))?;

        let results = self
            .store
            .search(&embedding, self.top_k)
            .await
            .map_err(|e| QueryError::Retrieval(format!("{:#}", e)))?;

        tracing::debug!("Retrieved {} documents for question", results.len());

        let more_info_url = self.find_more_info_url(&results);
        let messages = self.build_messages(&results, history, question);

        let reply = match self.chat.chat(&messages).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Error during query handling: {:#}", e);
                FALLBACK_ANSWER.to_string()
            }
        };

        let more_info_url = more_info_url.map(|url| self.links.finalize(&url));
        Ok(QueryAnswer {
            answer: format_answer(&reply, more_info_url.as_deref()),
            more_info_url,
        })
    }

    /// "More Info" URL of the first result that yields one
    pub fn find_more_info_url(&self, results: &[SearchResult]) -> Option<String> {
        for result in results {
            let metadata = &result.document.metadata;
            tracing::debug!(
                "Result metadata: {} (similarity {:.3})",
                metadata.filename,
                result.similarity
            );

            let url = if metadata.source_urls.is_some() {
                match metadata.parse_source_urls() {
                    Ok(urls) => urls.and_then(|mut u| u.remove(MORE_INFO_KEY)),
                    Err(e) => {
                        tracing::warn!(
                            "Error decoding source_urls of {}: {}",
                            metadata.filename,
                            e
                        );
                        None
                    }
                }
            } else {
                metadata
                    .source
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| self.links.source_url(s))
            };

            if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
                return Some(url);
            }
        }

        None
    }

    /// System prompt, one system message per retrieved passage, history, question
    pub fn build_messages(
        &self,
        results: &[SearchResult],
        history: &[ChatTurn],
        question: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(results.len() + history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(
            results
                .iter()
                .map(|r| ChatMessage::system(r.document.page_content.clone())),
        );
        messages.extend(history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(question));
        messages
    }
}

/// Trimmed reply with the optional "More Info" link appended
pub fn format_answer(reply: &str, more_info_url: Option<&str>) -> String {
    let reply = reply.trim();
    match more_info_url {
        Some(url) => format!(
            "{}<br><br>For more information: <a href=\"{}\" target=\"_blank\">{}</a>",
            reply, url, url
        ),
        None => reply.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Document, DocumentMetadata, MemoryVectorStore, VectorEntry};
    use crate::llm::Role;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const BASE: &str = "https://developer.criticalmanufacturing.com";
    const MIRROR: &str = "/developer/criticalmanufacturing/com/";

    /// Maps text onto a fixed axis by keyword
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let text = text.to_lowercase();
            Ok(vec![
                if text.contains("report") { 1.0 } else { 0.0 },
                if text.contains("cube") { 1.0 } else { 0.0 },
                0.1,
            ])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "keyword"
        }
    }

    /// Records the prompt and replies with a fixed answer
    struct ScriptedChat {
        reply: Option<String>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedChat {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            *self.seen.lock().unwrap() = messages.to_vec();
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => anyhow::bail!("connection refused"),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn metadata(filename: &str, source_urls: Option<&str>, source: Option<&str>) -> DocumentMetadata {
        DocumentMetadata {
            base_url: format!("{}/", BASE),
            filename: filename.to_string(),
            source_urls: source_urls.map(str::to_string),
            source: source.map(str::to_string),
        }
    }

    fn result(metadata: DocumentMetadata) -> SearchResult {
        SearchResult {
            document: Document::new("text", metadata),
            similarity: 0.9,
        }
    }

    async fn engine_with(chat: Arc<ScriptedChat>) -> QueryEngine {
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = Arc::new(KeywordEmbedder);

        let docs = [
            (
                "reports.html",
                "Reports are subscribed from the SSRS portal.",
                r#"{"More Info": "https://developer.criticalmanufacturing.com/developer/criticalmanufacturing/com/analytics/subscribereports/"}"#,
            ),
            (
                "cubes.html",
                "Custom cubes live in the data warehouse.",
                r#"{"More Info": "https://developer.criticalmanufacturing.com/analytics/customdatawarehousecubes/"}"#,
            ),
        ];

        let mut entries = Vec::new();
        for (filename, text, urls) in docs {
            let embedding = embedder.embed(text).await.unwrap();
            entries.push(VectorEntry::new(
                Document::new(text, metadata(filename, Some(urls), None)),
                0,
                embedding,
            ));
        }
        store.upsert(&entries).await.unwrap();

        QueryEngine::new(
            store,
            embedder,
            chat,
            SiteLinks::new(BASE, MIRROR),
            &QueryConfig {
                top_k: 1,
                system_prompt: "Be polite.".to_string(),
            },
        )
    }

    #[test]
    fn test_turn_role_aliases() {
        let turns: Vec<ChatTurn> = serde_json::from_str(
            r#"[{"role": "human", "content": "q"}, {"role": "assistant", "content": "a"}]"#,
        )
        .unwrap();
        assert_eq!(turns, vec![ChatTurn::user("q"), ChatTurn::ai("a")]);

        let out = serde_json::to_value(&turns).unwrap();
        assert_eq!(out[1]["role"], "ai");
    }

    #[test]
    fn test_update_history() {
        let mut history = Vec::new();
        update_history(&mut history, "hi", "hello");
        assert_eq!(history, vec![ChatTurn::user("hi"), ChatTurn::ai("hello")]);

        update_history(&mut history, "other", "something new");
        assert_eq!(history.len(), 4);
        assert_eq!(history.last(), Some(&ChatTurn::ai("something new")));
    }

    #[test]
    fn test_update_history_repeated_answer_keeps_alternation() {
        let mut history = Vec::new();
        update_history(&mut history, "q1", FALLBACK_ANSWER);
        update_history(&mut history, "q2", FALLBACK_ANSWER);

        assert_eq!(
            history,
            vec![
                ChatTurn::user("q1"),
                ChatTurn::ai(FALLBACK_ANSWER),
                ChatTurn::user("q2"),
                ChatTurn::ai(FALLBACK_ANSWER),
            ]
        );
    }

    #[test]
    fn test_turn_role_parse() {
        assert_eq!(TurnRole::parse("Human"), Some(TurnRole::User));
        assert_eq!(TurnRole::parse(" assistant "), Some(TurnRole::Ai));
        assert_eq!(TurnRole::parse("ai"), Some(TurnRole::Ai));
        assert_eq!(TurnRole::parse("system"), None);
    }

    #[test]
    fn test_format_answer() {
        assert_eq!(format_answer("  plain \n", None), "plain");
        assert_eq!(
            format_answer("Yes.", Some("https://x.com/a/")),
            "Yes.<br><br>For more information: <a href=\"https://x.com/a/\" target=\"_blank\">https://x.com/a/</a>"
        );
    }

    #[tokio::test]
    async fn test_find_more_info_url_order() {
        let engine = engine_with(Arc::new(ScriptedChat::replying("ok"))).await;
        let results = vec![
            result(metadata("broken.html", Some("{not json"), None)),
            result(metadata("nolink.html", Some(r#"{"Home": "https://x.com/"}"#), None)),
            result(metadata(
                "from_source.html",
                None,
                Some("SourceFiles/https___developer_criticalmanufacturing_com_faq.html"),
            )),
            result(metadata("later.html", Some(r#"{"More Info": "https://x.com/later/"}"#), None)),
        ];

        assert_eq!(
            engine.find_more_info_url(&results).as_deref(),
            Some("https://developer.criticalmanufacturing.com/faq/")
        );
        assert_eq!(engine.find_more_info_url(&results[..2]), None);
    }

    #[tokio::test]
    async fn test_handle_query_builds_prompt_and_link() {
        let chat = Arc::new(ScriptedChat::replying("  Open the SSRS portal.  "));
        let engine = engine_with(chat.clone()).await;

        let history = vec![ChatTurn::user("hello"), ChatTurn::ai("Hi!")];
        let answer = engine
            .handle_query("How do I subscribe to a report?", &history)
            .await
            .unwrap();

        let url = "https://developer.criticalmanufacturing.com/analytics/subscribereports/";
        assert_eq!(answer.more_info_url.as_deref(), Some(url));
        assert!(answer.answer.starts_with("Open the SSRS portal.<br><br>"));
        assert!(answer.answer.ends_with(&format!("{}</a>", url)));

        let seen = chat.seen.lock().unwrap().clone();
        let roles: Vec<Role> = seen.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(seen[0].content, "Be polite.");
        assert!(seen[1].content.contains("SSRS"));
        assert_eq!(seen[4].content, "How do I subscribe to a report?");
    }

    #[tokio::test]
    async fn test_chat_failure_returns_fallback() {
        let engine = engine_with(Arc::new(ScriptedChat::failing())).await;
        let answer = engine.handle_query("cube setup", &[]).await.unwrap();
        assert!(answer.answer.starts_with(FALLBACK_ANSWER));
        assert!(answer.answer.contains("customdatawarehousecubes"));
    }

    #[tokio::test]
    async fn test_blank_question_rejected() {
        let engine = engine_with(Arc::new(ScriptedChat::replying("ok"))).await;
        let err = engine.handle_query("   ", &[]).await.unwrap_err();
        assert!(matches!(err, QueryError::EmptyQuestion));
    }
}
