//! The memory service and its lazily-initialised container.
//!
//! One `MemoryService` instance is shared by all tool handlers. It
//! owns the store, the retrieval engine, the current session state
//! (session id, turn counter, recent history) and the local backup
//! fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use sage_domain::config::{Config, RetrievalConfig};
use sage_domain::error::{Error, Result};
use sage_domain::memory::MemoryContent;
use sage_domain::query::{RetrievalStrategy, SessionHistoryEntry};
use sage_domain::turn::{contains_code, preview};
use sage_providers::{EmbeddingClient, RerankerClient};
use sage_retrieval::{format_context, RetrievalEngine, RetrieveOptions, SemanticAnalyzer};
use sage_storage::{BackupWriter, MemoryStore};

use crate::tools::{ContextArgs, SearchArgs};

/// Turns of history kept for context awareness.
const HISTORY_KEEP: usize = 10;

const DB_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionState {
    session_id: String,
    turn_counter: i32,
    history: Vec<SessionHistoryEntry>,
}

/// Outcome of a successful save.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub session_id: String,
    pub turn_id: i32,
    pub memory_id: String,
    pub summary: String,
}

pub struct MemoryService {
    store: MemoryStore,
    embedding: EmbeddingClient,
    engine: RetrievalEngine,
    backup: BackupWriter,
    analyzer: SemanticAnalyzer,
    retrieval: RetrievalConfig,
    session: Mutex<SessionState>,
}

impl MemoryService {
    /// Connect every collaborator. Fails fast on config errors,
    /// unreachable database, or an embedding-dimension mismatch.
    pub async fn initialize(config: &Config) -> Result<Self> {
        let issues = config.validate();
        for issue in &issues {
            tracing::warn!("config: {issue}");
        }
        if Config::has_errors(&issues) {
            return Err(Error::Config(format!(
                "configuration has {} error(s)",
                issues.len()
            )));
        }

        let embedding = EmbeddingClient::new(&config.embedding)?;
        let reranker = RerankerClient::new(&config.reranker)?;
        let store = MemoryStore::connect(&config.database, embedding.clone()).await?;
        let engine = RetrievalEngine::new(
            store.clone(),
            embedding.clone(),
            reranker,
            config.retrieval.clone(),
        );

        let backup_dir = config
            .server
            .config_dir
            .as_ref()
            .map(|dir| dir.join("backups"))
            .unwrap_or_else(BackupWriter::default_dir);

        let session_id = Uuid::new_v4().to_string();
        tracing::info!(session_id = %session_id, "memory service initialised");

        Ok(Self {
            store,
            embedding,
            engine,
            backup: BackupWriter::new(backup_dir),
            analyzer: SemanticAnalyzer::new(),
            retrieval: config.retrieval.clone(),
            session: Mutex::new(SessionState {
                session_id,
                turn_counter: 0,
                history: Vec::new(),
            }),
        })
    }

    // ── save_conversation ────────────────────────────────────────────

    /// Persist one turn. On any storage or provider failure the turn
    /// is dumped to the local backup before the error is surfaced, so
    /// nothing is lost.
    pub async fn save_conversation(
        &self,
        user_prompt: &str,
        assistant_response: &str,
        extra_metadata: Option<Value>,
    ) -> Result<SaveOutcome> {
        let keywords = self
            .analyzer
            .analyze(user_prompt, Vec::new())
            .technical_keywords;

        let (session_id, turn_index) = {
            let mut session = self.session.lock();
            session.turn_counter += 1;
            (session.session_id.clone(), session.turn_counter)
        };

        let mut metadata = serde_json::json!({
            "session_id": session_id,
            "turn_id": turn_index,
            "timestamp": Utc::now().to_rfc3339(),
            "source": "mcp_server",
            "has_code": contains_code(user_prompt) || contains_code(assistant_response),
            "query_length": user_prompt.chars().count(),
            "response_length": assistant_response.chars().count(),
            "keywords": keywords,
        });
        if let Some(Value::Object(extra)) = extra_metadata {
            let merged = metadata.as_object_mut().expect("metadata is an object");
            for (key, value) in extra {
                merged.insert(key, value);
            }
        }

        let content = MemoryContent {
            session_id: session_id.clone(),
            turn_index,
            user_input: user_prompt.to_owned(),
            assistant_response: assistant_response.to_owned(),
            metadata: metadata.clone(),
            is_agent_report: metadata
                .get("is_agent_report")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            agent_metadata: metadata.get("agent_metadata").cloned(),
        };

        let saved = with_db_retry(|| self.store.save(&content)).await;
        let memory_id = match saved {
            Ok(id) => id,
            Err(e) => {
                // The caller gets the error; the data gets a backup.
                let dump = serde_json::json!({
                    "user_prompt": user_prompt,
                    "assistant_response": assistant_response,
                    "metadata": metadata,
                });
                if let Err(backup_err) = self.backup.write(&session_id, &dump) {
                    tracing::error!(error = %backup_err, "backup fallback also failed");
                }
                return Err(e);
            }
        };

        {
            let mut session = self.session.lock();
            session.history.push(SessionHistoryEntry {
                session_id: session_id.clone(),
                turn_index,
                prompt_preview: preview(user_prompt, 200),
                keywords: metadata
                    .get("keywords")
                    .and_then(|v| v.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(str::to_owned))
                            .collect()
                    })
                    .unwrap_or_default(),
                timestamp: Utc::now(),
            });
            let len = session.history.len();
            if len > HISTORY_KEEP {
                session.history.drain(..len - HISTORY_KEEP);
            }
        }

        // A fresh turn makes cached lists for this session stale.
        self.engine.invalidate_session(&session_id);

        let summary = match (user_prompt.is_empty(), assistant_response.is_empty()) {
            (true, false) => format!("Assistant-only: {}", preview(assistant_response, 100)),
            (false, true) => format!("User-only: {}", preview(user_prompt, 100)),
            _ => format!(
                "user: {} | assistant: {}",
                preview(user_prompt, 100),
                preview(assistant_response, 100)
            ),
        };

        Ok(SaveOutcome {
            session_id,
            turn_id: turn_index,
            memory_id,
            summary,
        })
    }

    // ── get_context ──────────────────────────────────────────────────

    pub async fn get_context(&self, args: &ContextArgs) -> Result<Value> {
        let history = self.session.lock().history.clone();
        let max_results = args.max_results.unwrap_or(self.retrieval.retrieval_count);
        let context_window = args
            .context_window
            .unwrap_or(self.retrieval.max_context_tokens);

        let results = self
            .engine
            .retrieve(
                &args.query,
                max_results,
                RetrieveOptions {
                    strategy: RetrievalStrategy::HybridAdvanced,
                    enable_neural_rerank: args.enable_neural_rerank,
                    session_history: history,
                },
            )
            .await?;

        let context = format_context(&results, context_window);
        let details: Vec<Value> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "content": r.content,
                    "role": r.role,
                    "final_score": r.final_score,
                    "similarity_score": r.similarity_score,
                    "reasoning": r.reasoning,
                    "metadata": r.metadata,
                })
            })
            .collect();

        Ok(serde_json::json!({
            "context": context,
            "num_results": results.len(),
            "results": details,
            "strategy_used": "intelligent_retrieval",
            // Summarisation is a remote concern; formatting is local.
            "llm_summary_requested": args.enable_llm_summary,
            "llm_summary_used": false,
        }))
    }

    // ── search_memory ────────────────────────────────────────────────

    pub async fn search_memory(&self, args: &SearchArgs) -> Result<Vec<Value>> {
        let threshold = args
            .similarity_threshold
            .unwrap_or(self.retrieval.similarity_threshold);
        let query_embedding = self.embedding.embed(&args.query).await?;
        // Over-fetch so the threshold filter can still fill n.
        let candidates = with_db_retry(|| {
            self.store
                .search_vector(&query_embedding, (args.n * 2) as i64)
        })
        .await?;

        Ok(candidates
            .into_iter()
            .filter(|m| m.similarity >= threshold)
            .take(args.n)
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                    "score": m.similarity,
                })
            })
            .collect())
    }

    // ── stats / clear ────────────────────────────────────────────────

    pub async fn get_memory_stats(&self, include_performance: bool) -> Result<Value> {
        let stats = with_db_retry(|| self.store.get_stats()).await?;
        let mut out = serde_json::to_value(&stats)?;
        if include_performance {
            out["performance"] = self.engine.performance_stats();
        }
        Ok(out)
    }

    pub async fn clear_session(&self, session_id: &str) -> Result<u64> {
        let deleted = with_db_retry(|| self.store.clear_session(session_id)).await?;
        self.engine.invalidate_session(session_id);

        let mut session = self.session.lock();
        if session.session_id == session_id {
            session.history.clear();
        }
        Ok(deleted)
    }

    /// The session id tool responses report.
    pub fn current_session_id(&self) -> String {
        self.session.lock().session_id.clone()
    }
}

/// Retry transient storage failures with 1 s / 2 s / 4 s back-off.
/// Provider errors are not retried here; the clients already do.
async fn with_db_retry<T, F, Fut>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err: Option<Error> = None;
    for attempt in 0..=DB_RETRY_DELAYS.len() {
        if attempt > 0 {
            tokio::time::sleep(DB_RETRY_DELAYS[attempt - 1]).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if matches!(e, Error::StorageTransient(_)) => {
                tracing::warn!(error = %e, attempt, "transient storage failure");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Other("retry loop exhausted".into())))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Container
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ContainerState {
    service: Option<Arc<MemoryService>>,
    last_activity: Instant,
}

/// Lazily-constructed service holder.
///
/// `get` initialises on first use (idempotent under the async mutex)
/// and re-initialises after the configured idle window, so a
/// long-lived server picks up fresh connections.
pub struct ServiceContainer {
    config: Config,
    state: tokio::sync::Mutex<ContainerState>,
}

impl ServiceContainer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: tokio::sync::Mutex::new(ContainerState {
                service: None,
                last_activity: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn get(&self) -> Result<Arc<MemoryService>> {
        let mut state = self.state.lock().await;

        let idle_limit = Duration::from_secs(
            self.config.server.idle_reset_hours.max(0) as u64 * 3600,
        );
        if state.service.is_some() && state.last_activity.elapsed() > idle_limit {
            tracing::info!(
                idle_hours = self.config.server.idle_reset_hours,
                "idle window exceeded, re-initialising service"
            );
            state.service = None;
        }

        if state.service.is_none() {
            let service = MemoryService::initialize(&self.config).await?;
            state.service = Some(Arc::new(service));
        }
        state.last_activity = Instant::now();

        Ok(state.service.as_ref().expect("service just set").clone())
    }
}
