//! Tool-augmented conversation loop.
//!
//! A two-state machine per user turn: a reasoning step over the accumulated
//! history, and a tool-execution step whenever the model requests one. Tool
//! results are appended to the history and control returns to reasoning; a
//! plain-text reply ends the turn and is persisted as a Chat node chained to
//! its predecessor.

pub mod history;

use chrono::{Local, Utc};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::ChatConfig;
use crate::embedding::EmbeddingClient;
use crate::error::AppError;
use crate::ingest::FileSummary;
use crate::llm::{ChatMessage, LlmClient};
use crate::store::{ChatTurn, GraphStore, UserDetails, chat_turn_id, now_iso8601};
use crate::tools::Toolbox;

/// Explicit per-session conversation identity, derived from the user and the
/// session start instant and carried on every user message.
#[derive(Debug, Clone)]
pub struct SessionThread {
    pub id: String,
    pub started_at: String,
}

impl SessionThread {
    pub fn begin(username: &str) -> Self {
        let started_at = now_iso8601();
        let id = hex::encode(Sha256::digest(format!("{username}{started_at}").as_bytes()));
        Self { id, started_at }
    }
}

/// What one completed turn hands back to the caller: the answer, any image
/// payloads surfaced by tools (name → base64), and the persisted turn id.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    pub images: Vec<(String, String)>,
    pub chat_id: String,
}

pub struct Assistant {
    llm: LlmClient,
    toolbox: Toolbox,
    store: GraphStore,
    embedder: EmbeddingClient,
    user: UserDetails,
    thread: SessionThread,
    system_prompt: String,
    history: Vec<ChatMessage>,
    last_chat_id: Option<String>,
    history_budget: usize,
    max_steps: usize,
}

impl Assistant {
    pub fn new(
        llm: LlmClient,
        toolbox: Toolbox,
        store: GraphStore,
        embedder: EmbeddingClient,
        user: UserDetails,
        config: &ChatConfig,
    ) -> Self {
        let system_prompt = system_prompt_for(&user);
        let thread = SessionThread::begin(&user.username);
        Self {
            llm,
            toolbox,
            store,
            embedder,
            user,
            thread,
            system_prompt,
            history: Vec::new(),
            last_chat_id: None,
            history_budget: config.history_budget,
            max_steps: config.max_steps,
        }
    }

    pub fn thread(&self) -> &SessionThread {
        &self.thread
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Drop the accumulated history and start a fresh session thread. The
    /// next turn becomes a new session root in the store.
    pub fn start_new_session(&mut self) {
        self.history.clear();
        self.last_chat_id = None;
        self.thread = SessionThread::begin(&self.user.username);
        info!(thread = %self.thread.id, "started new session");
    }

    /// Run one user turn to completion.
    ///
    /// `placed_files` is what the user uploaded this session (name/type/
    /// summary records); `voice_mode` switches the reply format guidance.
    pub async fn converse(
        &mut self,
        user_text: &str,
        placed_files: &[FileSummary],
        voice_mode: bool,
        output_language: &str,
    ) -> Result<TurnOutcome, AppError> {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC %A").to_string();
        let chat_id = chat_turn_id(&self.user.first_name, &timestamp);
        let timezone = Local::now().format("%Z").to_string();

        let placed = serde_json::to_string(placed_files).unwrap_or_else(|_| "[]".to_string());
        let output_format = if voice_mode {
            "user wants response to be short and easy to read out loud as audio, \
             do not include any | or - for tables or any text formatting"
        } else {
            "user wants response in more detail and not in audio format, \
             put bullet points or tables whenever possible"
        };
        let content = format!(
            "timestamp: {timestamp}, user_placed_files: {placed}, \
             output_format: {output_format}, output_language: {output_language}, \
             message: {user_text}"
        );
        let meta = json!({
            "timestamp": timestamp,
            "username": self.user.username,
            "role": self.user.role.as_str(),
            "timezone": timezone,
            "thread_id": self.thread.id,
        });
        self.history.push(ChatMessage::user(content, meta));

        let mut images: Vec<(String, String)> = Vec::new();

        for _ in 0..self.max_steps {
            history::sanitize_file_tool_results(&mut self.history);
            history::trim_history(&mut self.history, self.history_budget);

            let reply = self
                .llm
                .chat(Some(&self.system_prompt), &self.history, &self.toolbox.specs())
                .await?;

            // Tool-execution state: run every requested call, fold results
            // back into history, return to reasoning.
            if !reply.tool_calls.is_empty() {
                let calls = reply.tool_calls.clone();
                self.history.push(ChatMessage::assistant_tool_calls(reply.tool_calls));
                for call in &calls {
                    let content = match self
                        .toolbox
                        .execute(&call.name, &call.arguments, &self.history)
                        .await
                    {
                        Ok(output) => {
                            collect_images(&output.metadata, &mut images);
                            output.to_json().to_string()
                        }
                        Err(e) => {
                            warn!(tool = %call.name, error = %e, "tool execution failed");
                            json!({"error": e.to_string()}).to_string()
                        }
                    };
                    self.history.push(ChatMessage::tool_result(&call.id, &call.name, content));
                }
                continue;
            }

            // Terminal state: plain-text answer. Persist the turn before
            // handing it back.
            if let Some(answer) = reply.text {
                self.history.push(ChatMessage::assistant(&answer));

                let turn = ChatTurn {
                    id: chat_id.clone(),
                    user_first_name: self.user.first_name.clone(),
                    username: self.user.username.clone(),
                    user_timezone: timezone,
                    user_query: user_text.to_string(),
                    agent_response: answer.clone(),
                    timestamp,
                };
                let embedding = self.embedder.embed(&turn.embedding_text()).await?;
                self.store
                    .save_chat(&turn, self.last_chat_id.as_deref(), &embedding)
                    .await?;
                self.last_chat_id = Some(chat_id.clone());

                return Ok(TurnOutcome { answer, images, chat_id });
            }

            return Err(AppError::Conversation(
                "model returned neither text nor tool calls".into(),
            ));
        }

        Err(AppError::Conversation(format!(
            "tool loop did not terminate within {} steps",
            self.max_steps
        )))
    }
}

fn collect_images(metadata: &Option<Value>, images: &mut Vec<(String, String)>) {
    let Some(map) = metadata
        .as_ref()
        .and_then(|m| m.get("image_data"))
        .and_then(Value::as_object)
    else {
        return;
    };
    for (name, data) in map {
        if let Some(payload) = data.as_str() {
            images.push((name.clone(), payload.to_string()));
        }
    }
}

fn system_prompt_for(user: &UserDetails) -> String {
    format!(
        "You are a multilingual voice assistant specialized in reading and summarizing \
         user-provided documents. Your core tasks include summarizing content, answering \
         questions based on document summaries, and performing deeper file searches when \
         needed. Users can upload Word, Excel, PDF, PNG, or JPEG files. You receive the \
         file name and its summary.\n\
         - If the currently uploaded file summary lacks the answer, use the \
         file-filter-search tool with the file name to do a full file search. Do this by \
         default instead of asking the user for permission.\n\
         - Redirect users to document-related queries if they ask unrelated questions, \
         except asking for previous/older files or conversation.\n\
         - Access previous files and chats using the provided tools and filters (name, \
         date, or vector similarity).\n\
         - Interpret references like \"this\" or \"last file\" using chat context.\n\
         - If data is insufficient, politely inform the user.\n\
         - Support both voice and chat input/output. Use the file tool when asked to \
         show images.\n\
         - If similarity search with similarity_search_message is not retrieving \
         results, try again with just filters like the name of the file or a date \
         range only.\n\
         - Refer to the tool documentation on what each tool does and their parameter \
         usage.\n\
         Current user name is {} with access role {}",
        user.first_name,
        user.role.as_str()
    )
}
