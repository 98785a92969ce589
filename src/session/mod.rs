//! Session state
//!
//! Per-thread message history with append/read semantics and a reset that
//! moves the session onto a fresh thread id, leaving the old history
//! untouched. Identity and contacts are primed once per session; account
//! balances are never cached here because transfers mutate them.

use crate::error::AgentError;
use crate::models::{Contact, MessageRole, ThreadMessage, User};
use crate::services::Services;
use crate::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Trait for thread history persistence. Threads are append-only.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append(&self, thread_id: Uuid, message: ThreadMessage) -> Result<()>;
    async fn history(&self, thread_id: Uuid) -> Result<Vec<ThreadMessage>>;
}

enum StoreBackend {
    InMemory {
        threads: Arc<RwLock<HashMap<Uuid, Vec<ThreadMessage>>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

/// Thread history store with in-memory and Postgres backends.
pub struct ThreadStore {
    backend: StoreBackend,
}

impl ThreadStore {
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::InMemory {
                threads: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    /// Pick the backend from the environment: `POSTGRES_URL` (or
    /// `DATABASE_URL`) selects Postgres, anything else falls back to
    /// in-memory.
    pub fn from_env() -> Self {
        let database_url = env::var("POSTGRES_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok();

        if let Some(url) = database_url {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(&url)
            {
                Ok(pool) => {
                    info!("Session store backend: postgres");
                    return Self {
                        backend: StoreBackend::Postgres {
                            pool,
                            schema_ready: Arc::new(OnceCell::new()),
                        },
                    };
                }
                Err(error) => {
                    warn!(
                        "Failed to initialize postgres session store, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("Session store backend: in-memory");
        Self::in_memory()
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let StoreBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS thread_messages (
                      message_id UUID PRIMARY KEY,
                      thread_id UUID NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      tool_name TEXT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_thread_messages_thread_time
                    ON thread_messages (thread_id, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AgentError::DatabaseError(format!(
                    "Failed to initialize session store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn role_to_db(role: MessageRole) -> &'static str {
        match role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::System => "system",
        }
    }

    fn role_from_db(role: &str) -> MessageRole {
        match role.to_lowercase().as_str() {
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            "system" => MessageRole::System,
            _ => MessageRole::User,
        }
    }
}

#[async_trait]
impl SessionStore for ThreadStore {
    async fn append(&self, thread_id: Uuid, message: ThreadMessage) -> Result<()> {
        match &self.backend {
            StoreBackend::InMemory { threads } => {
                let mut locked = threads.write().await;
                locked.entry(thread_id).or_default().push(message);
                Ok(())
            }
            StoreBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                sqlx::query(
                    r#"
                    INSERT INTO thread_messages
                      (message_id, thread_id, role, content, tool_name, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(message.message_id)
                .bind(thread_id)
                .bind(Self::role_to_db(message.role))
                .bind(&message.content)
                .bind(&message.tool_name)
                .bind(message.created_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    AgentError::DatabaseError(format!("Failed to append thread message: {}", e))
                })?;

                Ok(())
            }
        }
    }

    async fn history(&self, thread_id: Uuid) -> Result<Vec<ThreadMessage>> {
        match &self.backend {
            StoreBackend::InMemory { threads } => {
                let locked = threads.read().await;
                Ok(locked.get(&thread_id).cloned().unwrap_or_default())
            }
            StoreBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let rows = sqlx::query(
                    r#"
                    SELECT message_id, role, content, tool_name, created_at
                    FROM thread_messages
                    WHERE thread_id = $1
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(thread_id)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    AgentError::DatabaseError(format!("Failed to load thread history: {}", e))
                })?;

                let mut messages = Vec::with_capacity(rows.len());
                for row in rows {
                    let db_role: String =
                        row.try_get("role").unwrap_or_else(|_| "user".to_string());
                    messages.push(ThreadMessage {
                        message_id: row.try_get("message_id").unwrap_or_else(|_| Uuid::new_v4()),
                        role: Self::role_from_db(&db_role),
                        content: row.try_get("content").unwrap_or_default(),
                        tool_name: row.try_get("tool_name").ok(),
                        created_at: row
                            .try_get("created_at")
                            .unwrap_or_else(|_| chrono::Utc::now()),
                    });
                }
                Ok(messages)
            }
        }
    }
}

struct SessionIdentity {
    user: User,
    contacts: Vec<Contact>,
}

/// One caller's conversation session: an active thread id plus the
/// identity resolved once from the opaque credential.
pub struct Session {
    services: Services,
    store: Arc<dyn SessionStore>,
    thread_id: RwLock<Uuid>,
    identity: RwLock<Option<SessionIdentity>>,
}

impl Session {
    pub fn new(services: Services, store: Arc<dyn SessionStore>) -> Self {
        Self {
            services,
            store,
            thread_id: RwLock::new(Uuid::new_v4()),
            identity: RwLock::new(None),
        }
    }

    pub fn with_thread(services: Services, store: Arc<dyn SessionStore>, thread_id: Uuid) -> Self {
        let session = Self::new(services, store);
        *session.thread_id.try_write().expect("fresh session") = thread_id;
        session
    }

    /// Resolve the opaque credential once and cache user + contacts for
    /// the rest of the session.
    pub async fn initialize_context(&self, token: &str) -> Result<User> {
        let user = self
            .services
            .users
            .get_user(token)
            .await
            .map_err(|e| AgentError::SessionError(e.message))?;

        let contacts = match self.services.contacts.get_contacts(&user.id).await {
            Ok(contacts) => contacts,
            Err(error) => {
                warn!("Contact priming failed, continuing without contacts: {}", error);
                Vec::new()
            }
        };

        info!(user_id = %user.id, "session context initialized");
        *self.identity.write().await = Some(SessionIdentity {
            user: user.clone(),
            contacts,
        });
        Ok(user)
    }

    pub async fn user_id(&self) -> Result<String> {
        self.identity
            .read()
            .await
            .as_ref()
            .map(|i| i.user.id.clone())
            .ok_or_else(|| {
                AgentError::SessionError(
                    "Session is not authenticated. Call initialize_context first.".into(),
                )
            })
    }

    pub async fn thread_id(&self) -> Uuid {
        *self.thread_id.read().await
    }

    /// Start a fresh thread. The old history stays in the store under the
    /// previous id; it is simply no longer the active thread.
    pub async fn reset(&self) -> Uuid {
        let new_id = Uuid::new_v4();
        *self.thread_id.write().await = new_id;
        info!(thread_id = %new_id, "session reset onto new thread");
        new_id
    }

    pub async fn append(&self, message: ThreadMessage) -> Result<()> {
        let thread_id = self.thread_id().await;
        self.store.append(thread_id, message).await
    }

    pub async fn history(&self) -> Result<Vec<ThreadMessage>> {
        let thread_id = self.thread_id().await;
        self.store.history(thread_id).await
    }

    /// Context block prepended to the system instructions each turn.
    /// User and contacts come from the session cache; accounts are always
    /// refetched so balance-dependent decisions never see stale data.
    pub async fn context_block(&self) -> Result<String> {
        let identity = self.identity.read().await;
        let Some(identity) = identity.as_ref() else {
            return Err(AgentError::SessionError(
                "Session is not authenticated. Call initialize_context first.".into(),
            ));
        };

        let accounts = self
            .services
            .accounts
            .get_accounts(&identity.user.id)
            .await
            .map_err(|e| AgentError::SessionError(e.message))?;

        let mut block = String::new();
        block.push_str("[Current User]\n");
        block.push_str(&serde_json::to_string(&identity.user)?);
        block.push_str("\n\n[User's Bank Accounts — fetched fresh this turn]\n");
        block.push_str(&serde_json::to_string(&accounts)?);
        block.push_str("\n\n[User's Contacts]\n");
        block.push_str(&serde_json::to_string(&identity.contacts)?);
        Ok(block)
    }
}
