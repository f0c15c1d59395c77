//! Scribe Server
//!
//! Axum server and terminal front end for the research workflow. Both drive
//! the same `Coordinator` from crates/core; the server also re-broadcasts
//! progress events over SSE.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Response, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{delete, get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream};
use scribe_core::config::{ResearchConfig, SchedulingPolicy};
use scribe_core::models::LlmProvider;
use scribe_core::skills::PromptBook;
use scribe_core::state::SessionDb;
use scribe_core::workflow::{Coordinator, ResearchEvent, ResponseStatus};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use utoipa::{OpenApi, ToSchema};

/// Application state
struct AppState {
    coordinator: Arc<Coordinator>,
    db: Arc<SessionDb>,
    event_tx: broadcast::Sender<ResearchEvent>,
    /// Config file the server was started with
    config_path: Option<PathBuf>,
    /// Address advertised in the agent card
    public_url: String,
}

type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Deserialize, ToSchema)]
struct MessageRequest {
    /// Existing session to continue; a new one is created when absent
    session_id: Option<String>,
    message: String,
}

#[derive(Serialize, ToSchema)]
struct MessageResponse {
    session_id: String,
    /// `input_required`, `completed` or `error`
    status: String,
    message: String,
}

#[derive(Deserialize, ToSchema)]
struct CancelRequest {
    session_id: String,
}

#[derive(Serialize, ToSchema)]
struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(Serialize, ToSchema)]
struct SessionItem {
    id: String,
    status: String,
}

#[derive(Serialize, ToSchema)]
struct SessionListResponse {
    sessions: Vec<SessionItem>,
}

// === Prompt Template Types ===

#[derive(Serialize, ToSchema)]
struct PromptListItem {
    slug: String,
    version: i32,
}

#[derive(Serialize, ToSchema)]
struct PromptListResponse {
    prompts: Vec<PromptListItem>,
}

#[derive(Serialize, ToSchema)]
struct PromptResponse {
    slug: String,
    content: String,
}

#[derive(Deserialize, ToSchema)]
struct UpdatePromptRequest {
    content: String,
}

#[derive(Serialize, ToSchema)]
struct UpdatePromptResponse {
    success: bool,
    slug: String,
    new_version: i32,
}

// === Config API Types ===

#[derive(Serialize, ToSchema)]
struct ConfigResponse {
    /// Configuration the running coordinator uses
    #[schema(value_type = Object)]
    active: serde_json::Value,
    #[schema(value_type = Object)]
    defaults: serde_json::Value,
}

/// Partial update written to the config file; takes effect on restart
#[derive(Debug, Default, Deserialize, ToSchema)]
struct ConfigPatch {
    max_queries_per_round: Option<usize>,
    search_result_depth: Option<usize>,
    max_reflection_rounds: Option<u32>,
    inter_section_delay_secs: Option<f64>,
    temperature: Option<f32>,
    /// `sequential` or `concurrent`
    scheduling: Option<String>,
    max_concurrent_sections: Option<usize>,
    provider: Option<String>,
    model: Option<String>,
}

impl ConfigPatch {
    fn apply(self, config: &mut ResearchConfig) -> anyhow::Result<()> {
        if let Some(v) = self.max_queries_per_round {
            config.max_queries_per_round = v;
        }
        if let Some(v) = self.search_result_depth {
            config.search_result_depth = v;
        }
        if let Some(v) = self.max_reflection_rounds {
            config.max_reflection_rounds = v;
        }
        if let Some(v) = self.inter_section_delay_secs {
            config.inter_section_delay_secs = v;
        }
        if let Some(v) = self.temperature {
            config.temperature = v;
        }
        if let Some(v) = self.scheduling {
            config.scheduling = serde_json::from_value(serde_json::Value::String(v))?;
        }
        if let Some(v) = self.max_concurrent_sections {
            config.max_concurrent_sections = v;
        }
        if let Some(v) = self.provider {
            config.model.provider = v.parse()?;
        }
        if let Some(v) = self.model {
            config.model.model = v;
        }
        config.validate()?;
        Ok(())
    }
}

// === Provider API Types ===

#[derive(Debug, Serialize, ToSchema)]
struct ProviderInfo {
    id: String,
    name: String,
    supports_base_url: bool,
    env_var: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct ProvidersResponse {
    providers: Vec<ProviderInfo>,
}

fn get_provider_info() -> Vec<ProviderInfo> {
    LlmProvider::all()
        .into_iter()
        .map(|p| ProviderInfo {
            id: p.display_name().to_lowercase(),
            name: p.display_name().to_string(),
            supports_base_url: p.supports_base_url(),
            env_var: p.api_key_env().to_string(),
        })
        .collect()
}

// === CLI ===

#[derive(Parser, Clone)]
#[command(author, version, about = "Scribe - Multi-section research report writer")]
struct Args {
    /// Config file (defaults to .scribe/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Research sections concurrently instead of one at a time
    #[arg(long, global = true)]
    concurrent: bool,
    /// Override the reflection round budget per section
    #[arg(long, global = true)]
    max_rounds: Option<u32>,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Scribe server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Research a topic in the terminal (no server)
    Run {
        /// The report topic
        topic: String,
    },
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scribe API",
        version = "1.0.0",
        description = "API for the Scribe multi-section research workflow"
    ),
    paths(
        post_message,
        cancel_run,
        list_sessions,
        reset_session,
        get_config,
        update_config,
        get_providers,
        list_prompts,
        get_prompt,
        update_prompt
    ),
    components(
        schemas(
            MessageRequest,
            MessageResponse,
            CancelRequest,
            ApiResponse,
            SessionItem,
            SessionListResponse,
            ConfigResponse,
            ConfigPatch,
            ProvidersResponse,
            ProviderInfo,
            PromptListResponse,
            PromptListItem,
            PromptResponse,
            UpdatePromptRequest,
            UpdatePromptResponse
        )
    ),
    tags(
        (name = "research", description = "Report conversations and runs"),
        (name = "config", description = "Configuration management"),
        (name = "providers", description = "LLM provider discovery"),
        (name = "prompts", description = "Prompt template management")
    )
)]
struct ApiDoc;

// === Research Handlers ===

/// Send a user message and run one turn of the report workflow
#[utoipa::path(
    post,
    path = "/api/v1/research/messages",
    tag = "research",
    request_body = MessageRequest,
    responses(
        (status = 200, description = "Outline awaiting feedback, finished report, or error", body = MessageResponse)
    )
)]
async fn post_message(
    State(state): State<SharedState>,
    Json(req): Json<MessageRequest>,
) -> Json<MessageResponse> {
    let session_id = req
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!(session = %session_id, "message received");

    let envelope = state.coordinator.handle_turn(&session_id, &req.message).await;
    Json(MessageResponse {
        session_id,
        status: envelope.status.as_str().to_string(),
        message: envelope.message,
    })
}

/// Cancel the run in flight for a session
#[utoipa::path(
    post,
    path = "/api/v1/research/cancel",
    tag = "research",
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Cancellation result", body = ApiResponse)
    )
)]
async fn cancel_run(
    State(state): State<SharedState>,
    Json(req): Json<CancelRequest>,
) -> Json<ApiResponse> {
    let cancelled = state.coordinator.cancel(&req.session_id).await;
    Json(ApiResponse {
        success: cancelled,
        message: if cancelled {
            format!("Cancelled run for session {}", req.session_id)
        } else {
            format!("No run in flight for session {}", req.session_id)
        },
    })
}

/// List sessions waiting on outline feedback
#[utoipa::path(
    get,
    path = "/api/v1/research/sessions",
    tag = "research",
    responses(
        (status = 200, description = "Stored sessions", body = SessionListResponse)
    )
)]
async fn list_sessions(State(state): State<SharedState>) -> Json<SessionListResponse> {
    let sessions = match state.db.list_sessions() {
        Ok(rows) => rows
            .into_iter()
            .map(|(id, status)| SessionItem { id, status })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to list sessions: {}", e);
            Vec::new()
        }
    };
    Json(SessionListResponse { sessions })
}

/// Forget a session's conversation
#[utoipa::path(
    delete,
    path = "/api/v1/research/sessions/{id}",
    tag = "research",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session removed", body = ApiResponse)
    )
)]
async fn reset_session(State(state): State<SharedState>, Path(id): Path<String>) -> Json<ApiResponse> {
    state.coordinator.reset(&id).await;
    Json(ApiResponse {
        success: true,
        message: format!("Session {} reset", id),
    })
}

/// SSE endpoint for research progress events with heartbeat
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        let timeout = tokio::time::timeout(std::time::Duration::from_secs(15), rx.recv()).await;

        match timeout {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().event("research").data(json)), rx))
            }
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => Some((
                Ok(Event::default().comment(format!("skipped {} events", skipped))),
                rx,
            )),
            Ok(Err(broadcast::error::RecvError::Closed)) => None,
            // Timeout - send heartbeat comment
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// === Config Handlers ===

/// Get the active configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Active configuration and defaults", body = ConfigResponse)
    )
)]
async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        active: serde_json::to_value(state.coordinator.config()).unwrap_or_default(),
        defaults: serde_json::to_value(ResearchConfig::default()).unwrap_or_default(),
    })
}

/// Update the config file (partial merge, applied on restart)
#[utoipa::path(
    patch,
    path = "/api/v1/config",
    tag = "config",
    request_body = ConfigPatch,
    responses(
        (status = 200, description = "Config file updated", body = ApiResponse),
        (status = 400, description = "Invalid value", body = ApiResponse)
    )
)]
async fn update_config(
    State(state): State<SharedState>,
    Json(patch): Json<ConfigPatch>,
) -> (StatusCode, Json<ApiResponse>) {
    let path = state
        .config_path
        .clone()
        .unwrap_or_else(ResearchConfig::default_path);
    let result: anyhow::Result<()> = async {
        // Merge into the file as written, without environment overrides
        let mut config = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ResearchConfig::default(),
            Err(e) => return Err(e.into()),
        };
        patch.apply(&mut config)?;
        config.save(Some(&path)).await
    }
    .await;

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                message: "Configuration saved; restart to apply".to_string(),
            }),
        ),
        Err(e) => {
            tracing::warn!("Failed to update config: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse {
                    success: false,
                    message: e.to_string(),
                }),
            )
        }
    }
}

/// Get available LLM providers
#[utoipa::path(
    get,
    path = "/api/v1/providers",
    tag = "providers",
    responses(
        (status = 200, description = "List of supported LLM providers", body = ProvidersResponse)
    )
)]
async fn get_providers() -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: get_provider_info(),
    })
}

// === Prompt Template Handlers ===

/// List all prompts
#[utoipa::path(
    get,
    path = "/api/v1/prompts",
    tag = "prompts",
    responses(
        (status = 200, description = "List of prompts", body = PromptListResponse)
    )
)]
async fn list_prompts(State(state): State<SharedState>) -> Json<PromptListResponse> {
    match state.db.list_prompts() {
        Ok(prompts) => Json(PromptListResponse {
            prompts: prompts
                .into_iter()
                .map(|(slug, version)| PromptListItem { slug, version })
                .collect(),
        }),
        Err(_) => Json(PromptListResponse { prompts: vec![] }),
    }
}

/// Get a prompt by slug
#[utoipa::path(
    get,
    path = "/api/v1/prompts/{slug}",
    tag = "prompts",
    params(("slug" = String, Path, description = "Prompt slug")),
    responses(
        (status = 200, description = "Prompt content", body = PromptResponse),
        (status = 404, description = "Unknown prompt")
    )
)]
async fn get_prompt(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<Json<PromptResponse>, StatusCode> {
    match state.db.get_prompt(&slug) {
        Ok(Some(content)) => Ok(Json(PromptResponse { slug, content })),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::warn!("Failed to read prompt {}: {}", slug, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Update a prompt (used by runs started after a restart)
#[utoipa::path(
    put,
    path = "/api/v1/prompts/{slug}",
    tag = "prompts",
    params(("slug" = String, Path, description = "Prompt slug")),
    request_body = UpdatePromptRequest,
    responses(
        (status = 200, description = "Prompt updated", body = UpdatePromptResponse)
    )
)]
async fn update_prompt(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Json(req): Json<UpdatePromptRequest>,
) -> Json<UpdatePromptResponse> {
    match state.db.set_prompt(&slug, &req.content) {
        Ok(new_version) => Json(UpdatePromptResponse {
            success: true,
            slug,
            new_version,
        }),
        Err(_) => Json(UpdatePromptResponse {
            success: false,
            slug,
            new_version: 0,
        }),
    }
}

// === OpenAPI Handler ===

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(spec) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            spec,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// === A2A Agent Card Handler ===

/// Serve the A2A agent card for agent discovery
///
/// AgentDefinition fields are private in radkit, so the card is built
/// statically from the skill metadata.
async fn serve_agent_card(State(state): State<SharedState>) -> Response<Body> {
    let body = serde_json::to_string_pretty(&agent_card(&state.public_url)).unwrap_or_default();
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        header::HeaderValue::from_static("*"),
    );
    response
}

fn agent_card(url: &str) -> serde_json::Value {
    serde_json::json!({
        "name": "Deep Research Agent",
        "description": "Plans a report outline with the user, researches each section through iterative search and self-critique, and assembles a referenced report.",
        "url": url,
        "version": "1.0.0",
        "capabilities": {
            "streaming": true,
            "pushNotifications": false,
            "stateTransitionHistory": false
        },
        "skills": [
            {
                "id": "deep_research",
                "name": "Deep Research Analysis",
                "description": "Plans an outline with the user, researches every section with web search and self-critique, and writes a referenced long-form report.",
                "tags": ["research", "analysis", "academic", "literature review"],
                "inputModes": ["text/plain"],
                "outputModes": ["text/markdown", "application/json"]
            }
        ]
    })
}

// === Setup ===

async fn load_config(args: &Args) -> anyhow::Result<ResearchConfig> {
    let mut config = ResearchConfig::load(args.config.as_deref()).await?;
    if args.concurrent {
        config.scheduling = SchedulingPolicy::Concurrent;
    }
    if let Some(rounds) = args.max_rounds {
        config.max_reflection_rounds = rounds;
    }
    config.validate()?;
    Ok(config)
}

fn open_db() -> anyhow::Result<Arc<SessionDb>> {
    let db = Arc::new(SessionDb::open()?);
    match db.seed_prompts() {
        Ok(count) if count > 0 => tracing::info!("Seeded {} default prompts", count),
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to seed prompts: {}", e),
    }
    Ok(db)
}

fn build_coordinator(
    config: ResearchConfig,
    db: &Arc<SessionDb>,
    event_tx: Option<mpsc::Sender<ResearchEvent>>,
) -> anyhow::Result<Coordinator> {
    let prompts = PromptBook::from_db(db);
    let coordinator = Coordinator::from_config(config)?
        .with_db(Arc::clone(db))
        .with_prompts(prompts);
    Ok(match event_tx {
        Some(tx) => coordinator.with_event_channel(tx),
        None => coordinator,
    })
}

// === Server Entry ===

async fn run_server(args: &Args, port: u16) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    let db = open_db()?;

    let (event_tx, _) = broadcast::channel::<ResearchEvent>(256);
    let (event_mpsc_tx, mut event_mpsc_rx) = mpsc::channel::<ResearchEvent>(256);

    // Bridge events to broadcast
    let broadcast_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = event_mpsc_rx.recv().await {
            let _ = broadcast_tx.send(event);
        }
    });

    let coordinator = Arc::new(build_coordinator(config, &db, Some(event_mpsc_tx))?);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let state: SharedState = Arc::new(AppState {
        coordinator,
        db,
        event_tx,
        config_path: args.config.clone(),
        public_url: format!("http://{}", addr),
    });

    let research_routes = Router::new()
        .route("/messages", post(post_message))
        .route("/cancel", post(cancel_run))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", delete(reset_session))
        .route("/events", get(events));

    let prompt_routes = Router::new()
        .route("/", get(list_prompts))
        .route("/:slug", get(get_prompt).put(update_prompt));

    let app = Router::new()
        .nest("/api/v1/research", research_routes)
        .nest("/api/v1/prompts", prompt_routes)
        .route("/api/v1/config", get(get_config).patch(update_config))
        .route("/api/v1/providers", get(get_providers))
        .route("/api/v1/openapi.json", get(serve_openapi))
        // A2A Discovery endpoint
        .route("/.well-known/agent-card.json", get(serve_agent_card))
        .with_state(state);

    tracing::info!("Scribe Server running at http://{}", addr);
    tracing::info!("Research: /api/v1/research/messages, /cancel, /sessions, /events");
    tracing::info!("Config:   /api/v1/config (GET, PATCH), /api/v1/providers, /api/v1/prompts");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// === Terminal Entry ===

/// Converse in the terminal until the report is finished or fails.
async fn run_cli(args: &Args, topic: String) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    let db = open_db()?;
    let coordinator = build_coordinator(config, &db, None)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message = topic;

    loop {
        let envelope = coordinator.handle_turn(&session_id, &message).await;
        match envelope.status {
            ResponseStatus::InputRequired => {
                println!("\n{}\n", envelope.message);
                println!("> Reply to refine the outline, or approve it to start research:");
                match next_reply(&mut lines).await? {
                    Some(line) => message = line,
                    None => {
                        coordinator.reset(&session_id).await;
                        return Ok(());
                    }
                }
            }
            ResponseStatus::Completed => {
                println!("\n{}", envelope.message);
                return Ok(());
            }
            ResponseStatus::Error => {
                anyhow::bail!(envelope.message);
            }
        }
    }
}

/// Next non-blank line, or `None` at end of input.
async fn next_reply<R>(lines: &mut Lines<R>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    match args.command.clone() {
        Some(CliCommand::Run { topic }) => run_cli(&args, topic).await,
        Some(CliCommand::Serve { port }) => run_server(&args, port).await,
        None => run_server(&args, 8080).await,
    }
}
