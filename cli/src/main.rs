//! Server entry point.
//!
//! Startup order matters: config parse, store open plus the interrupted
//! sweep, tool registry build (duplicate ids are fatal), then bind. Any
//! failure before the bind exits 1.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use choraleia::{
    register_builtin_tools, CancelRegistry, NullBrowserService, Orchestrator,
    OrchestratorSettings, StoreAssetResolver, ToolContext, ToolRegistry,
    WorkspaceRuntimeManager,
};
use choraleia_store::Store;
use remote_fs::{FsRegistry, SshPool};
use serve::AppState;

#[derive(Parser, Debug)]
#[command(name = "choraleia", about = "AI agent orchestrator for the choraleia platform")]
struct Args {
    /// Config file path; default ~/.choraleia/config.yaml.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Override the bind address from config.
    #[arg(long)]
    bind: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("runtime init failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(Args::parse())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {}", e);
            eprintln!("choraleia: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), String> {
    let app_config = match &args.config {
        Some(path) => config::ChoraleiaConfig::load_from(path),
        None => config::ChoraleiaConfig::load_default(),
    }
    .map_err(|e| format!("config: {}", e))?;
    let bind_addr = args.bind.unwrap_or_else(|| app_config.bind_addr());

    let models_path = config::models_file_path().map_err(|e| format!("config: {}", e))?;
    let models = config::models::load_models(&models_path)
        .map_err(|e| format!("models: {}", e))?;
    if models.is_empty() {
        tracing::warn!(path = %models_path.display(), "no model definitions loaded");
    }

    let app_dir = config::app_dir().map_err(|e| format!("config: {}", e))?;
    std::fs::create_dir_all(&app_dir).map_err(|e| format!("create {}: {}", app_dir.display(), e))?;
    let db_path = config::db_file_path().map_err(|e| format!("config: {}", e))?;
    let store = Arc::new(Store::open(&db_path).map_err(|e| format!("store: {}", e))?);

    // Boot sweep: writers of `streaming` messages died with the process.
    let flipped = store
        .mark_interrupted_on_startup()
        .await
        .map_err(|e| format!("startup sweep: {}", e))?;
    if flipped > 0 {
        tracing::info!(count = flipped, "marked orphaned streaming messages interrupted");
    }

    let pool = SshPool::new();
    let resolver = Arc::new(StoreAssetResolver::new(Arc::clone(&store)));
    let fs_registry = FsRegistry::new(Arc::clone(&pool), resolver.clone());
    let runtime_manager =
        WorkspaceRuntimeManager::new(Arc::clone(&pool), resolver, Arc::clone(&store));
    runtime_manager.start_monitor();

    let mut registry = ToolRegistry::new();
    let tool_context = ToolContext {
        runtime: Arc::clone(&runtime_manager),
        fs_registry: fs_registry.clone(),
        store: Arc::clone(&store),
        browser: Arc::new(NullBrowserService),
    };
    register_builtin_tools(&mut registry, &tool_context)
        .map_err(|e| format!("tool registry: {}", e))?;
    tracing::info!(tools = registry.len(), "tool registry frozen");

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::new(choraleia::OpenAiCompatProvider::new()),
        Arc::new(registry),
        Arc::clone(&runtime_manager),
        Arc::new(CancelRegistry::new()),
        OrchestratorSettings::default(),
    ));

    let state = AppState::new(store, orchestrator, fs_registry, models);
    let result = serve::run(state, &bind_addr)
        .await
        .map_err(|e| format!("bind {}: {}", bind_addr, e));
    pool.shutdown().await;
    runtime_manager.stop_monitor();
    result
}
