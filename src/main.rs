use sibyl::cli::{Cli, Commands, ConfigAction, UserAction};
use sibyl::config::Config;
use sibyl::error::{Result, SibylError};
use sibyl::services::{expand_path, ServiceRegistry};
use sibyl::storage::Database;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve => {
            cmd_serve(cli.config)?;
        }
        Commands::Init => {
            cmd_init(cli.config)?;
        }
        Commands::Ingest {
            documents_dir,
            manifest,
        } => {
            cmd_ingest(cli.config, documents_dir, manifest)?;
        }
        Commands::Ask {
            question,
            user,
            department,
            json,
        } => {
            cmd_ask(cli.config, &question, &user, department, json)?;
        }
        Commands::User { action } => {
            cmd_user(cli.config, action)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "sibyl=debug" } else { "sibyl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| SibylError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_serve(config_path: Option<std::path::PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    tracing::info!("Initializing services...");
    let registry = Arc::new(ServiceRegistry::initialize(config)?);

    runtime()?.block_on(sibyl::api::serve(registry))
}

fn cmd_init(config_path: Option<std::path::PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let data_dir = expand_path(&config.storage.data_dir)?;

    let db = Database::new(&data_dir.join("sibyl.db"))?;
    let created = db.seed_roles()?;

    println!("✓ Database ready at {}", data_dir.join("sibyl.db").display());
    println!("✓ {} roles seeded", created);

    Ok(())
}

fn cmd_ingest(
    config_path: Option<std::path::PathBuf>,
    documents_dir: std::path::PathBuf,
    manifest: Option<std::path::PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    // Ingestion touches neither the LLM nor the reranker; skip their setup
    config.llm.enabled = false;
    config.retrieval.enable_reranking = false;

    let registry = ServiceRegistry::initialize(config)?;
    let manifest_path = manifest.unwrap_or_else(|| documents_dir.join("manifest.json"));

    let report = runtime()?.block_on(sibyl::ingest::run(
        &registry,
        &documents_dir,
        &manifest_path,
    ))?;

    println!(
        "✓ Ingested {} documents ({} chunks), {} skipped",
        report.documents_ingested, report.chunks_indexed, report.documents_skipped
    );

    Ok(())
}

fn cmd_ask(
    config_path: Option<std::path::PathBuf>,
    question: &str,
    user_id: &str,
    department: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = ServiceRegistry::initialize(config)?;

    let user = registry
        .database
        .get_user_context(user_id)?
        .ok_or_else(|| SibylError::UnknownUser {
            id: user_id.to_string(),
        })?;

    let outcome = runtime()?.block_on(registry.execute_search(
        &user,
        question,
        department.as_deref(),
    ))?;

    if json {
        let payload = serde_json::json!({
            "answer": outcome.answer,
            "citations": outcome.citations,
            "latency_ms": outcome.latency_ms,
            "chunks_found": outcome.chunks_found,
        });
        println!("{}", serde_json::to_string_pretty(&payload).map_err(|e| SibylError::Json {
            source: e,
            context: "Failed to serialize response".to_string(),
        })?);
        return Ok(());
    }

    println!("{}\n", outcome.answer);

    if !outcome.citations.is_empty() {
        println!("Sources:");
        for citation in &outcome.citations {
            println!(
                "  [{}] {} ({})",
                citation.marker, citation.doc_title, citation.department
            );
        }
    }

    println!(
        "\n{} chunks found in {} ms",
        outcome.chunks_found, outcome.latency_ms
    );

    Ok(())
}

fn cmd_user(config_path: Option<std::path::PathBuf>, action: UserAction) -> Result<()> {
    let config = load_config(config_path)?;
    let data_dir = expand_path(&config.storage.data_dir)?;
    let db = Database::new(&data_dir.join("sibyl.db"))?;

    match action {
        UserAction::Add {
            id,
            email,
            department,
            roles,
        } => {
            let created = db.create_user(&id, &email, &department, &roles)?;
            if created {
                println!("✓ User '{}' registered with roles {:?}", id, roles);
            } else {
                println!("User '{}' already exists, nothing changed", id);
            }
        }
    }

    Ok(())
}

fn cmd_config(config_path: Option<std::path::PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let serialized = toml::to_string_pretty(&config)?;
            println!("{}", serialized);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SibylError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(path) => path,
                None => Config::default_path()?,
            };
            Config::load(&path)?;
            println!("✓ Configuration is valid");
        }
    }

    Ok(())
}

fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'sibyl config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}
