//! feedback CLI: batch analysis of coaching-session transcripts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use session_feedback::analysis::{AnalysisPipeline, CompletenessValidator};
use session_feedback::cache::CacheManager;
use session_feedback::config::{Config, Settings};
use session_feedback::engine::system::{ProcessMemory, Reclaim};
use session_feedback::engine::{ControlPlane, JobQueue, StuckJobMonitor, SystemMonitor};
use session_feedback::media::TranscriptDir;
use session_feedback::model::{
    AnalysisDocument, JobId, JobInput, PartialDocument, Provenance, Schema, Section,
    SessionMetadata,
};
use session_feedback::provider::{LlmProvider, ProviderDef, ProviderRegistry, load_definitions};
use session_feedback::store::{JobStore, MemoryStore};
use session_feedback::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "feedback", about = "Structured feedback for coaching sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse transcripts and write one feedback document per transcript
    Analyze {
        /// Transcript references, relative to --media-root (".txt" optional)
        #[arg(required = true)]
        transcripts: Vec<String>,
        /// Directory containing provider TOML definitions
        #[arg(long, default_value = "providers")]
        providers: PathBuf,
        /// Directory transcripts are resolved against
        #[arg(long, default_value = ".")]
        media_root: PathBuf,
        /// Write documents here instead of printing a summary only
        #[arg(long)]
        out: Option<PathBuf>,
        /// Settings TOML (overrides FEEDBACK_SETTINGS)
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Print the completeness report for a saved document
    Validate {
        /// Document JSON, either as written by `analyze` or a plain section map
        document: PathBuf,
        /// Provider definitions used to attribute sections
        #[arg(long)]
        providers: Option<PathBuf>,
    },
    /// Print the required document schema as JSON
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Analyze {
            transcripts,
            providers,
            media_root,
            out,
            settings,
        } => cmd_analyze(transcripts, providers, media_root, out, settings).await,
        Command::Validate {
            document,
            providers,
        } => cmd_validate(&document, providers.as_deref()),
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(&Schema::coaching())?);
            Ok(())
        }
    }
}

async fn cmd_analyze(
    transcripts: Vec<String>,
    providers: PathBuf,
    media_root: PathBuf,
    out: Option<PathBuf>,
    settings_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let settings = match settings_path {
        Some(path) => Settings::load(&path)?,
        None => config.settings()?,
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "session-feedback".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let schema = Schema::coaching();
    let mut registry = ProviderRegistry::empty();
    for def in load_definitions(&providers)? {
        let provider = LlmProvider::from_key(def, &config.anthropic_api_key, schema.clone())?;
        registry.register(Arc::new(provider));
    }
    if registry.is_empty() {
        anyhow::bail!("no provider definitions found in {}", providers.display());
    }

    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(settings.cache_manager());
    let pipeline = AnalysisPipeline::assemble(
        store.clone(),
        Arc::new(TranscriptDir::new(&media_root)),
        cache.clone(),
        registry,
        schema,
        settings.orchestrator_config(),
        settings.gap_fill_config(),
    );

    let queue = JobQueue::new(Arc::new(pipeline), store.clone(), settings.queue_config());
    let control = control_plane(&queue, &store, &cache, &settings);

    let mut jobs: Vec<(String, JobId)> = Vec::with_capacity(transcripts.len());
    for media_ref in transcripts {
        let metadata = SessionMetadata {
            title: Some(media_ref.clone()),
            ..Default::default()
        };
        let id = store
            .submit(JobInput::from_media(&media_ref).metadata(metadata), 0)
            .await;
        jobs.push((media_ref, id));
    }

    let ctrl = control.clone();
    let control_task = tokio::spawn(async move { ctrl.run().await });
    let ctrl = control.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    queue.enqueue_pending().await?;
    queue.wait_idle().await;
    control.shutdown();
    control_task.await??;

    if let Some(dir) = &out {
        std::fs::create_dir_all(dir)?;
    }

    println!("{:<8}  {:<12}  {:<11}  SOURCE", "ID", "STATUS", "QUALITY");
    println!("{}", "-".repeat(60));
    for (media_ref, id) in &jobs {
        let record = store.get_job(*id).await?;
        let doc = store.document(*id).await;
        let quality = doc
            .as_ref()
            .map(|d| format!("{:?}", d.quality))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<12}  {:<11}  {}",
            id.to_string(),
            record.status.to_string(),
            quality,
            media_ref
        );

        if let (Some(dir), Some(doc)) = (&out, &doc) {
            let path = dir.join(format!("{}.json", file_stem(media_ref)));
            std::fs::write(&path, serde_json::to_string_pretty(doc)?)?;
        }
    }
    Ok(())
}

fn control_plane(
    queue: &JobQueue,
    store: &Arc<MemoryStore>,
    cache: &Arc<CacheManager>,
    settings: &Settings,
) -> ControlPlane {
    let stuck = StuckJobMonitor::new(store.clone(), settings.stuck_config());
    let system = SystemMonitor::new(
        queue.clone(),
        Arc::new(ProcessMemory),
        vec![cache.clone() as Arc<dyn Reclaim>],
        settings.system_config(),
    );
    ControlPlane::new(
        queue.clone(),
        Arc::new(stuck),
        Arc::new(system),
        settings.control_config(),
    )
}

fn file_stem(media_ref: &str) -> String {
    Path::new(media_ref)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| media_ref.replace('/', "_"))
}

fn cmd_validate(document: &Path, providers: Option<&Path>) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(document)?;
    let validator = CompletenessValidator::default();

    let doc = match serde_json::from_str::<AnalysisDocument>(&content) {
        Ok(doc) => doc,
        Err(_) => {
            let partial = PartialDocument::parse(&content)?;
            let mut doc = AnalysisDocument::new();
            doc.merge_partial(
                &partial,
                &Provenance::Provider("input".to_string()),
                &validator.schema().rule,
            );
            doc
        }
    };

    let owners = match providers {
        Some(dir) => ownership(&load_definitions(dir)?),
        None => BTreeMap::new(),
    };

    let report = validator.validate(&doc, &owners);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Section ownership from definitions alone, first declaration wins.
fn ownership(defs: &[ProviderDef]) -> BTreeMap<Section, String> {
    Section::ALL
        .into_iter()
        .filter_map(|s| {
            defs.iter()
                .find(|d| d.sections.contains(&s))
                .map(|d| (s, d.name.clone()))
        })
        .collect()
}
