use chrono::Utc;
use clap::{ArgGroup, CommandFactory, Parser, ValueEnum};
use rag_chat_core::{
    format_listing, Assistant, AssistantOptions, CharacterNgramEmbedder, ChunkingConfig, Embedder,
    GenerationConfig, Generator, LocalStore, OllamaClient, OllamaEmbedder, QdrantStore, Session,
    VectorStore, DEFAULT_COLLECTION,
};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreKind {
    /// JSON-persisted collection on local disk.
    Local,
    /// Remote Qdrant collection.
    Qdrant,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Offline hashed character trigrams.
    Ngram,
    /// Ollama `/api/embed` endpoint.
    Ollama,
}

#[derive(Parser)]
#[command(name = "rag-chat", version, about = "Chat with your documents through a local Ollama model")]
#[command(group(
    ArgGroup::new("action")
        .args(["add_doc", "list_docs", "question", "interactive"])
        .multiple(false)
))]
struct Cli {
    /// Ollama model name
    #[arg(long, env = "RAG_MODEL", default_value = "gemma2:2b")]
    model: String,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Add a document (or every document in a folder) to the knowledge base
    #[arg(long)]
    add_doc: Option<PathBuf>,

    /// List all documents of the knowledge base
    #[arg(long, default_value_t = false)]
    list_docs: bool,

    /// Ask a single question
    #[arg(long)]
    question: Option<String>,

    /// Start interactive mode
    #[arg(long, default_value_t = false)]
    interactive: bool,

    /// Vector store backend
    #[arg(long, value_enum, default_value_t = StoreKind::Local)]
    store: StoreKind,

    /// Directory of the local store
    #[arg(long, env = "RAG_DB_PATH", default_value = "database")]
    db_path: PathBuf,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Collection holding the chunk records
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Embedding backend
    #[arg(long, value_enum, default_value_t = EmbedderKind::Ngram)]
    embedder: EmbedderKind,

    /// Ollama embedding model, used with `--embedder ollama`
    #[arg(long, default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Embedding vector length (128 for ngram, 768 for ollama when unset)
    #[arg(long)]
    embedding_dimensions: Option<usize>,

    /// Characters per chunk window
    #[arg(long, default_value_t = 1_000)]
    chunk_size: usize,

    /// Characters shared by consecutive chunk windows
    #[arg(long, default_value_t = 200)]
    chunk_overlap: usize,

    /// Wait for the whole answer instead of streaming it
    #[arg(long, default_value_t = false)]
    no_stream: bool,

    /// Send questions without retrieved context
    #[arg(long, default_value_t = false)]
    no_context: bool,
}

enum Action {
    AddDoc(PathBuf),
    ListDocs,
    Question(String),
    Interactive,
}

impl Cli {
    fn action(&self) -> Option<Action> {
        if let Some(path) = &self.add_doc {
            Some(Action::AddDoc(path.clone()))
        } else if self.list_docs {
            Some(Action::ListDocs)
        } else if let Some(question) = &self.question {
            Some(Action::Question(question.clone()))
        } else if self.interactive {
            Some(Action::Interactive)
        } else {
            None
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(action) = cli.action() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let options = AssistantOptions {
        chunking: ChunkingConfig {
            chunk_size: cli.chunk_size,
            overlap: cli.chunk_overlap,
            ..ChunkingConfig::default()
        },
        stream: !cli.no_stream,
        ..AssistantOptions::default()
    };
    options
        .chunking
        .validate()
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        model = %cli.model,
        "rag-chat boot"
    );

    let generator = OllamaClient::new(GenerationConfig {
        base_url: cli.ollama_url.clone(),
        model: cli.model.clone(),
        ..GenerationConfig::default()
    })?;

    match cli.embedder {
        EmbedderKind::Ngram => {
            let embedder = CharacterNgramEmbedder {
                dimensions: cli
                    .embedding_dimensions
                    .unwrap_or(rag_chat_core::DEFAULT_EMBEDDING_DIMENSIONS),
            };
            with_embedder(&cli, action, generator, options, embedder).await
        }
        EmbedderKind::Ollama => {
            let embedder = OllamaEmbedder::new(
                &cli.ollama_url,
                &cli.embedding_model,
                cli.embedding_dimensions.unwrap_or(768),
            )?;
            with_embedder(&cli, action, generator, options, embedder).await
        }
    }
}

async fn with_embedder<E: Embedder>(
    cli: &Cli,
    action: Action,
    generator: OllamaClient,
    options: AssistantOptions,
    embedder: E,
) -> anyhow::Result<()> {
    let use_context = !cli.no_context;

    match cli.store {
        StoreKind::Local => {
            let store = LocalStore::open(&cli.db_path, &cli.collection).await?;
            let assistant = Assistant::new(store, generator, embedder, options)?;
            run(&assistant, action, use_context).await
        }
        StoreKind::Qdrant => {
            let store = QdrantStore::new(&cli.qdrant_url, &cli.collection, embedder.dimensions());
            let assistant = Assistant::new(store, generator, embedder, options)?;
            run(&assistant, action, use_context).await
        }
    }
}

async fn run<S, G, E>(
    assistant: &Assistant<S, G, E>,
    action: Action,
    use_context: bool,
) -> anyhow::Result<()>
where
    S: VectorStore,
    G: Generator,
    E: Embedder,
{
    match action {
        Action::AddDoc(path) => {
            if !path.exists() {
                anyhow::bail!("File not found: {}", path.display());
            }

            println!("Processing: {}", path.display());
            let outcome = assistant
                .ingest_path(&path)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            for skipped in &outcome.skipped {
                warn!(path = %skipped.path, reason = %skipped.reason, "skipped document");
            }
            for report in &outcome.ingested {
                println!(
                    "Added {} chunks from '{}' (sha256 {})",
                    report.chunk_count, report.document, report.checksum
                );
            }

            if outcome.ingested.is_empty() {
                println!("0 documents added (all files were skipped)");
            } else {
                println!("Document added successfully!");
            }
        }
        Action::ListDocs => {
            let documents = assistant
                .list_documents()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("{}", format_listing(&documents));
        }
        Action::Question(question) => {
            print!("Answer: ");
            std::io::stdout().flush()?;

            let mut streamed = false;
            let result = {
                let mut echo = |fragment: &str| {
                    streamed = true;
                    print!("{fragment}");
                    let _ = std::io::stdout().flush();
                };
                assistant.ask(&question, use_context, &mut echo).await
            };

            match result {
                Ok(answer) if !streamed => print!("{answer}"),
                Ok(_) => {}
                Err(error) => {
                    if streamed {
                        println!();
                    }
                    print!("{}", assistant.describe_failure(&error).await);
                }
            }
            println!();
        }
        Action::Interactive => {
            let mut session = Session::new(assistant, use_context);
            let mut input = BufReader::new(tokio::io::stdin());
            let mut out = std::io::stdout();
            session.run(&mut input, &mut out).await?;
        }
    }

    Ok(())
}
