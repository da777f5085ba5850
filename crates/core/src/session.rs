//! Interactive command loop over an [`Assistant`].
//!
//! Input lines are parsed into a [`Command`] first, then applied to the
//! session; the only terminal state is [`SessionStatus::Stopped`].

use crate::embeddings::Embedder;
use crate::orchestrator::Assistant;
use crate::traits::{Generator, VectorStore};
use crate::RetrievedChunk;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

const PREVIEW_CHARS: usize = 200;

pub const HELP: &str = "Available commands:
  /add <file_path> - Add a document (or a folder of documents) to the knowledge base
  /list - List all documents in the knowledge base
  /search <query> - Search through documents
  /delete <doc_name> - Delete a specific document
  /clear - Clear all documents
  /toggle-context - Toggle context usage on/off
  /status - Show system status
  /help - Show this help
  quit - Leave the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    Add(String),
    List,
    Search(String),
    Delete(String),
    Clear,
    ToggleContext,
    Status,
    Ask(String),
    Empty,
    MissingArgument(&'static str),
    Unknown(String),
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return Command::Empty;
        }

        if input.eq_ignore_ascii_case("quit") {
            return Command::Quit;
        }

        if !input.starts_with('/') {
            return Command::Ask(input.to_string());
        }

        let (name, argument) = match input.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (input, ""),
        };

        let required = |missing: &'static str, build: fn(String) -> Command| {
            if argument.is_empty() {
                Command::MissingArgument(missing)
            } else {
                build(argument.to_string())
            }
        };

        match name {
            "/add" => required("Please provide a file path", Command::Add),
            "/search" => required("Please provide a search query", Command::Search),
            "/delete" => required("Please provide a document name", Command::Delete),
            "/list" => Command::List,
            "/clear" => Command::Clear,
            "/toggle-context" => Command::ToggleContext,
            "/status" => Command::Status,
            "/help" => Command::Help,
            "/quit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub use_context: bool,
    pub model_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Stopped,
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

pub fn format_listing(documents: &BTreeMap<String, usize>) -> String {
    if documents.is_empty() {
        return "No documents in knowledge base".to_string();
    }

    let mut listing = format!("\nDocuments in knowledge base:\n{}\n", "-".repeat(40));
    for (name, chunks) in documents {
        listing.push_str(&format!("{name}: {chunks} chunks\n"));
    }
    listing.push_str(&format!(
        "\nTotal: {} documents, {} chunks",
        documents.len(),
        documents.values().sum::<usize>()
    ));
    listing
}

pub fn format_search(hits: &[RetrievedChunk]) -> String {
    if hits.is_empty() {
        return "No relevant documents found".to_string();
    }

    let mut output = format!("\nFound {} relevant chunks:\n{}", hits.len(), "=".repeat(50));
    for (position, hit) in hits.iter().enumerate() {
        output.push_str(&format!(
            "\n\n{}. [{}] (score {:.3}) {}\n{}",
            position + 1,
            hit.source,
            hit.score,
            preview(&hit.text),
            "-".repeat(30)
        ));
    }
    output
}

async fn read_line<R>(input: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

pub struct Session<'a, S, G, E>
where
    S: VectorStore,
    G: Generator,
    E: Embedder,
{
    assistant: &'a Assistant<S, G, E>,
    state: SessionState,
    status: SessionStatus,
}

impl<'a, S, G, E> Session<'a, S, G, E>
where
    S: VectorStore,
    G: Generator,
    E: Embedder,
{
    pub fn new(assistant: &'a Assistant<S, G, E>, use_context: bool) -> Self {
        Self {
            state: SessionState {
                use_context,
                model_name: assistant.generator().model().to_string(),
            },
            assistant,
            status: SessionStatus::Running,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Reads commands until `quit`, end of input, or Ctrl-C at the prompt.
    /// Ctrl-C while a command runs only abandons that command.
    pub async fn run<R, W>(&mut self, input: &mut R, out: &mut W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: Write + Send,
    {
        writeln!(
            out,
            "RAG chat with {} (type 'quit' to exit)\n{HELP}",
            self.state.model_name
        )?;

        while self.status == SessionStatus::Running {
            write!(out, "\n> ")?;
            out.flush()?;

            let line = tokio::select! {
                line = read_line(input) => line?,
                _ = tokio::signal::ctrl_c() => None,
            };

            let Some(line) = line else {
                writeln!(out, "\nGoodbye!")?;
                self.status = SessionStatus::Stopped;
                break;
            };

            let command = Command::parse(&line);
            let outcome = tokio::select! {
                status = self.handle(command, input, out) => Some(status),
                _ = tokio::signal::ctrl_c() => None,
            };

            match outcome {
                Some(Ok(status)) => self.status = status,
                Some(Err(error)) => return Err(error),
                None => writeln!(out, "\nInterrupted.")?,
            }
        }

        Ok(())
    }

    pub async fn handle<R, W>(
        &mut self,
        command: Command,
        input: &mut R,
        out: &mut W,
    ) -> io::Result<SessionStatus>
    where
        R: AsyncBufRead + Unpin + Send,
        W: Write + Send,
    {
        debug!(?command, "session command");

        match command {
            Command::Quit => {
                self.status = SessionStatus::Stopped;
                return Ok(SessionStatus::Stopped);
            }
            Command::Empty => {}
            Command::Help => writeln!(out, "{HELP}")?,
            Command::MissingArgument(message) => writeln!(out, "{message}")?,
            Command::Unknown(name) => {
                writeln!(out, "Unknown command '{name}'. Type /help for the command list.")?
            }
            Command::Add(path) => self.add(&path, out).await?,
            Command::List => match self.assistant.list_documents().await {
                Ok(documents) => writeln!(out, "{}", format_listing(&documents))?,
                Err(error) => writeln!(out, "Error listing documents: {error}")?,
            },
            Command::Search(query) => match self.assistant.search(&query).await {
                Ok(hits) => writeln!(out, "{}", format_search(&hits))?,
                Err(error) => writeln!(out, "Error searching documents: {error}")?,
            },
            Command::Delete(name) => {
                let question = format!("Are you sure you want to delete '{name}'? (y/N): ");
                if !confirm(input, out, &question).await? {
                    writeln!(out, "Cancelled.")?;
                } else {
                    match self.assistant.delete_document(&name).await {
                        Ok(0) => writeln!(out, "Document '{name}' not found")?,
                        Ok(deleted) => writeln!(out, "Deleted {deleted} chunks from '{name}'")?,
                        Err(error) => writeln!(out, "Error deleting document: {error}")?,
                    }
                }
            }
            Command::Clear => {
                let question = "Are you sure you want to clear ALL documents? (y/N): ";
                if !confirm(input, out, question).await? {
                    writeln!(out, "Cancelled.")?;
                } else {
                    match self.assistant.clear().await {
                        Ok(()) => writeln!(out, "All documents cleared from knowledge base")?,
                        Err(error) => writeln!(out, "Error clearing documents: {error}")?,
                    }
                }
            }
            Command::ToggleContext => {
                self.state.use_context = !self.state.use_context;
                writeln!(out, "Context usage: {}", on_off(self.state.use_context))?;
            }
            Command::Status => {
                match self.assistant.chunk_count().await {
                    Ok(count) => writeln!(out, "Documents in knowledge base: {count} chunks")?,
                    Err(error) => writeln!(out, "Error reading store: {error}")?,
                }
                writeln!(out, "Context usage: {}", on_off(self.state.use_context))?;
                writeln!(out, "Model: {}", self.state.model_name)?;
            }
            Command::Ask(question) => self.ask(&question, out).await?,
        }

        Ok(SessionStatus::Running)
    }

    async fn add<W>(&self, path: &str, out: &mut W) -> io::Result<()>
    where
        W: Write + Send,
    {
        let path = Path::new(path);
        if !path.exists() {
            writeln!(out, "File not found!")?;
            return Ok(());
        }

        match self.assistant.ingest_path(path).await {
            Ok(outcome) => {
                for report in &outcome.ingested {
                    writeln!(
                        out,
                        "Added {} chunks from '{}'",
                        report.chunk_count, report.document
                    )?;
                }
                for skipped in &outcome.skipped {
                    writeln!(out, "Skipped {}: {}", skipped.path, skipped.reason)?;
                }
                if !outcome.ingested.is_empty() {
                    writeln!(out, "Document added successfully!")?;
                }
            }
            Err(error) => writeln!(out, "Error adding document: {error}")?,
        }
        Ok(())
    }

    async fn ask<W>(&self, question: &str, out: &mut W) -> io::Result<()>
    where
        W: Write + Send,
    {
        writeln!(out, "Thinking...")?;
        write!(out, "\n{}: ", self.state.model_name)?;
        out.flush()?;

        let mut streamed = false;
        let result = {
            let mut echo = |fragment: &str| {
                streamed = true;
                let _ = write!(out, "{fragment}");
                let _ = out.flush();
            };
            self.assistant
                .ask(question, self.state.use_context, &mut echo)
                .await
        };

        match result {
            Ok(answer) if !streamed => write!(out, "{answer}")?,
            Ok(_) => {}
            Err(error) => {
                if streamed {
                    writeln!(out)?;
                }
                write!(out, "{}", self.assistant.describe_failure(&error).await)?;
            }
        }
        writeln!(out)?;
        Ok(())
    }
}

/// Only an explicit `y`/`yes` counts as consent; end of input declines.
async fn confirm<R, W>(input: &mut R, out: &mut W, question: &str) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    write!(out, "{question}")?;
    out.flush()?;

    let answer = read_line(input).await?.unwrap_or_default();
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::{assistant_with, Failure, FakeGenerator, TestAssistant};
    use std::fs;
    use tempfile::tempdir;

    async fn seeded() -> (tempfile::TempDir, TestAssistant) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mydoc");
        fs::write(&path, "Valve clearance is measured cold, every 500 hours. ".repeat(10)).unwrap();

        let assistant = assistant_with(FakeGenerator::default());
        assistant.ingest(&path, None).await.unwrap();
        (dir, assistant)
    }

    async fn drive(
        session: &mut Session<'_, crate::stores::LocalStore, FakeGenerator, crate::CharacterNgramEmbedder>,
        line: &str,
        mut replies: &[u8],
    ) -> (SessionStatus, String) {
        let mut out = Vec::new();
        let status = session
            .handle(Command::parse(line), &mut replies, &mut out)
            .await
            .unwrap();
        (status, String::from_utf8(out).unwrap())
    }

    #[test]
    fn commands_parse_from_input_lines() {
        assert_eq!(Command::parse("  QUIT "), Command::Quit);
        assert_eq!(Command::parse("/add  docs/a.pdf "), Command::Add("docs/a.pdf".into()));
        assert_eq!(Command::parse("/search pump seals"), Command::Search("pump seals".into()));
        assert_eq!(Command::parse("/delete my doc"), Command::Delete("my doc".into()));
        assert_eq!(Command::parse("/list"), Command::List);
        assert_eq!(Command::parse("/clear"), Command::Clear);
        assert_eq!(Command::parse("/toggle-context"), Command::ToggleContext);
        assert_eq!(Command::parse("/status"), Command::Status);
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(
            Command::parse("/search"),
            Command::MissingArgument("Please provide a search query")
        );
        assert_eq!(Command::parse("/frobnicate"), Command::Unknown("/frobnicate".into()));
        assert_eq!(
            Command::parse("what is the torque?"),
            Command::Ask("what is the torque?".into())
        );
    }

    #[tokio::test]
    async fn declined_delete_leaves_store_unchanged() {
        let (_dir, assistant) = seeded().await;
        let before = assistant.chunk_count().await.unwrap();
        let mut session = Session::new(&assistant, true);

        let (status, output) = drive(&mut session, "/delete mydoc", b"n\n").await;
        assert_eq!(status, SessionStatus::Running);
        assert!(output.contains("Are you sure you want to delete 'mydoc'?"));
        assert!(output.contains("Cancelled."));
        assert_eq!(assistant.chunk_count().await.unwrap(), before);

        let (_, output) = drive(&mut session, "/delete mydoc", b"y\n").await;
        assert!(output.contains(&format!("Deleted {before} chunks from 'mydoc'")));
        assert_eq!(assistant.chunk_count().await.unwrap(), 0);

        let (_, output) = drive(&mut session, "/delete mydoc", b"yes\n").await;
        assert!(output.contains("Document 'mydoc' not found"));
    }

    #[tokio::test]
    async fn clear_requires_confirmation() {
        let (_dir, assistant) = seeded().await;
        let mut session = Session::new(&assistant, true);

        let (_, output) = drive(&mut session, "/clear", b"").await;
        assert!(output.contains("Cancelled."));
        assert!(assistant.chunk_count().await.unwrap() > 0);

        let (_, output) = drive(&mut session, "/clear", b"Y\n").await;
        assert!(output.contains("All documents cleared"));
        assert_eq!(assistant.chunk_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn toggle_controls_context_for_questions() {
        let (_dir, assistant) = seeded().await;
        let mut session = Session::new(&assistant, true);

        let (_, output) = drive(&mut session, "/toggle-context", b"").await;
        assert!(output.contains("Context usage: disabled"));
        assert!(!session.state().use_context);

        let (_, output) = drive(&mut session, "How often is clearance checked?", b"").await;
        assert!(output.contains("fake-model: Grounded answer."));
        let prompts = assistant.generator().prompts.lock().unwrap().clone();
        assert_eq!(prompts.last().map(String::as_str), Some("How often is clearance checked?"));
    }

    #[tokio::test]
    async fn status_list_and_search_report_the_store() {
        let (_dir, assistant) = seeded().await;
        let count = assistant.chunk_count().await.unwrap();
        let mut session = Session::new(&assistant, true);

        let (_, output) = drive(&mut session, "/status", b"").await;
        assert!(output.contains(&format!("Documents in knowledge base: {count} chunks")));
        assert!(output.contains("Context usage: enabled"));
        assert!(output.contains("Model: fake-model"));

        let (_, output) = drive(&mut session, "/list", b"").await;
        assert!(output.contains(&format!("mydoc: {count} chunks")));

        let (_, output) = drive(&mut session, "/search valve clearance", b"").await;
        assert!(output.contains("relevant chunks"));
        assert!(output.contains("[mydoc]"));
        assert!(assistant.generator().prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_after_partial_stream_is_still_reported() {
        let assistant = assistant_with(FakeGenerator {
            fragments: vec!["partial ", "never sent"],
            failure: Failure::AfterFirstFragment,
            ..FakeGenerator::default()
        });
        let mut session = Session::new(&assistant, false);

        let (status, output) = drive(&mut session, "What is the torque?", b"").await;
        assert_eq!(status, SessionStatus::Running);
        assert!(output.contains("fake-model: partial \nError calling Ollama:"));
        assert!(!output.contains("never sent"));
    }

    #[tokio::test]
    async fn failure_before_any_fragment_replaces_the_answer() {
        let assistant = assistant_with(FakeGenerator {
            failure: Failure::Unavailable,
            ..FakeGenerator::default()
        });
        let mut session = Session::new(&assistant, false);

        let (_, output) = drive(&mut session, "hello", b"").await;
        assert!(output.contains("fake-model: Error: Cannot connect to Ollama at http://localhost:11434/"));
    }

    #[tokio::test]
    async fn add_reports_missing_files() {
        let assistant = assistant_with(FakeGenerator::default());
        let mut session = Session::new(&assistant, true);

        let (_, output) = drive(&mut session, "/add /no/such/file.txt", b"").await;
        assert!(output.contains("File not found!"));
    }

    #[tokio::test]
    async fn run_stops_on_quit() {
        let assistant = assistant_with(FakeGenerator::default());
        let mut session = Session::new(&assistant, true);

        let mut input: &[u8] = b"/toggle-context\nquit\n/status\n";
        let mut out = Vec::new();
        session.run(&mut input, &mut out).await.unwrap();

        let output = String::from_utf8(out).unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(output.contains("Context usage: disabled"));
        assert!(!output.contains("Model: fake-model"));
    }

    #[tokio::test]
    async fn run_stops_at_end_of_input() {
        let assistant = assistant_with(FakeGenerator::default());
        let mut session = Session::new(&assistant, true);

        let mut input: &[u8] = b"/status\n";
        let mut out = Vec::new();
        session.run(&mut input, &mut out).await.unwrap();

        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Model: fake-model"));
        assert!(output.ends_with("Goodbye!\n"));
        assert_eq!(session.status(), SessionStatus::Stopped);
    }

    #[test]
    fn previews_are_truncated_at_two_hundred_chars() {
        let long = "é".repeat(250);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), 203);
        assert_eq!(preview("short"), "short");
    }
}
