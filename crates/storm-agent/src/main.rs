//! A terminal front end for `storm-agent`.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde_json::Value;
use storm_agent::{Session, SessionBuilder};
use storm_agent::core::mcp::McpServerConfig;
use storm_agent::core::{
    AgentEvent, CancellationToken, Error, IncompleteReason, Outcome,
};
use storm_agent_anthropic_model::{AnthropicConfigBuilder, AnthropicProvider};
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::sleep;

const BAR_CHAR: &str = "▎";
const MAX_PREVIEW_CHARS: usize = 120;

/// A research agent for the terminal.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Runs a single prompt and exits instead of starting a chat.
    #[arg(short, long)]
    prompt: Option<String>,

    /// The maximum number of model calls per prompt.
    #[arg(long, default_value_t = 10)]
    max_iterations: usize,

    /// A JSON file listing external tool servers to launch.
    #[arg(long, value_name = "FILE")]
    mcp_config: Option<PathBuf>,

    /// Disables the built-in web search and content extraction tools.
    #[arg(long)]
    no_web_tools: bool,

    /// Runs tool calls one at a time instead of concurrently.
    #[arg(long)]
    sequential_tools: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("failed to load .env: {err}");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let Ok(api_key) = env::var("ANTHROPIC_API_KEY") else {
        eprintln!("ANTHROPIC_API_KEY environment variable is not set");
        return ExitCode::FAILURE;
    };
    let mut config = AnthropicConfigBuilder::with_api_key(api_key);
    if let Ok(model) = env::var("ANTHROPIC_MODEL") {
        config = config.with_model(model);
    }
    if let Ok(base_url) = env::var("ANTHROPIC_BASE_URL") {
        config = config.with_base_url(base_url);
    }
    let model_provider = AnthropicProvider::new(config.build());

    let mcp_servers = match &args.mcp_config {
        Some(path) => match load_mcp_servers(path) {
            Ok(servers) => servers,
            Err(err) => {
                eprintln!("failed to load {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => vec![],
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut builder = SessionBuilder::with_model_provider(model_provider)
        .with_web_tools(!args.no_web_tools)
        .with_mcp_servers(mcp_servers)
        .configure_agent(|agent| {
            agent
                .with_max_iterations(args.max_iterations)
                .with_parallel_tools(!args.sequential_tools)
        })
        .on_event(move |event| {
            event_tx.send(event.clone()).ok();
        });
    if let Ok(api_key) = env::var("BRAVE_SEARCH_API_KEY") {
        builder = builder.with_brave_api_key(api_key);
    }
    if let Ok(api_key) = env::var("FIRECRAWL_API_KEY") {
        builder = builder.with_firecrawl_api_key(api_key);
    }
    let mut session = builder.build();

    let succeeded = match args.prompt {
        Some(prompt) => send_message(&mut session, &prompt, &mut event_rx).await,
        None => {
            chat(&mut session, &mut event_rx).await;
            true
        }
    };
    session.close().await;

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn load_mcp_servers(path: &Path) -> Result<Vec<McpServerConfig>, String> {
    let content = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str(&content).map_err(|err| err.to_string())
}

async fn chat(
    session: &mut Session,
    event_rx: &mut mpsc::UnboundedReceiver<AgentEvent>,
) {
    println!(
        "{}",
        "Type a question, /clear to forget the conversation, /summary to \
         inspect the agent, or /exit to quit."
            .dimmed()
    );

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                session.clear_history();
                println!("{}", "Conversation cleared.".dimmed());
            }
            "/summary" => {
                match serde_json::to_string_pretty(&session.summary()) {
                    Ok(summary) => println!("{summary}"),
                    Err(err) => error!("failed to serialize the summary: {err}"),
                }
            }
            message => {
                send_message(session, message, event_rx).await;
            }
        }
    }
}

/// Runs one prompt, rendering progress until it finishes. Ctrl-C cancels
/// the run. Returns `false` if the run failed.
async fn send_message(
    session: &mut Session,
    message: &str,
    event_rx: &mut mpsc::UnboundedReceiver<AgentEvent>,
) -> bool {
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let cancel = CancellationToken::new();
    let mut run = pin!(session.send_message(message, cancel.clone()));
    let mut renderer = Renderer::default();
    let mut progress_bar: Option<ProgressBar> = None;

    let result = loop {
        // Show a spinner while waiting for something to print.
        if !renderer.streaming {
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("🤔 Thinking...");
                    progress_bar
                })
                .inc(1);
        }

        let sleep = sleep(Duration::from_millis(100));
        select! {
            biased;
            Some(event) = event_rx.recv() => {
                // Finish the progress bar before printing anything else.
                if let Some(progress_bar) = progress_bar.take() {
                    progress_bar.finish_and_clear();
                }
                renderer.render(event);
            }
            result = &mut run => break result,
            _ = signal::ctrl_c() => {
                info!("cancelling the current run");
                cancel.cancel();
            }
            _ = sleep => {}
        }
    };

    if let Some(progress_bar) = progress_bar.take() {
        progress_bar.finish_and_clear();
    }
    while let Ok(event) = event_rx.try_recv() {
        renderer.render(event);
    }
    renderer.end_stream();
    renderer.report(result)
}

#[derive(Default)]
struct Renderer {
    streaming: bool,
    streamed_text: bool,
}

impl Renderer {
    fn render(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::TextDelta(delta) => {
                if !self.streaming {
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                    self.streaming = true;
                }
                self.streamed_text = true;
                print!("{}", delta.bright_white());
                std::io::stdout().flush().ok();
            }
            AgentEvent::ToolCallStarted {
                name, arguments, ..
            } => {
                self.end_stream();
                println!(
                    "{}🔧 {} {}",
                    BAR_CHAR.bright_yellow(),
                    name.bright_white().bold(),
                    preview(&compact_json(&arguments)).dimmed()
                );
            }
            AgentEvent::ToolCallFinished {
                name,
                content,
                is_error,
                ..
            } => {
                self.end_stream();
                let status = if is_error { "❌" } else { "✅" };
                println!(
                    "{}{status} {} {}",
                    BAR_CHAR.bright_yellow(),
                    name,
                    preview(&content).dimmed()
                );
            }
            AgentEvent::Retrying {
                attempt,
                delay,
                reason,
            } => {
                self.end_stream();
                println!(
                    "{}⏳ attempt {attempt} failed ({reason}), retrying in {:.1}s",
                    BAR_CHAR.bright_magenta(),
                    delay.as_secs_f32()
                );
            }
            AgentEvent::IterationLimitReached { iterations } => {
                self.end_stream();
                println!(
                    "{}⚠️  stopped after {iterations} iterations",
                    BAR_CHAR.bright_magenta()
                );
            }
        }
    }

    fn end_stream(&mut self) {
        if self.streaming {
            println!();
            self.streaming = false;
        }
    }

    fn report(&self, result: Result<Outcome, Error>) -> bool {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => {
                println!("{}", "Cancelled.".dimmed());
                return false;
            }
            Err(err) => {
                eprintln!("{} {err}", "error:".bright_red().bold());
                return false;
            }
        };

        if !self.streamed_text && !outcome.text().is_empty() {
            println!(
                "{}🤖 {}",
                BAR_CHAR.bright_cyan(),
                outcome.text().bright_white()
            );
        }
        if let Outcome::Incomplete { reason, .. } = &outcome {
            let reason = match reason {
                IncompleteReason::IterationLimit => "the iteration limit was reached",
                IncompleteReason::TokenLimit => "the token limit was reached",
                IncompleteReason::ResponseTruncated => {
                    "the response hit the output token limit"
                }
            };
            println!("{}", format!("The answer is incomplete: {reason}.").yellow());
        }
        let usage = outcome.usage();
        println!(
            "{}",
            format!(
                "{} iterations, {} input / {} output tokens",
                outcome.iterations(),
                usage.input_tokens,
                usage.output_tokens
            )
            .dimmed()
        );
        true
    }
}

fn compact_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut preview: String = line.chars().take(MAX_PREVIEW_CHARS).collect();
    if preview.len() < text.len() {
        preview.push('…');
    }
    preview
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
