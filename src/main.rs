use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use sandbar::agent::{Agent, AgentConfig, SandboxRunner};
use sandbar::config::{api_key_env, default_base_url, Config};
use sandbar::llm::anthropic::AnthropicClient;
use sandbar::llm::bedrock::BedrockClient;
use sandbar::llm::gemini::GeminiClient;
use sandbar::llm::openai::OpenAiClient;
use sandbar::llm::LlmProvider;
use sandbar::output;
use sandbar::sandbox::{SandboxClient, SandboxInfo};

const EXEC_OUTPUT_MAX_LINES: usize = 200;

#[derive(Parser)]
#[command(name = "sandbar")]
#[command(about = "Wire LLM tool calls to a remote code-interpreter sandbox.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a one-shot question; code runs in a fresh sandbox
    Ask {
        prompt: String,
        /// Model to use
        #[arg(short, long)]
        model: Option<String>,
        /// Provider: openai | groq | anthropic | gemini | bedrock
        #[arg(short, long)]
        provider: Option<String>,
        /// Reuse an existing sandbox instead of creating one
        #[arg(long)]
        sandbox: Option<String>,
        /// Leave the sandbox running afterwards
        #[arg(long)]
        keep: bool,
    },
    /// Start an interactive session over one sandbox
    Chat {
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        provider: Option<String>,
        /// Reconnect to an existing sandbox
        #[arg(long)]
        sandbox: Option<String>,
        /// Leave the sandbox running on exit
        #[arg(long)]
        keep: bool,
    },
    /// Manage sandboxes directly
    Sandbox {
        #[command(subcommand)]
        action: SandboxAction,
    },
    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum SandboxAction {
    /// List running sandboxes
    List,
    /// Kill a sandbox
    Kill {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Run a shell command in a sandbox
    Exec { id: String, command: String },
    /// Push a sandbox's deadline out to N seconds from now
    Extend {
        id: String,
        #[arg(long, default_value_t = 300)]
        secs: u64,
    },
    /// Upload a local file into a sandbox
    Upload {
        id: String,
        local: PathBuf,
        remote: String,
    },
    /// Download a file from a sandbox
    Download {
        id: String,
        remote: String,
        local: Option<PathBuf>,
    },
}

fn create_provider(cfg: &Config, model: &str) -> Result<Box<dyn LlmProvider>, String> {
    let provider = cfg.llm.provider.as_str();
    let api_key = cfg.provider_api_key().ok_or_else(|| {
        format!(
            "No API key for provider '{}'. Set {}.",
            provider,
            api_key_env(provider)
        )
    })?;

    let client: Box<dyn LlmProvider> = match provider {
        "anthropic" => Box::new(AnthropicClient::new(&cfg.llm.base_url, model, api_key)),
        "gemini" => Box::new(GeminiClient::new(&cfg.llm.base_url, model, api_key)),
        "bedrock" => Box::new(BedrockClient::new(&cfg.llm.base_url, model, api_key)),
        // openai, groq, and anything OpenAI-compatible
        _ => Box::new(OpenAiClient::new(&cfg.llm.base_url, model, api_key)),
    };
    Ok(client)
}

fn sandbox_client(cfg: &Config) -> SandboxClient {
    SandboxClient::new(
        &cfg.sandbox.base_url,
        cfg.sandbox_api_key().unwrap_or_default(),
    )
}

/// Apply --provider/--model overrides on top of the loaded config.
fn apply_overrides(cfg: &mut Config, provider: Option<String>, model: Option<String>) {
    if let Some(provider) = provider {
        cfg.llm.base_url = default_base_url(&provider);
        cfg.llm.provider = provider;
    }
    if let Some(model) = model {
        cfg.llm.model = model;
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), message);
    std::process::exit(1);
}

/// Create or reconnect, print what happened, return the sandbox.
fn obtain_sandbox(client: &SandboxClient, cfg: &Config, existing: Option<&str>) -> SandboxInfo {
    match existing {
        Some(id) => match client.connect(id) {
            Ok(info) => {
                println!("Reconnected to sandbox {}", info.sandbox_id.dimmed());
                info
            }
            Err(e) => fail(&e.to_string()),
        },
        None => match client.create(&cfg.sandbox.template, cfg.sandbox.timeout_secs) {
            Ok(info) => {
                println!(
                    "Created sandbox {} (template: {})",
                    info.sandbox_id.dimmed(),
                    info.template
                );
                info
            }
            Err(e) => fail(&e.to_string()),
        },
    }
}

fn build_agent(cfg: &Config, client: &SandboxClient, sandbox_id: &str) -> Agent {
    let provider = match create_provider(cfg, &cfg.llm.model) {
        Ok(p) => p,
        Err(e) => fail(&e),
    };
    let runner = SandboxRunner::new(client.clone(), sandbox_id.to_string());
    Agent::new(
        provider,
        Box::new(runner),
        AgentConfig {
            max_turns: cfg.agent.max_turns,
            artifacts_dir: PathBuf::from(&cfg.agent.artifacts_dir),
        },
    )
}

fn release_sandbox(client: &SandboxClient, sandbox_id: &str, keep: bool) {
    if keep {
        println!(
            "Sandbox {} left running. Reuse it with --sandbox, kill it with `sandbar sandbox kill`.",
            sandbox_id.cyan()
        );
    } else if let Err(e) = client.kill(sandbox_id) {
        eprintln!("{} Failed to kill sandbox: {}", "Warning:".yellow(), e);
    }
}

fn run_ask(
    prompt: String,
    model: Option<String>,
    provider: Option<String>,
    sandbox: Option<String>,
    keep: bool,
) {
    let mut cfg = Config::load();
    apply_overrides(&mut cfg, provider, model);

    let client = sandbox_client(&cfg);
    let info = obtain_sandbox(&client, &cfg, sandbox.as_deref());
    let mut agent = build_agent(&cfg, &client, &info.sandbox_id);

    let start = std::time::Instant::now();
    if cfg.agent.streaming {
        agent.process_message_with_callback(&prompt, &mut |token| {
            eprint!("{}", token);
        });
        eprintln!();
    } else {
        let response = agent.process_message(&prompt);
        println!("{}", response);
    }
    println!(
        "{}",
        format!("({:.1}s)", start.elapsed().as_secs_f64()).dimmed()
    );

    release_sandbox(&client, &info.sandbox_id, keep);
}

fn run_chat(
    model: Option<String>,
    provider: Option<String>,
    sandbox: Option<String>,
    keep: bool,
) {
    let mut cfg = Config::load();
    apply_overrides(&mut cfg, provider, model);

    println!("{}", "sandbar".bold());
    println!(
        "Provider: {}  Model: {}\n",
        cfg.llm.provider.green(),
        cfg.llm.model.green()
    );
    println!("Type {} to exit.\n", "Ctrl+D".dimmed());

    let client = sandbox_client(&cfg);
    let info = obtain_sandbox(&client, &cfg, sandbox.as_deref());
    let mut agent = build_agent(&cfg, &client, &info.sandbox_id);

    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => fail(&format!("Failed to initialize readline: {}", e)),
    };

    loop {
        let readline = rl.readline(&format!("{} ", "you>".blue().bold()));
        match readline {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                let start = std::time::Instant::now();
                if cfg.agent.streaming {
                    eprint!("{} ", "bot>".green().bold());
                    agent.process_message_with_callback(input, &mut |token| {
                        eprint!("{}", token);
                    });
                    eprintln!();
                } else {
                    eprint!("{}", "[thinking...]".dimmed());
                    let response = agent.process_message(input);
                    eprint!("\r{}\r", " ".repeat(20));
                    println!("{} {}", "bot>".green().bold(), response);
                }
                println!(
                    "{}",
                    format!("({:.1}s)", start.elapsed().as_secs_f64()).dimmed()
                );
                println!();
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("Use Ctrl+D to exit.");
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                break;
            }
        }
    }

    release_sandbox(&client, &info.sandbox_id, keep);
}

fn run_sandbox_action(action: SandboxAction) {
    let cfg = Config::load();
    let client = sandbox_client(&cfg);

    match action {
        SandboxAction::List => match client.list() {
            Ok(sandboxes) if sandboxes.is_empty() => println!("No running sandboxes."),
            Ok(sandboxes) => {
                for info in sandboxes {
                    println!(
                        "{}  {}  started {}  ends {}",
                        info.sandbox_id.cyan(),
                        info.template,
                        info.started_at.format("%H:%M:%S"),
                        info.end_at.format("%H:%M:%S"),
                    );
                }
            }
            Err(e) => fail(&e.to_string()),
        },
        SandboxAction::Kill { id, yes } => {
            if !yes {
                let confirmed = dialoguer::Confirm::new()
                    .with_prompt(format!("Kill sandbox {}?", id))
                    .default(false)
                    .interact()
                    .unwrap_or(false);
                if !confirmed {
                    println!("Aborted.");
                    return;
                }
            }
            match client.kill(&id) {
                Ok(()) => println!("Killed {}", id),
                Err(e) => fail(&e.to_string()),
            }
        }
        SandboxAction::Exec { id, command } => match client.run_command(&id, &command) {
            Ok(out) => {
                if !out.stdout.is_empty() {
                    println!(
                        "{}",
                        output::truncate_lines(out.stdout.trim_end(), EXEC_OUTPUT_MAX_LINES)
                    );
                }
                if !out.stderr.is_empty() {
                    eprintln!(
                        "{}",
                        output::truncate_lines(out.stderr.trim_end(), EXEC_OUTPUT_MAX_LINES)
                            .yellow()
                    );
                }
                if out.exit_code != 0 {
                    eprintln!("{}", format!("[exit code: {}]", out.exit_code).red());
                    std::process::exit(1);
                }
            }
            Err(e) => fail(&e.to_string()),
        },
        SandboxAction::Extend { id, secs } => match client.set_timeout(&id, secs) {
            Ok(()) => println!("Sandbox {} now ends in {}s", id, secs),
            Err(e) => fail(&e.to_string()),
        },
        SandboxAction::Upload { id, local, remote } => {
            let bytes = match std::fs::read(&local) {
                Ok(b) => b,
                Err(e) => fail(&format!("Failed to read {}: {}", local.display(), e)),
            };
            match client.write_file(&id, &remote, &bytes) {
                Ok(()) => println!("Uploaded {} -> {}", local.display(), remote),
                Err(e) => fail(&e.to_string()),
            }
        }
        SandboxAction::Download { id, remote, local } => {
            let bytes = match client.read_file(&id, &remote) {
                Ok(b) => b,
                Err(e) => fail(&e.to_string()),
            };
            let target = local.unwrap_or_else(|| {
                PathBuf::from(
                    std::path::Path::new(&remote)
                        .file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new("download")),
                )
            });
            match std::fs::write(&target, bytes) {
                Ok(()) => println!("Downloaded {} -> {}", remote, target.display()),
                Err(e) => fail(&format!("Failed to write {}: {}", target.display(), e)),
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            prompt,
            model,
            provider,
            sandbox,
            keep,
        } => run_ask(prompt, model, provider, sandbox, keep),
        Commands::Chat {
            model,
            provider,
            sandbox,
            keep,
        } => run_chat(model, provider, sandbox, keep),
        Commands::Sandbox { action } => run_sandbox_action(action),
        Commands::Config => {
            let config = Config::load();
            println!("{}", "Current configuration:".bold());
            println!();
            match config.to_toml() {
                Ok(s) => println!("{}", s),
                Err(e) => eprintln!("Error serializing config: {}", e),
            }
        }
    }
}
