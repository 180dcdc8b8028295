use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use decoy_agent::config::AgentConfig;
use decoy_agent::orchestrator::{Engine, EngineError};
use decoy_agent::simulation::Script;
use decoy_agent::telemetry;
use engagement::audit::verify_dir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "decoy-agent")]
#[command(about = "Decoy agent that engages inbound scam contact and extracts intelligence")]
#[command(version)]
struct Cli {
    /// TOML config file; defaults plus DECOY_* environment when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Converse over stdin/stdout, one inbound message per line
    Chat {
        /// Inbound channel tag (must carry an inbound prefix)
        #[arg(short, long, default_value = "incoming_cli")]
        source: String,

        /// Persona id; the configured default when omitted
        #[arg(short, long)]
        persona: Option<String>,
    },

    /// Run a scripted scam actor against the agent
    Simulate {
        /// tech_support, lottery or bank_fraud
        #[arg(short, long, default_value = "lottery")]
        script: Script,

        /// Number of scammer turns; one pass over the script when omitted
        #[arg(short, long)]
        turns: Option<usize>,

        #[arg(short, long)]
        persona: Option<String>,
    },

    /// Verify the audit chain; exits non-zero on any break
    VerifyAudit {
        /// Audit directory; the configured one when omitted
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// List configured personas
    Personas,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json);

    let config = AgentConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Chat { source, persona } => chat(&config, &source, persona.as_deref()).await,
        Commands::Simulate {
            script,
            turns,
            persona,
        } => simulate(&config, script, turns, persona.as_deref()).await,
        Commands::VerifyAudit { dir } => {
            let dir = dir.unwrap_or_else(|| config.audit.dir.clone());
            let report = verify_dir(&dir, config.audit.chain_key.as_bytes())
                .with_context(|| format!("verifying audit chain in {}", dir.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                warn!(dir = %dir.display(), "Audit chain verification failed");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Personas => {
            let registry =
                decoy_agent::PersonaRegistry::new(config.personas.clone(), &config.default_persona);
            for persona in registry.list() {
                let marker = if persona.id == registry.default_id() { "*" } else { " " };
                println!(
                    "{marker} {:<24} {:<20} age {:>3}  tech {}/10",
                    persona.id, persona.name, persona.profile.age, persona.profile.tech_sophistication
                );
            }
            Ok(())
        }
    }
}

async fn chat(config: &AgentConfig, source: &str, persona: Option<&str>) -> Result<()> {
    let engine = Engine::from_config(config).await?;
    let session = engine.create_session(source, persona).await?;
    let id = session.conversation_id.clone();
    info!(conversation_id = %id, persona = %session.persona, "Chat session started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }

        match engine.handle_message(&id, message).await {
            Ok(reply) => {
                println!("{}", reply.response);
                if reply.terminated {
                    break;
                }
            }
            Err(e @ EngineError::InputRejected { .. }) => {
                warn!(error = %e, "Message rejected");
                println!("{}", e.public_reply());
            }
            Err(e) => {
                println!("{}", e.public_reply());
                return Err(e.into());
            }
        }
    }

    let report = engine.end_session(&id, "input closed").await?;
    eprintln!("{}", serde_json::to_string_pretty(&report)?);
    engine.shutdown()?;
    Ok(())
}

async fn simulate(
    config: &AgentConfig,
    script: Script,
    turns: Option<usize>,
    persona: Option<&str>,
) -> Result<()> {
    let engine = Engine::from_config(config).await?;
    let session = engine.create_session(script.source(), persona).await?;
    let id = session.conversation_id.clone();
    let turns = turns.unwrap_or(script.lines().len());
    info!(conversation_id = %id, script = %script, turns, "Simulation started");

    for turn in 0..turns {
        let line = script.line(turn);
        println!("scammer> {line}");
        let reply = engine.handle_message(&id, line).await?;
        println!(
            "{:<8}> {}   [{} | {} | {}]",
            session.persona, reply.response, reply.phase, reply.strategy, reply.reason
        );
        if reply.terminated {
            break;
        }
    }

    let report = engine.end_session(&id, "simulation finished").await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    let status = engine.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    engine.shutdown()?;

    let verified = engine.audit().verify()?;
    info!(
        valid = verified.valid,
        entries = verified.entries_checked,
        "Audit chain verified"
    );
    Ok(())
}
