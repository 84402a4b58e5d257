use anyhow::Result;
use calc_agent::clients::create_llm_client;
use calc_agent::config::AgentConfig;
use calc_agent::core::{AgentKind, Step};
use calc_agent::orchestrator::Orchestrator;
use calc_agent::tools::format_number;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "calc-agent")]
#[command(version = "0.1.0")]
#[command(
    about = "Evaluates arithmetic expressions one model-chosen step at a time",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'k',
        long,
        global = true,
        help = "API key (defaults to OPENAI_API_KEY and friends)"
    )]
    api_key: Option<String>,

    #[arg(short, long, global = true, help = "Model name, overrides the config file")]
    model: Option<String>,

    #[arg(short, long, global = true, help = "Chat completions URL, overrides the config file")]
    base_url: Option<String>,

    #[arg(short, long, global = true, help = "Path to the YAML configuration file")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Evaluate a single expression")]
    Run {
        #[arg(help = "Arithmetic expression, e.g. \"2 * (10 + 5) - 12 / 3\"")]
        expression: String,

        #[arg(short, long, value_enum, default_value_t = AgentKind::Stepwise)]
        agent: AgentKind,
    },

    #[command(about = "Interactive mode")]
    Interactive {
        #[arg(short, long, value_enum, default_value_t = AgentKind::Stepwise)]
        agent: AgentKind,
    },

    #[command(about = "Load and validate the configuration")]
    CheckConfig,
}

fn print_step(step: &Step) {
    let marker = if step.is_final_step { " (final)" } else { "" };
    println!(
        "  {} {} {} {} = {}{}",
        format!("Step {}:", step.index).cyan(),
        format_number(step.a),
        step.op,
        format_number(step.b),
        format_number(step.result),
        marker.dimmed()
    );
}

fn build_orchestrator(
    api_key: Option<String>,
    config: AgentConfig,
    agent: AgentKind,
) -> Result<Orchestrator> {
    let api_key = match api_key {
        Some(key) => key,
        None => config.resolve_api_key()?,
    };
    let client = create_llm_client(
        "openai",
        api_key,
        config.model.clone(),
        config.base_url.clone(),
    )?;

    Ok(Orchestrator::new(Arc::from(client), config, agent).with_step_callback(Arc::new(print_step)))
}

/// Returns whether the evaluation succeeded.
async fn evaluate(orchestrator: &Orchestrator, expression: &str) -> bool {
    println!(
        "{} {} {}",
        "Evaluating".bold(),
        expression,
        format!("[{}]", orchestrator.agent_kind()).dimmed()
    );

    match orchestrator.evaluate(expression).await {
        Ok(evaluation) => {
            println!("{} {}", "Result:".green().bold(), format_number(evaluation.result));
            true
        }
        Err(failure) => {
            println!(
                "{} {}",
                format!("Error [{}]:", failure.kind()).red().bold(),
                failure.error
            );
            if !failure.steps.is_empty() {
                println!("Completed steps before the failure:");
                for step in &failure.steps {
                    print_step(step);
                }
            }
            false
        }
    }
}

async fn interactive(mut orchestrator: Orchestrator) -> Result<()> {
    println!("Calculator agent interactive mode. Type 'exit' or 'quit' to end.");
    println!("Type 'agent stepwise' or 'agent reducing' to switch agents.");
    println!();

    let stdin = io::stdin();
    let mut reader = io::BufReader::new(stdin);
    let mut line = String::new();

    loop {
        print!("Expression > ");
        std::io::stdout().flush()?;

        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        let input = line.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }

        if let Some(kind) = input.strip_prefix("agent ") {
            match kind.parse::<AgentKind>() {
                Ok(kind) => {
                    orchestrator.change_agent(kind);
                    println!("Switched to {} agent", kind);
                }
                Err(e) => println!("{} {}", "Error:".red(), e),
            }
            continue;
        }

        evaluate(&orchestrator, input).await;
        println!();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(base_url) = args.base_url {
        config.base_url = Some(base_url);
    }
    config.validate()?;

    match args.command {
        Commands::Run { expression, agent } => {
            let orchestrator = build_orchestrator(args.api_key, config, agent)?;
            if !evaluate(&orchestrator, &expression).await {
                std::process::exit(1);
            }
        }

        Commands::Interactive { agent } => {
            let orchestrator = build_orchestrator(args.api_key, config, agent)?;
            interactive(orchestrator).await?;
        }

        Commands::CheckConfig => {
            println!("Configuration is valid.");
            println!("  model:                 {}", config.model);
            println!(
                "  endpoint:              {}",
                config
                    .base_url
                    .as_deref()
                    .unwrap_or(calc_agent::clients::DEFAULT_OPENAI_URL)
            );
            println!("  max_llm_calls:         {}", config.max_llm_calls);
            println!("  max_expression_length: {}", config.max_expression_length);
            println!(
                "  stepwise history:      append={} tool_messages={}",
                config.stepwise.append_messages, config.stepwise.return_tool_call_msgs
            );
            println!(
                "  reducing substitution: {}",
                if config.reducing.strict_substitution { "strict" } else { "leftmost" }
            );
            match config.resolve_api_key() {
                Ok(_) => println!("  api key:               found"),
                Err(e) => println!("  api key:               {}", e.to_string().yellow()),
            }
        }
    }

    Ok(())
}
