use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::future::join_all;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sitesmith_agent::clients::create_llm_client;
use sitesmith_agent::config::{AgentConfig, ConfigOverrides, DEFAULT_CONFIG_FILE, Provider, load_config};
use sitesmith_agent::core::{GenerationService, Outcome, Step, WebsiteAgent};
use sitesmith_agent::projects::{INDEX_HTML, ProjectName, ProjectStore};
use sitesmith_agent::tools::website_tools;

#[derive(Parser, Debug)]
#[command(name = "sitesmith-agent")]
#[command(version = "0.1.0")]
#[command(about = "Generates static websites from a text description", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Path to the JSON config file")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    api_key: Option<String>,

    #[arg(short, long, global = true)]
    model: Option<String>,

    #[arg(short, long, global = true, help = "gemini or openai")]
    provider: Option<Provider>,

    #[arg(short, long, global = true, help = "Base URL for the LLM API")]
    base_url: Option<String>,

    #[arg(short, long, global = true, help = "Directory that holds the generated projects")]
    workspace: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Generate a website for each prompt, one run at a time")]
    Generate {
        #[arg(long, required = true, help = "Website description, repeat for several runs")]
        prompt: Vec<String>,

        #[arg(short = 's', long, help = "Maximum model queries per run")]
        max_steps: Option<usize>,

        #[arg(long, help = "Write the transcript of each run as JSON into this directory")]
        transcript: Option<PathBuf>,
    },

    #[command(about = "List generated projects, newest first")]
    Projects,

    #[command(about = "Render a project into one self-contained HTML page")]
    Preview {
        name: String,

        #[arg(short, long, help = "Write the page to a file instead of stdout")]
        output: Option<PathBuf>,
    },

    #[command(about = "Show the effective configuration")]
    CheckConfig,
}

async fn resolve_config(args: &Args) -> Result<AgentConfig> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = load_config(&path).await?;
    config.apply_env()?;

    let max_steps = match &args.command {
        Commands::Generate { max_steps, .. } => *max_steps,
        _ => None,
    };
    config.apply_overrides(&ConfigOverrides {
        provider: args.provider,
        api_key: args.api_key.clone(),
        model: args.model.clone(),
        base_url: args.base_url.clone(),
        workspace_root: args.workspace.clone(),
        max_steps,
    });

    Ok(config)
}

fn print_step(index: usize, step: &Step) {
    let status = if step.result.is_success() {
        "ok".green()
    } else {
        "failed".red()
    };
    let target = step
        .arguments
        .get("path")
        .or_else(|| step.arguments.get("command"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    println!("  {} {} {} [{}]", format!("#{}", index).dimmed(), step.tool.cyan(), target, status);
    if !step.result.is_success() {
        println!("    {}", step.result.message.yellow());
    }
}

async fn generate(config: &AgentConfig, prompts: &[String], transcript_dir: Option<PathBuf>) -> Result<()> {
    let client = create_llm_client(
        config.provider.as_str(),
        config.api_key()?,
        config.model().to_string(),
        config.base_url.clone(),
        config.request_timeout(),
    )?;
    let tools = website_tools(
        config.workspace_root.clone(),
        config.command_policy(),
        config.command_timeout(),
    );
    let agent = WebsiteAgent::new(
        client,
        tools,
        Some(config.max_steps),
        Some(Arc::new(print_step)),
    )
    .with_system_prompt(config.system_prompt.clone());

    let info = agent.model_info();
    let transport = if info.supports_streaming { "streaming" } else { "single response" };
    println!("{} {} ({}, {})", "Model:".bold(), info.name, info.provider, transport);
    println!("{} {}", "Tools:".bold(), agent.tool_names().join(", "));
    println!("{} {}", "Workspace:".bold(), config.workspace_root.display());

    let service = GenerationService::new(agent);
    let runs = prompts.iter().map(|prompt| service.generate(prompt));
    let reports = join_all(runs).await;

    let store = ProjectStore::new(config.workspace_root.clone());
    let mut failures = 0;

    for (prompt, report) in prompts.iter().zip(reports) {
        println!();
        println!("{} {}", "Prompt:".bold(), prompt);

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                failures += 1;
                println!("  {} {}", "error:".red().bold(), e);
                continue;
            }
        };

        match &report.outcome {
            Outcome::Done { final_text } => {
                println!(
                    "  {} {} ({} tool calls)",
                    "done:".green().bold(),
                    report.project,
                    report.transcript.tool_call_count()
                );
                if !final_text.is_empty() {
                    println!("  {}", final_text.trim());
                }
            }
            Outcome::Aborted { step_limit } => {
                println!(
                    "  {} {} (stopped after {} model queries)",
                    "aborted:".yellow().bold(),
                    report.project,
                    step_limit
                );
            }
        }

        match store.inspect(&report.project).await {
            Ok(artifacts) if artifacts.is_complete() => {
                println!("  {} {}", "files:".bold(), artifacts.dir.display());
            }
            Ok(artifacts) => {
                let flags = artifacts.flags();
                println!(
                    "  {} html={} css={} js={}",
                    "incomplete:".yellow(),
                    flags.html,
                    flags.css,
                    flags.js
                );
            }
            Err(e) => println!("  {} {}", "missing:".red(), e),
        }

        if let Some(dir) = &transcript_dir {
            tokio::fs::create_dir_all(dir).await?;
            let path = dir.join(format!("{}.json", report.project));
            tokio::fs::write(&path, report.transcript.to_json_pretty()?).await?;
            println!("  {} {}", "transcript:".bold(), path.display());
        }
    }

    if failures > 0 {
        return Err(anyhow::anyhow!("{} of {} runs failed", failures, prompts.len()));
    }
    Ok(())
}

async fn list_projects(config: &AgentConfig) -> Result<()> {
    let store = ProjectStore::new(config.workspace_root.clone());
    let projects = store.list().await?;

    if projects.is_empty() {
        println!("No projects in {}", store.root().display());
        return Ok(());
    }

    for project in projects {
        let mark = |present: bool, label: &str| {
            if present {
                label.green().to_string()
            } else {
                label.dimmed().to_string()
            }
        };
        println!(
            "{}  {}  {} {} {}",
            project.name.as_str().bold(),
            project.created.format("%Y-%m-%d %H:%M:%S"),
            mark(project.files.html, "html"),
            mark(project.files.css, "css"),
            mark(project.files.js, "js"),
        );
    }
    Ok(())
}

async fn preview(config: &AgentConfig, name: &str, output: Option<PathBuf>) -> Result<()> {
    let name = ProjectName::from_str(name)?;
    let store = ProjectStore::new(config.workspace_root.clone());
    let artifacts = store.inspect(&name).await?;

    if !artifacts.has_markup() {
        return Err(anyhow::anyhow!("{} has no {}", name, INDEX_HTML));
    }

    let page = artifacts.combined_html();
    match output {
        Some(path) => {
            tokio::fs::write(&path, page).await?;
            println!("Preview written to {}", path.display());
        }
        None => println!("{}", page),
    }
    Ok(())
}

fn check_config(config: &AgentConfig) -> Result<()> {
    config.validate()?;

    let key = match config.api_key() {
        Ok(key) => {
            let visible: String = key.chars().take(4).collect();
            format!("{}****", visible).green()
        }
        Err(e) => e.to_string().red(),
    };

    println!("{}", "Configuration".bold());
    println!("  provider:        {}", config.provider);
    println!("  model:           {}", config.model());
    println!("  base url:        {}", config.base_url.as_deref().unwrap_or("(default)"));
    println!("  api key:         {}", key);
    println!("  workspace:       {}", config.workspace_root.display());
    println!("  max steps:       {}", config.max_steps);
    println!("  command timeout: {}s", config.command_timeout_secs);
    println!("  request timeout: {}s", config.request_timeout_secs);
    println!("  command policy:  {:?}", config.command_policy());
    let tools = website_tools(
        config.workspace_root.clone(),
        config.command_policy(),
        config.command_timeout(),
    );
    println!("  tools:           {}", tools.list().join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = resolve_config(&args).await?;

    match args.command {
        Commands::Generate { prompt, transcript, .. } => {
            config.validate()?;
            generate(&config, &prompt, transcript).await?;
        }
        Commands::Projects => list_projects(&config).await?,
        Commands::Preview { name, output } => preview(&config, &name, output).await?,
        Commands::CheckConfig => check_config(&config)?,
    }

    Ok(())
}
