use crate::ui::{print_metric, print_plan, print_result, prompt_confirm};
use anyhow::{bail, Context, Result};
use askerp::config::{get_config_path, save_config, Config};
use askerp::docs::{load_dir, KeywordDocs};
use askerp::llm::{Completion, HttpBackend, ResilientClient};
use askerp::presets::{by_category, PRESETS, PRO_TIPS};
use askerp::tools::store::{register_all, Store};
use askerp::tools::{ToolName, ToolRegistry};
use askerp::{Agent, Command, Status};
use chrono::Local;
use std::sync::Arc;
use std::{env, fs, io::Write};
use tracing::info;

fn current_user() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "cli".to_string())
}

fn open_store(config: &Config) -> Result<Arc<Store>> {
    let path = config.db_path();
    let store = Store::open(&path).with_context(|| format!("opening store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_agent(config: &Config) -> Result<Agent> {
    let backend = HttpBackend::new(&config.llm)?;
    let llm: Arc<dyn Completion> = Arc::new(ResilientClient::from_config(backend, &config.llm, &config.resilience));

    let mut tools = ToolRegistry::new();
    register_all(open_store(config)?, &mut tools);

    let chunks = load_dir(&config.docs_dir())?;
    let docs = KeywordDocs::new(chunks).with_llm(Arc::clone(&llm));
    info!(tools = tools.len(), docs = docs.len(), "agent ready");

    Ok(Agent::new(llm, tools, Box::new(docs)).with_docs_top_k(config.docs.top_k))
}

pub fn cmd_ask(config: &Config, text: &str, dry_run: bool, yes: bool, json: bool) -> Result<()> {
    if text.trim().is_empty() {
        bail!("nothing to ask");
    }
    let agent = build_agent(config)?;
    let command = Command::new(text, current_user()).dry_run(dry_run);

    eprint!("thinking...");
    std::io::stderr().flush().ok();
    let result = agent.smart_execute(&command);
    eprint!("\r           \r");
    let mut result = result?;

    if result.status == Status::AwaitingConfirmation && !json {
        print_plan(&result.plan);
        println!();
        if yes || prompt_confirm() {
            let confirmed = command.confirmed_with(result.correlation_id.clone());
            result = agent.execute_plan(result.plan, &confirmed);
        } else {
            println!("cancelled.");
            return Ok(());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

pub fn cmd_plan(config: &Config, text: &str, json: bool) -> Result<()> {
    let agent = build_agent(config)?;
    let plan = agent.plan(text)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
        println!();
    }
    Ok(())
}

pub fn cmd_presets(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(PRESETS)?);
        return Ok(());
    }
    for (category, presets) in by_category() {
        println!("{}:", category);
        for p in presets {
            println!("  {:<28} {}", p.label, p.prompt);
        }
        println!();
    }
    println!("tips:");
    for tip in PRO_TIPS {
        println!("  - {}", tip);
    }
    Ok(())
}

pub fn cmd_doctor(config: &Config) -> Result<()> {
    println!("diagnostics:");
    println!();

    let backend = HttpBackend::new(&config.llm)?;
    print!("  llm backend ... ");
    std::io::stdout().flush().ok();
    if backend.is_available() {
        println!("ok");
    } else {
        println!("failed");
        println!("    url: {}", config.llm.base_url);
        println!("    try: ollama serve");
    }

    print!("  model ({}) ... ", backend.model());
    std::io::stdout().flush().ok();
    let client = ResilientClient::from_config(backend, &config.llm, &config.resilience);
    match client.complete("Reply with ok.", "Say 'ok' and nothing else.") {
        Ok(_) => println!("ok"),
        Err(e) => {
            println!("failed");
            println!("    error: {}", e);
            println!("    try: ollama pull {}", config.llm.model);
        }
    }
    println!("    circuit: {:?}", client.circuit_state());

    print!("  store ... ");
    std::io::stdout().flush().ok();
    match open_store(config).and_then(|s| s.counts().map_err(anyhow::Error::from)) {
        Ok(counts) => {
            println!("ok");
            let empty = counts.iter().all(|(_, n)| *n == 0);
            for (table, n) in counts {
                println!("    {:<18} {}", table, n);
            }
            if empty {
                println!("    run: askerp seed");
            }
        }
        Err(e) => {
            println!("failed");
            println!("    error: {:#}", e);
        }
    }

    print!("  tools ... ");
    std::io::stdout().flush().ok();
    match open_store(config) {
        Ok(store) => {
            let mut tools = ToolRegistry::new();
            register_all(store, &mut tools);
            let missing: Vec<&str> = ToolName::ALL
                .iter()
                .map(|t| t.as_str())
                .filter(|name| !tools.contains(name))
                .collect();
            if missing.is_empty() {
                println!("ok ({} registered)", tools.len());
            } else {
                println!("missing: {}", missing.join(", "));
            }
        }
        Err(e) => println!("failed: {:#}", e),
    }

    print!("  docs ... ");
    std::io::stdout().flush().ok();
    match load_dir(&config.docs_dir()) {
        Ok(chunks) if chunks.is_empty() => println!("none ({})", config.docs_dir().display()),
        Ok(chunks) => println!("ok ({} chunks)", chunks.len()),
        Err(e) => println!("failed: {}", e),
    }

    print!("  config ... ");
    std::io::stdout().flush().ok();
    if get_config_path().exists() {
        println!("ok");
    } else {
        println!("using defaults");
    }

    println!();
    Ok(())
}

pub fn cmd_config(show: bool) -> Result<()> {
    let config_path = get_config_path();

    if !config_path.exists() {
        save_config(&Config::default())?;
    }

    if show {
        print!("{}", fs::read_to_string(&config_path)?);
        return Ok(());
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    std::process::Command::new(&editor)
        .arg(&config_path)
        .status()
        .with_context(|| format!("launching {editor}"))?;
    Ok(())
}

pub fn cmd_metrics(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let today = Local::now().date_naive();
    let metrics = [store.metric_sales_mtd(today)?, store.metric_purchases_mtd(today)?];

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }
    println!();
    for metric in &metrics {
        print_metric(metric);
    }
    println!();
    Ok(())
}

pub fn cmd_seed(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let invoices = store.seed_demo(Local::now().date_naive())?;
    println!("done: {} demo invoices", invoices);
    println!("  db: {}", config.db_path().display());
    Ok(())
}
