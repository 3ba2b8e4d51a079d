use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::fs;
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

use receipt_roundup::{format_cents, parse_cents, Config, MappingStore, ReceiptPipeline};

const USAGE: &str = "\
Usage: receipt-roundup <command>

Commands:
  parse <file>                                  Parse a receipt, print it as JSON
  allocate <file> [amount]                      Parse and split the round-up
  approve <file>                                Parse and approve every assignment
  map <name> <ticker> <company> [category] [--retailer]
                                                Approve one mapping directly
  promote <name>                                Promote a pending manual mapping
  mappings                                      List stored mappings

<file> may be '-' to read from stdin.";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };
    if matches!(command.as_str(), "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    init_tracing(&config);

    let pipeline = ReceiptPipeline::from_config(&config)?;
    let rest = &args[1..];

    match command.as_str() {
        "parse" => run_parse(&pipeline, rest),
        "allocate" => run_allocate(&pipeline, rest),
        "approve" => run_approve(&pipeline, rest),
        "map" => run_map(&pipeline, rest),
        "promote" => run_promote(&pipeline, rest),
        "mappings" => run_mappings(&pipeline),
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

/// RUST_LOG wins over the configured level; logs go to stderr
fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn read_receipt(args: &[String]) -> Result<String> {
    let path = args.first().ok_or_else(|| anyhow!("Missing receipt file\n\n{}", USAGE))?;

    if path == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read receipt from stdin")?;
        return Ok(text);
    }

    fs::read_to_string(path).with_context(|| format!("Failed to read receipt file: {}", path))
}

fn run_parse(pipeline: &ReceiptPipeline, args: &[String]) -> Result<()> {
    let receipt = pipeline.process(&read_receipt(args)?);
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn run_allocate(pipeline: &ReceiptPipeline, args: &[String]) -> Result<()> {
    let text = read_receipt(args)?;
    let amount = match args.get(1) {
        Some(raw) => Some(parse_cents(raw).ok_or_else(|| anyhow!("Invalid amount: {}", raw))?),
        None => None,
    };

    let result = pipeline.run(&text, amount)?;
    let receipt = &result.receipt;

    println!("🧾 Receipt {}", receipt.id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Retailer: {} ({})",
        receipt.retailer.name,
        receipt.retailer.ticker.as_deref().unwrap_or("unmapped")
    );
    for item in &receipt.items {
        println!(
            "  {:<28} x{:<3} {:>10}  {}",
            item.name,
            item.quantity,
            format_cents(item.line_total_cents),
            item.ticker().unwrap_or("-")
        );
    }
    println!("Total: {}", format_cents(receipt.total_cents));
    if receipt.needs_manual_review {
        println!("⚠️  Needs manual review");
    }

    println!("\n💰 Round-up {}", format_cents(result.round_up_cents));
    for allocation in &result.allocations {
        println!(
            "  {:<8} {:>8}  {:>6.2}%",
            allocation.ticker,
            format_cents(allocation.amount_cents),
            allocation.percentage
        );
    }

    Ok(())
}

fn run_approve(pipeline: &ReceiptPipeline, args: &[String]) -> Result<()> {
    let receipt = pipeline.process(&read_receipt(args)?);
    let summary = pipeline.feedback().approve_receipt(&receipt, "cli")?;

    println!("✅ Approved {} mapping(s)", summary.approved_keys.len());
    for key in &summary.approved_keys {
        println!("  ✓ {}", key);
    }
    if summary.skipped > 0 {
        println!("  ({} unmapped line(s) skipped)", summary.skipped);
    }
    Ok(())
}

fn run_map(pipeline: &ReceiptPipeline, args: &[String]) -> Result<()> {
    let is_retailer = args.iter().any(|a| a == "--retailer");
    let positional: Vec<&String> = args.iter().filter(|a| *a != "--retailer").collect();

    let [name, ticker, company, rest @ ..] = positional.as_slice() else {
        bail!("map needs <name> <ticker> <company>\n\n{}", USAGE);
    };
    let category = rest.first().map(|c| c.as_str()).unwrap_or("");

    let record = pipeline
        .feedback()
        .approve_mapping(name, ticker, company, category, is_retailer, "cli")?;

    println!("✅ {} → {} ({})", record.key, record.ticker, record.company_name);
    Ok(())
}

fn run_promote(pipeline: &ReceiptPipeline, args: &[String]) -> Result<()> {
    let name = args.first().ok_or_else(|| anyhow!("promote needs <name>\n\n{}", USAGE))?;

    match pipeline.feedback().promote(name, "cli")? {
        Some(record) => println!("✅ Promoted {} → {}", record.key, record.ticker),
        None => println!("❌ No pending mapping for '{}'", name),
    }
    Ok(())
}

fn run_mappings(pipeline: &ReceiptPipeline) -> Result<()> {
    let records = pipeline.store().all()?;
    println!("📋 {} mapping(s)", records.len());

    for record in records {
        println!(
            "  {} {:<30} {:<6} {:<28} {:.2}",
            if record.approved { "✓" } else { "…" },
            record.key,
            record.ticker,
            record.company_name,
            record.confidence
        );
    }
    Ok(())
}
