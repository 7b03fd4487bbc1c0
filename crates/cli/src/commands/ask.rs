//! `docuagent ask` — Run one question through the agent against the demo corpus.

use std::time::Duration;

use docuagent_agent::executor::AgentExecutor;
use docuagent_agent::trace::{AgentEvent, TraceEntry};
use docuagent_config::AppConfig;
use docuagent_core::Principal;

pub async fn run(
    question: String,
    show_trace: bool,
    stream: bool,
    principal: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let generator = docuagent_providers::from_config(&config.generator)
        .map_err(|e| format!("Generator setup failed: {e}"))?;

    let principal = Principal::new(principal);
    let tools = docuagent_tools::demo_suite(&principal);
    let executor = AgentExecutor::new(generator, tools)
        .with_wall_clock(Duration::from_secs(config.agent.wall_clock_secs));

    if stream {
        let mut rx = executor.run_stream(principal, question);
        let mut outcome = None;

        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Trace(entry) => print_trace_entry(&entry),
                AgentEvent::Done { result } => outcome = Some(result),
            }
        }

        match outcome {
            Some(result) => {
                println!();
                println!("{}", result.answer);
                print_citations(&result);
            }
            None => return Err("Agent run failed — see trace above".into()),
        }
    } else {
        eprint!("  Thinking...");
        let result = executor.run(&principal, &question).await?;
        eprint!("\r              \r");

        println!("{}", result.answer);
        print_citations(&result);

        if show_trace {
            println!();
            println!("  --- trace ---");
            for entry in &result.trace {
                print_trace_entry(entry);
            }
        }
    }

    Ok(())
}

fn print_trace_entry(entry: &TraceEntry) {
    match entry {
        TraceEntry::Plan { steps, .. } => {
            eprintln!("  [plan] {} steps", steps.len());
            for (i, step) in steps.iter().enumerate() {
                eprintln!("         {}. {step}", i + 1);
            }
        }
        TraceEntry::ToolCall {
            tool,
            output_summary,
            ..
        } => {
            eprintln!("  [tool] {tool}: {output_summary}");
        }
        TraceEntry::Validation {
            validation_errors, ..
        } => {
            eprintln!("  [validation] {} error(s)", validation_errors.len());
        }
        TraceEntry::Reprompt { notes } => {
            eprintln!("  [reprompt] {notes}");
        }
        TraceEntry::Final { notes } => {
            eprintln!("  [final] {notes}");
        }
        TraceEntry::Error { error } => {
            eprintln!("  [error] {error}");
        }
    }
}

fn print_citations(result: &docuagent_agent::executor::AgentOutcome) {
    if result.citations.is_empty() {
        return;
    }
    println!();
    println!("  Sources:");
    for (i, citation) in result.citations.iter().enumerate() {
        println!("    [{}] {} — {}", i + 1, citation.filename, citation.snippet);
    }
    if !result.insufficiencies.is_empty() {
        println!();
        println!("  Gaps:");
        for gap in &result.insufficiencies {
            println!("    - {}: {}", gap.section, gap.missing);
        }
    }
}
