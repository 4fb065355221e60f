//! `voxline chat`: a call session on the console.
//!
//! Each line typed is one caller utterance. Frames are printed as they
//! arrive, so the console shows the same chunking a phone peer would hear.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use voxline_config::AppConfig;
use voxline_core::error::TransportError;
use voxline_core::event::EventBus;
use voxline_core::frame::{ResponseFrame, Transport};
use voxline_core::records::CallRecords;
use voxline_core::turn::TurnRequest;
use voxline_records::InMemoryStore;

/// Prints frames to stdout and remembers whether the agent hung up.
#[derive(Default)]
struct ConsoleTransport {
    ended: AtomicBool,
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(&self, frame: ResponseFrame) -> Result<(), TransportError> {
        let mut out = std::io::stdout().lock();
        if !frame.content.is_empty() {
            let _ = write!(out, "{}", frame.content);
        }
        if frame.content_complete {
            let _ = writeln!(out, "{}", if frame.end_call { "  [call ended]" } else { "" });
        }
        let _ = out.flush();
        if frame.end_call {
            self.ended.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub async fn run(config: AppConfig, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set VOXLINE_API_KEY or OPENAI_API_KEY, or add api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let store = Arc::new(InMemoryStore::new());
    let runtime = voxline_gateway::build_runtime(&config, store.clone(), store.clone(), Arc::new(EventBus::default()))?;

    let call_id = format!("console-{}", std::process::id());
    store.open_call(&call_id).await?;

    let transport = Arc::new(ConsoleTransport::default());
    let mut controller = runtime.controller(&call_id, transport.clone());

    println!();
    println!("  Primary:  {}", runtime.primary.model);
    if let Some(fallback) = &runtime.fallback {
        println!("  Fallback: {}", fallback.model);
    }
    println!();

    print!("  Agent > ");
    transport.send(ResponseFrame::begin(&runtime.intro)).await?;
    controller.record_agent_speech(&runtime.intro);

    if let Some(msg) = message {
        print!("  Agent > ");
        controller.process_turn(TurnRequest::respond(1, msg)).await?;
        return Ok(());
    }

    println!("\n  Type what the caller says and press Enter. Ctrl+D to hang up.\n");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut response_id = 0u64;
    loop {
        print!("  You   > ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        response_id += 1;
        print!("  Agent > ");
        std::io::stdout().flush()?;
        match controller.process_turn(TurnRequest::respond(response_id, line)).await {
            Ok(_) => {}
            Err(e) if e.is_deadline() => eprintln!("  [Timed out] {e}"),
            Err(e) => {
                eprintln!("  [Error] {e}");
                break;
            }
        }

        if transport.ended.load(Ordering::SeqCst) {
            break;
        }
    }

    if let Some(record) = store.get_call(&call_id).await? {
        println!();
        println!("  Call status:   {}", record.status.as_str());
        println!("  Call category: {}", record.category.as_str());
    }
    println!();

    Ok(())
}
