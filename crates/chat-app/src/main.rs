use std::process;
use std::sync::Arc;

use tessera::{ChatService, MessageStatus, Role, SettingsStore, render_blocks};
use tessera_stream::ScriptedBackend;

/// Demo entry point.
///
/// Replays a scripted market-recap stream through the full pipeline:
/// 1. Settings loaded from the standard config path (defaults when absent)
/// 2. A scripted backend standing in for the streaming endpoint
/// 3. The session driver folding wire frames into content blocks
/// 4. The plain-text renderer for the final transcript
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing for development debugging
    tracing_subscriber::fmt::init();

    let store = SettingsStore::load();
    let settings = store.settings().as_ref().clone();

    let backend = Arc::new(ScriptedBackend::from_frames(demo_frames()));
    let mut service = ChatService::new(backend, settings);

    let prompt = "How did markets close today?";
    println!("> {prompt}\n");
    if let Err(error) = service.send(prompt) {
        eprintln!("failed to start the reply stream: {error}");
        process::exit(1);
    }
    service.drive().await;

    for message in &service.conversation().messages {
        if message.role != Role::Assistant {
            continue;
        }
        for step in &message.thinking {
            match &step.phase {
                Some(phase) => println!("[thinking:{phase}] {}", step.content),
                None => println!("[thinking] {}", step.content),
            }
        }
        match &message.status {
            MessageStatus::Done => {
                println!("\n{}", render_blocks(&message.blocks, &message.cards));
            }
            MessageStatus::Error(error) => {
                eprintln!("stream failed: {error}");
                process::exit(1);
            }
            _ => {}
        }
    }
}

/// A transcript shaped like the production stream: thinking, metadata cards,
/// content deltas with inline markers, a discrete chart push, then done.
fn demo_frames() -> Vec<String> {
    vec![
        r#"{"type":"thinking","phase":"plan","content":"Scanning today's market moves"}"#
            .to_string(),
        r#"{"type":"metadata","conversationId":"demo-1","dataCards":[{"type":"event","id":"fomc-0918","title":"FOMC rate decision"},{"type":"article","id":"a-772","title":"Chipmakers rally on AI demand"},{"type":"image","id":"img-3","title":"S&P 500 heatmap"}]}"#
            .to_string(),
        r#"{"type":"content","content":"**Markets today**\n\nStocks closed higher after the Fed held rates steady. [EVENT_CARD:fomc-0918] The S&P 500 added 0.8% while the Nasdaq gained 1.4%.\n\n"}"#
            .to_string(),
        r#"{"type":"content","content":"[VIEW_CHART:SPY:1d]\n\nChip names extended their run. [VIEW_ARTICLE:a-772]\n\nKey drivers:\n- AI capex guidance raised again\n- Yields eased across the curve\n\n[HR]\n\nBreadth was strong into the close. [IMAGE_CARD:img-3]"}"#
            .to_string(),
        r#"{"type":"chart_block","symbol":"NVDA","timeRange":"1M"}"#.to_string(),
        r#"{"type":"done","conversationId":"demo-1","messageId":"msg-demo"}"#.to_string(),
    ]
}
