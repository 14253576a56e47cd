//! Thin one-shot driver around the engine: resolve or act on a single
//! phrase against a live page, print the result as JSON. The real host
//! integrations wrap [`pinpoint::PageSession`] directly; this binary exists
//! for smoke-testing an installation.
//!
//! ```text
//! pinpoint --url https://shop.example --query "the sign in button"
//! pinpoint --url https://shop.example --action click --target "sign in" \
//!     [--value ...] [--ws ws://127.0.0.1:9222/devtools/browser/...] [--mode semantic]
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use pinpoint::core::types::{ActionKind, Intent, Mode};
use pinpoint::{ActOptions, CoreContext, PageSession, PinpointConfig, QueryOptions};

fn arg_value(args: &[String], name: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(a) = iter.next() {
        if a == name {
            return iter.next().cloned();
        }
        if let Some(rest) = a.strip_prefix(&format!("{}=", name)) {
            return Some(rest.to_string());
        }
    }
    None
}

fn usage() -> ! {
    eprintln!(
        "usage: pinpoint --url <URL> (--query <PHRASE> | --action <KIND> --target <PHRASE> [--value <V>])\n\
         \t[--ws <DEVTOOLS_WS_URL>] [--mode semantic|no-semantic|hybrid]"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(url) = arg_value(&args, "--url") else { usage() };
    let ws = arg_value(&args, "--ws");
    let mode = arg_value(&args, "--mode").as_deref().and_then(Mode::parse_str);

    let config = PinpointConfig::load();
    let ctx = CoreContext::init(config).await?;

    let handle = pinpoint::browser::connect(ws.as_deref(), 1280, 900).await?;
    let page = handle.open_page(&url).await?;
    info!("page open: {}", url);

    let session = PageSession::new(Arc::clone(&ctx), Arc::new(page));
    let cancel = CancellationToken::new();

    let exit_code;
    if let Some(phrase) = arg_value(&args, "--query") {
        let result = session.query(&phrase, QueryOptions { mode }, &cancel).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        exit_code = if result.success { 0 } else { 1 };
    } else if let Some(kind) = arg_value(&args, "--action") {
        let Some(action) = ActionKind::parse_str(&kind) else { usage() };
        let Some(target_phrase) = arg_value(&args, "--target") else { usage() };
        let intent = Intent { action, target_phrase, value: arg_value(&args, "--value") };
        let result = session.act(&intent, ActOptions::default(), &cancel).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        exit_code = if result.success { 0 } else { 1 };
    } else {
        usage();
    }

    handle.close().await;
    std::process::exit(exit_code);
}
