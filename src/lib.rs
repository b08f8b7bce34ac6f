#![recursion_limit = "512"]

mod cache;
mod config;
mod error;
mod fetch;
mod handlers;
mod markdown;
mod platform;
mod response;

use worker::*;
use worker_macros::event;

use crate::cache::{EdgeCache, EdgeClock, WaitUntil};
use crate::config::ConvertConfig;
use crate::fetch::WorkerFetcher;
use crate::handlers::{Outcome, Relay};
use crate::platform::InboundRequest;

#[event(fetch)]
pub async fn main(req: Request, env: Env, ctx: Context) -> Result<Response> {
    // It's crucial to set the panic hook, otherwise panics might silently fail
    console_error_panic_hook::set_once();

    let inbound = InboundRequest::new(req.method().as_ref(), req.url()?);
    let relay = Relay::new(WorkerFetcher, EdgeCache::new(), WaitUntil(ctx), EdgeClock)
        .with_config(convert_config(&env));

    let relayed = match relay.handle(&inbound).await {
        Ok(relayed) => relayed,
        Err(e) => {
            console_error!("Relay failed for {}: {}", inbound.url, e);
            return Err(e.into());
        }
    };

    match &relayed.outcome {
        Outcome::CacheHit => console_log!("Cache hit: {}", inbound.url),
        Outcome::Converted { url, chars } => {
            console_log!("Converted {} ({} chars)", url.chars().take(80).collect::<String>(), chars)
        }
        Outcome::Rejected(reason) => console_warn!("Rejected {}: {}", inbound.url, reason),
    }

    relayed.response.into_worker()
}

fn convert_config(env: &Env) -> ConvertConfig {
    let raw = env.var("CONVERT_CONFIG").ok().map(|v| v.to_string());
    match ConvertConfig::from_json_var(raw.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            console_warn!("Ignoring invalid CONVERT_CONFIG: {}", e);
            ConvertConfig::default()
        }
    }
}
