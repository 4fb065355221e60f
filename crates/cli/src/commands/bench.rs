//! `voxline bench`: streaming latency per model.
//!
//! Sends the same system prompt, tool definitions and caller utterance a
//! live call would, and times the first content (or tool) event and the
//! end of the stream.

use std::time::{Duration, Instant};

use voxline_config::AppConfig;
use voxline_core::message::Message;
use voxline_core::provider::{ModelRoute, ProviderRequest};
use voxline_providers::ProviderRouter;

#[derive(Debug, Default)]
struct Timings {
    first: Vec<Duration>,
    total: Vec<Duration>,
    failures: usize,
}

pub async fn run(
    config: AppConfig,
    models: Vec<String>,
    prompt: String,
    runs: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = voxline_providers::build_from_config(&config)?;
    let system_prompt = config.agent.render_system_prompt()?;

    let mut specs = models;
    if specs.is_empty() {
        specs.push(config.llm.model.clone());
        specs.extend(config.fallback.model.clone());
    }

    println!("Streaming benchmark: {runs} run(s) per model, prompt {prompt:?}");
    println!();
    println!("{:<48} {:>24} {:>24} {:>6}", "Model", "First event ms", "Total ms", "Fail");
    println!("{:<48} {:>24} {:>24} {:>6}", "", "min / avg / max", "min / avg / max", "");

    for spec in &specs {
        let route = match resolve(&router, &config, spec) {
            Ok(route) => route,
            Err(e) => {
                eprintln!("{spec}: {e}");
                continue;
            }
        };

        if let Err(reason) = preflight(&route).await {
            eprintln!("{spec}: health check failed: {reason}");
            continue;
        }

        let request = ProviderRequest {
            model: route.model.clone(),
            messages: vec![Message::system(&system_prompt), Message::user(&prompt)],
            temperature: config.llm.temperature,
            max_tokens: Some(config.llm.max_tokens),
            tools: voxline_tools::all_definitions(),
        };

        let mut timings = Timings::default();
        for run in 0..runs {
            match time_stream(&route, request.clone()).await {
                Ok((first, total)) => {
                    timings.first.extend(first);
                    timings.total.push(total);
                }
                Err(e) => {
                    tracing::warn!(model = %route.model, run, error = %e, "Benchmark stream failed");
                    timings.failures += 1;
                }
            }
        }

        println!(
            "{:<48} {:>24} {:>24} {:>6}",
            route.model,
            summarize(&timings.first),
            summarize(&timings.total),
            timings.failures
        );
    }

    Ok(())
}

/// `provider:model`, or a bare model served by `llm.provider`.
fn resolve(router: &ProviderRouter, config: &AppConfig, spec: &str) -> Result<ModelRoute, Box<dyn std::error::Error>> {
    let (provider, model) = match spec.split_once(':') {
        Some((provider, model)) if router.get(provider).is_some() => (provider, model),
        _ => (config.llm.provider.as_str(), spec),
    };
    Ok(router.route(provider, model)?)
}

/// Skip a provider that does not answer before spending runs on it.
async fn preflight(route: &ModelRoute) -> Result<(), String> {
    match route.provider.health_check().await {
        Ok(true) => Ok(()),
        Ok(false) => Err(format!("{} did not answer", route.provider.name())),
        Err(e) => Err(e.to_string()),
    }
}

async fn time_stream(
    route: &ModelRoute,
    request: ProviderRequest,
) -> Result<(Option<Duration>, Duration), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let mut stream = route.provider.stream(request).await?;

    let mut first = None;
    while let Some(event) = stream.recv().await {
        let event = event?;
        let spoke = event.content.as_deref().is_some_and(|c| !c.is_empty());
        if first.is_none() && (spoke || event.tool_call.is_some()) {
            first = Some(started.elapsed());
        }
    }
    Ok((first, started.elapsed()))
}

fn summarize(samples: &[Duration]) -> String {
    if samples.is_empty() {
        return "-".into();
    }
    let ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    let min = ms.iter().copied().fold(f64::INFINITY, f64::min);
    let max = ms.iter().copied().fold(0.0, f64::max);
    let avg = ms.iter().sum::<f64>() / ms.len() as f64;
    format!("{min:.0} / {avg:.0} / {max:.0}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use voxline_core::error::ProviderError;
    use voxline_core::provider::{EventStream, Provider};

    struct Offline(Result<bool, ProviderError>);

    #[async_trait]
    impl Provider for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        async fn stream(&self, _request: ProviderRequest) -> Result<EventStream, ProviderError> {
            Err(ProviderError::Network("unreachable".into()))
        }

        async fn health_check(&self) -> Result<bool, ProviderError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn preflight_skips_unhealthy_providers() {
        let up = ModelRoute::new(Arc::new(Offline(Ok(true))), "m");
        assert!(preflight(&up).await.is_ok());

        let down = ModelRoute::new(Arc::new(Offline(Ok(false))), "m");
        assert_eq!(preflight(&down).await.unwrap_err(), "offline did not answer");

        let broken = ModelRoute::new(Arc::new(Offline(Err(ProviderError::Network("refused".into())))), "m");
        assert!(preflight(&broken).await.unwrap_err().contains("refused"));
    }

    #[test]
    fn summary_reports_min_avg_max() {
        let samples = [
            Duration::from_millis(100),
            Duration::from_millis(300),
            Duration::from_millis(200),
        ];
        assert_eq!(summarize(&samples), "100 / 200 / 300");
        assert_eq!(summarize(&[]), "-");
    }

    #[test]
    fn bare_model_uses_primary_provider() {
        let config = AppConfig::default();
        let router = voxline_providers::build_from_config(&config).unwrap();

        let route = resolve(&router, &config, "accounts/fireworks/models/llama-v3-70b-instruct").unwrap();
        assert_eq!(route.provider.name(), "openai");
        assert_eq!(route.model, "accounts/fireworks/models/llama-v3-70b-instruct");

        let route = resolve(&router, &config, "openai:gpt-4o-mini").unwrap();
        assert_eq!(route.model, "gpt-4o-mini");
    }
}
