use anyhow::Context as _;
use gale_runner::prelude::*;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::Instant;

const BUNDLED_CONFIG: &str = include_str!("../cache_compare.toml");

/// Matches the default request timeout of other load testing tools so slow services show up as
/// long requests rather than failures.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Where each of the compared services is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServiceUrls {
    go: String,
    java: String,
    python: String,
}

impl ServiceUrls {
    fn from_env() -> Self {
        Self {
            go: env_or("GALE_GO_URL", "http://127.0.0.1:8080"),
            java: env_or("GALE_JAVA_URL", "http://127.0.0.1:8081"),
            python: env_or("GALE_PYTHON_URL", "http://127.0.0.1:8082"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// `GET <base>/cache`, failing unless the service answers with `200 OK`.
///
/// Besides the metrics every virtual user records, this records `<prefix>_status_ok`.
struct CacheProbe {
    prefix: String,
    status_ok_metric: String,
    url: String,
    client: reqwest::Client,
}

impl CacheProbe {
    fn new(prefix: &str, base_url: &str, client: reqwest::Client) -> Self {
        Self {
            prefix: prefix.to_string(),
            status_ok_metric: format!("{prefix}_status_ok"),
            url: format!("{}/cache", base_url.trim_end_matches('/')),
            client,
        }
    }
}

#[async_trait]
impl Probe for CacheProbe {
    fn metric_prefix(&self) -> &str {
        &self.prefix
    }

    async fn call(&self, ctx: &mut ProbeContext) -> GaleResult<ProbeOutcome> {
        let started = Instant::now();

        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => {
                ctx.recorder().add_rate(&self.status_ok_metric, false);
                return Err(e).with_context(|| format!("Request to {} failed", self.url));
            }
        };

        let status_ok = response.status() == StatusCode::OK;
        ctx.recorder().add_rate(&self.status_ok_metric, status_ok);

        if !ctx.discard_response_bodies() {
            response
                .bytes()
                .await
                .with_context(|| format!("Failed to read response body from {}", self.url))?;
        }

        Ok(ProbeOutcome {
            success: status_ok,
            elapsed: started.elapsed(),
        })
    }
}

fn probes(urls: &ServiceUrls, client: reqwest::Client) -> ProbeRegistry {
    ProbeRegistry::new()
        .with_probe("goRequest", CacheProbe::new("go", &urls.go, client.clone()))
        .with_probe(
            "javaRequest",
            CacheProbe::new("java", &urls.java, client.clone()),
        )
        .with_probe(
            "pythonRequest",
            CacheProbe::new("python", &urls.python, client),
        )
}

fn http_client() -> GaleResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

fn main() -> GaleResult<()> {
    let cli = init();

    let config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::from_toml_str(BUNDLED_CONFIG)?,
    };

    let urls = ServiceUrls::from_env();
    log::info!("Comparing services: {urls:?}");

    let definition = config
        .into_definition(&probes(&urls, http_client()?))?
        .with_env("GALE_GO_URL", urls.go.clone())
        .with_env("GALE_JAVA_URL", urls.java.clone())
        .with_env("GALE_PYTHON_URL", urls.python.clone());

    run(definition, &cli)?;

    Ok(())
}
