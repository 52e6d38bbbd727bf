use crate::config::Config;
use crate::output::{self, FAIL, NARROW, OK};
use anyhow::{Context, Result, anyhow};
use log::debug;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const ERROR_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Get,
    Post,
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // pad so `{:4}` lines up the paths
        f.pad(match self {
            ProbeMethod::Get => "GET",
            ProbeMethod::Post => "POST",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: ProbeMethod,
    pub path: String,
}

impl Endpoint {
    pub fn new(method: ProbeMethod, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
        }
    }
}

/// Parses `GET:/projects` or `POST:/recommendations`.
impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (method, path) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("Expected <METHOD>:<path>, got: {}", s))?;

        let method = match method.to_ascii_uppercase().as_str() {
            "GET" => ProbeMethod::Get,
            "POST" => ProbeMethod::Post,
            other => return Err(anyhow!("Unsupported probe method: {}", other)),
        };

        if !path.starts_with('/') {
            return Err(anyhow!("Endpoint path must start with '/': {}", path));
        }

        Ok(Self::new(method, path))
    }
}

pub fn default_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new(ProbeMethod::Get, "/employees"),
        Endpoint::new(ProbeMethod::Get, "/projects"),
        Endpoint::new(ProbeMethod::Post, "/recommendations"),
        Endpoint::new(ProbeMethod::Post, "/domain-analysis"),
        Endpoint::new(ProbeMethod::Post, "/quantitative-analysis"),
        Endpoint::new(ProbeMethod::Post, "/qualitative-analysis"),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The gateway routed the request; any status other than 403.
    Routed(u16),
    /// 403: the gateway has no route for this method and path.
    Missing(Option<String>),
    Failed(String),
}

impl ProbeOutcome {
    pub fn route_exists(&self) -> bool {
        matches!(self, ProbeOutcome::Routed(_))
    }
}

pub fn classify(status: u16, body: &str) -> ProbeOutcome {
    if status == 403 {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string));
        ProbeOutcome::Missing(message)
    } else {
        ProbeOutcome::Routed(status)
    }
}

pub fn outcome_lines(endpoint: &Endpoint, outcome: &ProbeOutcome) -> Vec<String> {
    let (method, path) = (endpoint.method, endpoint.path.as_str());
    match outcome {
        ProbeOutcome::Routed(status) => vec![format!("{OK} {method:4} {path:30} - {status}")],
        ProbeOutcome::Missing(message) => vec![
            format!("{FAIL} {method:4} {path:30} - 403"),
            format!("     → {}", message.as_deref().unwrap_or("Unknown error")),
        ],
        ProbeOutcome::Failed(error) => vec![format!(
            "{FAIL} {method:4} {path:30} - Error: {}",
            error.chars().take(ERROR_PREVIEW_CHARS).collect::<String>()
        )],
    }
}

pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

pub async fn probe_endpoint(
    client: &reqwest::Client,
    base_url: &str,
    endpoint: &Endpoint,
) -> ProbeOutcome {
    let url = format!("{}{}", base_url.trim_end_matches('/'), endpoint.path);
    debug!("Probing {} {}", endpoint.method, url);

    let request = match endpoint.method {
        ProbeMethod::Get => client.get(&url),
        ProbeMethod::Post => client.post(&url).json(&json!({})),
    };

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return ProbeOutcome::Failed(e.to_string()),
    };

    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!("Failed to read response body from {url} ({status}): {e}");
            String::new()
        }
    };
    classify(status, &body)
}

/// Probes each endpoint once and prints one line per endpoint. Only 403 counts as missing.
pub async fn probe_endpoints(
    config: &Config,
    endpoints: &[Endpoint],
) -> Result<Vec<(Endpoint, ProbeOutcome)>> {
    let client = build_client(Duration::from_secs(config.probe_timeout_secs))?;
    let base_url = config.endpoint_base_url();

    output::banner("API 엔드포인트 상태 확인", NARROW);
    println!("{base_url}\n");

    let mut results = Vec::new();
    for endpoint in endpoints {
        let outcome = probe_endpoint(&client, &base_url, endpoint).await;
        for line in outcome_lines(endpoint, &outcome) {
            println!("{line}");
        }
        results.push((endpoint.clone(), outcome));
    }

    println!();
    println!("{}", output::rule(NARROW));
    println!("{OK} = 정상 (200, 400, 500 등)");
    println!("{FAIL} = 엔드포인트 없음 (403 Missing Authentication Token)");
    println!("{}", output::rule(NARROW));

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            Endpoint::new(ProbeMethod::Post, "/recommendations"),
            "post:/recommendations".parse().unwrap()
        );
        assert!("/projects".parse::<Endpoint>().is_err());
        assert!("DELETE:/projects".parse::<Endpoint>().is_err());
        assert!("GET:projects".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_only_403_means_missing() {
        assert_eq!(ProbeOutcome::Routed(200), classify(200, "[]"));
        assert_eq!(ProbeOutcome::Routed(400), classify(400, ""));
        assert_eq!(ProbeOutcome::Routed(500), classify(500, "oops"));
        assert_eq!(
            ProbeOutcome::Missing(Some("Missing Authentication Token".to_string())),
            classify(403, r#"{"message":"Missing Authentication Token"}"#)
        );
        assert_eq!(ProbeOutcome::Missing(None), classify(403, "<html>"));
        assert!(classify(502, "").route_exists());
        assert!(!classify(403, "").route_exists());
    }

    #[test]
    fn test_outcome_lines() {
        let projects = Endpoint::new(ProbeMethod::Get, "/projects");
        assert_eq!(
            vec![format!("✓ GET  {:30} - 200", "/projects")],
            outcome_lines(&projects, &ProbeOutcome::Routed(200))
        );

        let missing = outcome_lines(&projects, &ProbeOutcome::Missing(None));
        assert_eq!(2, missing.len());
        assert!(missing[0].starts_with("✗ GET "));
        assert_eq!("     → Unknown error", missing[1]);

        let failed = outcome_lines(&projects, &ProbeOutcome::Failed("x".repeat(80)));
        assert!(failed[0].ends_with(&format!("Error: {}", "x".repeat(50))));
    }

    /// Answers one request with `status_line`, declaring `content_length` but sending `body`.
    async fn serve_raw(
        status_line: &'static str,
        content_length: usize,
        body: &'static str,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status_line}\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {content_length}\r\n\
                 Connection: close\r\n\r\n{body}"
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{addr}/prod")
    }

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        serve_raw(status_line, body.len(), body).await
    }

    #[tokio::test]
    async fn test_probe_routed_endpoint() {
        let base_url = serve_once("200 OK", r#"{"projects":[]}"#).await;
        let client = build_client(Duration::from_secs(5)).unwrap();

        let outcome =
            probe_endpoint(&client, &base_url, &Endpoint::new(ProbeMethod::Get, "/projects")).await;
        assert_eq!(ProbeOutcome::Routed(200), outcome);
    }

    #[tokio::test]
    async fn test_probe_missing_route() {
        let base_url =
            serve_once("403 Forbidden", r#"{"message":"Missing Authentication Token"}"#).await;
        let client = build_client(Duration::from_secs(5)).unwrap();

        let outcome =
            probe_endpoint(&client, &base_url, &Endpoint::new(ProbeMethod::Get, "/nowhere")).await;
        assert_eq!(
            ProbeOutcome::Missing(Some("Missing Authentication Token".to_string())),
            outcome
        );
    }

    #[tokio::test]
    async fn test_truncated_body_is_classified_by_status() {
        let base_url = serve_raw("403 Forbidden", 200, r#"{"message":"Missing"#).await;
        let client = build_client(Duration::from_secs(5)).unwrap();

        let outcome =
            probe_endpoint(&client, &base_url, &Endpoint::new(ProbeMethod::Post, "/nowhere")).await;
        assert_eq!(ProbeOutcome::Missing(None), outcome);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = build_client(Duration::from_secs(1)).unwrap();
        let outcome = probe_endpoint(
            &client,
            &format!("http://{addr}"),
            &Endpoint::new(ProbeMethod::Post, "/recommendations"),
        )
        .await;
        assert!(matches!(outcome, ProbeOutcome::Failed(_)));
    }
}
