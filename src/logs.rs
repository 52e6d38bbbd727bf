use crate::output::{self, FAIL, OK, WIDE};
use anyhow::{Context, Result, anyhow, bail};
use aws_config::SdkConfig;
use aws_sdk_cloudwatchlogs::Client;
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use log::{debug, trace};
use std::fmt::Display;

/// Keywords that flag a log line as worth triaging.
pub const ERROR_KEYWORDS: &[&str] = &["error", "exception", "ai 분석", "json 파싱", "bedrock"];

const DISCOVERY_WINDOW_MINUTES: i64 = 10;
const DISCOVERY_LIMIT: i32 = 100;
const DISCOVERY_TAIL: usize = 20;

pub fn log_group_name(function_name: &str) -> String {
    format!("/aws/lambda/{function_name}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct LogQuery {
    pub log_group_name: String,
    pub window: Duration,
    /// Maximum number of events fetched.
    pub limit: i32,
    /// Number of trailing events rendered.
    pub tail: usize,
    pub keywords: Vec<String>,
}

fn parse_timestamp(timestamp: i64) -> Result<DateTime<Utc>> {
    if timestamp < 0 {
        return Err(anyhow!("Invalid timestamp: {}", timestamp));
    }

    let secs = timestamp / 1000;
    let nsecs = ((timestamp % 1000) * 1_000_000) as u32;

    DateTime::<Utc>::from_timestamp(secs, nsecs)
        .ok_or_else(|| anyhow!("Failed to parse timestamp: {}", timestamp))
}

/// Case-insensitive substring match against any keyword. No keywords matches everything.
pub fn matches_keywords(message: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let message = message.to_lowercase();
    keywords
        .iter()
        .any(|keyword| message.contains(&keyword.to_lowercase()))
}

/// Applies the keyword filter, then keeps the last `tail` events.
pub fn select_events<'a>(
    events: &'a [LogEvent],
    keywords: &[String],
    tail: usize,
) -> Vec<&'a LogEvent> {
    let matching: Vec<&LogEvent> = events
        .iter()
        .filter(|event| matches_keywords(&event.message, keywords))
        .collect();
    let skip = matching.len().saturating_sub(tail);
    matching.into_iter().skip(skip).collect()
}

pub fn render_event_in<Tz: TimeZone>(event: &LogEvent, tz: &Tz) -> Result<String>
where
    Tz::Offset: Display,
{
    let timestamp = parse_timestamp(event.timestamp)?.with_timezone(tz);
    Ok(format!(
        "[{}] {}",
        timestamp.format("%H:%M:%S"),
        event.message.trim()
    ))
}

/// Renders `[HH:MM:SS] message` in local time.
pub fn render_event(event: &LogEvent) -> Result<String> {
    render_event_in(event, &Local)
}

/// Where log events are read from.
#[allow(async_fn_in_trait)]
pub trait LogEvents {
    /// Fetches events in time order, returning `None` when the log group does not exist.
    async fn filter_events(&self, query: &LogQuery) -> Result<Option<Vec<LogEvent>>>;
}

pub struct CloudWatchLogEvents {
    client: Client,
}

impl CloudWatchLogEvents {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

impl LogEvents for CloudWatchLogEvents {
    async fn filter_events(&self, query: &LogQuery) -> Result<Option<Vec<LogEvent>>> {
        let end = Utc::now();
        let start = end - query.window;
        let limit = query.limit.max(1);

        let mut next_token = None;
        let mut events = Vec::new();

        loop {
            trace!(
                "Filtering log events for {} (next_token={next_token:?})",
                query.log_group_name
            );

            let remaining = limit - events.len() as i32;
            let output = match self
                .client
                .filter_log_events()
                .log_group_name(&query.log_group_name)
                .start_time(start.timestamp_millis())
                .end_time(end.timestamp_millis())
                .limit(remaining)
                .set_next_token(next_token)
                .send()
                .await
            {
                Ok(output) => output,
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|e| e.is_resource_not_found_exception()) =>
                {
                    return Ok(None);
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("Failed to filter log events for {}", query.log_group_name)
                    });
                }
            };

            events.extend(output.events().iter().map(|event| LogEvent {
                timestamp: event.timestamp().unwrap_or_default(),
                message: event.message().unwrap_or_default().to_string(),
            }));

            next_token = output.next_token;
            if next_token.is_none() || events.len() as i32 >= limit {
                debug!(
                    "Fetched {} log event(s) from {}",
                    events.len(),
                    query.log_group_name
                );
                events.truncate(limit as usize);
                break Ok(Some(events));
            }
        }
    }
}

/// Fetches and prints the events selected by `query`, returning them. A missing log group is
/// reported and is an error.
async fn print_events<L: LogEvents>(source: &L, query: &LogQuery) -> Result<Vec<LogEvent>> {
    let events = match source.filter_events(query).await {
        Ok(Some(events)) => events,
        Ok(None) => {
            println!("\n{FAIL} 로그 그룹 없음: {}", query.log_group_name);
            bail!("Log group {} does not exist", query.log_group_name);
        }
        Err(e) => {
            println!("\n{FAIL} 로그 조회 오류: {e:#}");
            return Err(e);
        }
    };

    println!(
        "\n최근 {}분간 로그 ({}개):\n",
        query.window.num_minutes(),
        events.len()
    );

    let selected: Vec<LogEvent> = select_events(&events, &query.keywords, query.tail)
        .into_iter()
        .cloned()
        .collect();
    if selected.is_empty() {
        println!("  (로그 없음)");
    }
    for event in &selected {
        println!("{}", render_event(event)?);
    }

    Ok(selected)
}

pub async fn show_logs<L: LogEvents>(source: &L, query: &LogQuery) -> Result<Vec<LogEvent>> {
    output::banner(
        if query.keywords.is_empty() {
            "Lambda 함수 로그 확인"
        } else {
            "최근 Lambda 에러 로그"
        },
        WIDE,
    );
    println!("로그 그룹: {}", query.log_group_name);

    let selected = print_events(source, query).await?;

    output::footer(WIDE);
    Ok(selected)
}

/// The function names visible to the caller.
#[allow(async_fn_in_trait)]
pub trait FunctionNames {
    async fn function_names(&self) -> Result<Vec<String>>;
}

pub struct LambdaFunctions {
    client: aws_sdk_lambda::Client,
}

impl LambdaFunctions {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_lambda::Client::new(sdk_config),
        }
    }
}

impl FunctionNames for LambdaFunctions {
    async fn function_names(&self) -> Result<Vec<String>> {
        let mut marker = None;
        let mut names = Vec::new();

        loop {
            trace!("Listing functions (marker={marker:?})");

            let output = self
                .client
                .list_functions()
                .set_marker(marker)
                .send()
                .await
                .context("Failed to list functions")?;

            names.extend(
                output
                    .functions()
                    .iter()
                    .filter_map(|function| function.function_name().map(str::to_string)),
            );

            marker = output.next_marker;
            if marker.is_none() {
                break Ok(names);
            }
        }
    }
}

/// The first name containing `needle`, ignoring case.
pub fn select_function<'a>(names: &'a [String], needle: &str) -> Option<&'a str> {
    let needle = needle.to_lowercase();
    names
        .iter()
        .find(|name| name.to_lowercase().contains(&needle))
        .map(String::as_str)
}

/// The recent-activity query shown for a discovered function.
pub fn discovery_query(function_name: &str) -> LogQuery {
    LogQuery {
        log_group_name: log_group_name(function_name),
        window: Duration::minutes(DISCOVERY_WINDOW_MINUTES),
        limit: DISCOVERY_LIMIT,
        tail: DISCOVERY_TAIL,
        keywords: Vec::new(),
    }
}

/// Lists every function, marking those whose name contains `needle` (case-insensitive), then
/// prints the recent log events of the first match. No match is an error.
pub async fn find_functions<F: FunctionNames, L: LogEvents>(
    functions: &F,
    source: &L,
    needle: &str,
) -> Result<Vec<LogEvent>> {
    output::banner("Lambda 함수 및 로그 확인", WIDE);
    println!("\n[Lambda 함수 목록]");

    let names = functions.function_names().await?;
    let selected = select_function(&names, needle);
    let lowered = needle.to_lowercase();
    for name in &names {
        if Some(name.as_str()) == selected {
            println!("  {OK} {name} (선택됨)");
        } else if name.to_lowercase().contains(&lowered) {
            println!("  {OK} {name}");
        } else {
            println!("    {name}");
        }
    }

    let Some(name) = selected else {
        println!("\n{FAIL} '{needle}'와 일치하는 Lambda 함수를 찾을 수 없습니다.");
        bail!("No function name contains '{}'", needle);
    };

    let query = discovery_query(name);
    println!("\n[선택된 함수: {name}]");
    println!("로그 그룹: {}", query.log_group_name);

    let selected = print_events(source, &query).await?;

    output::footer(WIDE);
    Ok(selected)
}
