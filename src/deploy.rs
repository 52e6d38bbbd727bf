use crate::output::{self, FAIL, OK, WIDE};
use anyhow::{Context, Result, anyhow, bail};
use aws_config::SdkConfig;
use aws_sdk_lambda::Client;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use log::{debug, info};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::time::{Duration, sleep};
use walkdir::{DirEntry, WalkDir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const HANDLER_FILE: &str = "index.py";

/// A file to ship, stored at the archive root under its leaf name.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub name: String,
    pub path: PathBuf,
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        name == "__pycache__"
    } else {
        name.ends_with(".pyc") || name.ends_with(".zip")
    }
}

/// Collects the files under `source_dir`, flattened to their leaf names and sorted by name.
pub fn collect_sources(source_dir: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut entries: BTreeMap<String, PathBuf> = BTreeMap::new();

    for entry in WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
    {
        let entry = entry.with_context(|| {
            format!("Failed to walk source directory: {}", source_dir.display())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.into_path();
        if let Some(existing) = entries.insert(name.clone(), path.clone()) {
            bail!(
                "Both {} and {} flatten to {}",
                existing.display(),
                path.display(),
                name
            );
        }
    }

    if !entries.contains_key(HANDLER_FILE) {
        bail!(
            "{} not found in source directory: {}",
            HANDLER_FILE,
            source_dir.display()
        );
    }

    Ok(entries
        .into_iter()
        .map(|(name, path)| ArchiveEntry { name, path })
        .collect())
}

/// Builds a deflate-compressed zip. Entries carry a fixed timestamp so identical inputs give
/// identical bytes.
pub fn build_archive(entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        let contents = fs::read(&entry.path)
            .with_context(|| format!("Failed to read {}", entry.path.display()))?;
        writer.start_file(entry.name.as_str(), options)?;
        writer.write_all(&contents)?;
        println!("  {OK} {} 추가", entry.name);
    }

    Ok(writer.finish()?.into_inner())
}

pub fn package_directory(source_dir: &Path) -> Result<Vec<u8>> {
    let entries = collect_sources(source_dir)?;
    build_archive(&entries)
}

/// Writes `archive` to a `<function>-*.zip` temporary file, which is the copy uploaded.
pub fn write_temp_archive(function_name: &str, archive: &[u8]) -> Result<NamedTempFile> {
    let mut temp_archive = tempfile::Builder::new()
        .prefix(&format!("{function_name}-"))
        .suffix(".zip")
        .tempfile()
        .context("Failed to create temporary archive")?;
    temp_archive
        .write_all(archive)
        .context("Failed to write temporary archive")?;
    temp_archive
        .flush()
        .context("Failed to flush temporary archive")?;
    debug!("Wrote archive to {}", temp_archive.path().display());
    Ok(temp_archive)
}

#[derive(Debug, Clone)]
pub struct SmokeTest {
    pub method: String,
    pub path: String,
    pub records_field: Option<String>,
}

impl SmokeTest {
    pub fn event(&self) -> Value {
        json!({
            "httpMethod": self.method,
            "path": self.path,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmokeTestResult {
    pub status_code: Option<i64>,
    pub body: Value,
    /// Name and length of the records array found in the body.
    pub records: Option<(String, usize)>,
}

impl SmokeTestResult {
    pub fn is_ok(&self) -> bool {
        self.status_code == Some(200)
    }
}

fn find_records(body: &Value, records_field: Option<&str>) -> Option<(String, usize)> {
    let object = body.as_object()?;
    match records_field {
        Some(field) => object
            .get(field)
            .and_then(Value::as_array)
            .map(|records| (field.to_string(), records.len())),
        None => object
            .iter()
            .find_map(|(k, v)| v.as_array().map(|records| (k.clone(), records.len()))),
    }
}

/// Decodes a `{ statusCode, body }` envelope, where `body` is normally a JSON-encoded string.
pub fn parse_invoke_payload(
    payload: &[u8],
    records_field: Option<&str>,
) -> Result<SmokeTestResult> {
    let envelope: Value =
        serde_json::from_slice(payload).context("Function returned a non-JSON payload")?;

    let status_code = envelope.get("statusCode").and_then(Value::as_i64);
    let body = match envelope.get("body") {
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Null,
    };
    let records = find_records(&body, records_field);

    Ok(SmokeTestResult {
        status_code,
        body,
        records,
    })
}

pub async fn update_function_code(
    client: &Client,
    function_name: &str,
    archive: Vec<u8>,
) -> Result<()> {
    let output = client
        .update_function_code()
        .function_name(function_name)
        .zip_file(Blob::new(archive))
        .send()
        .await
        .with_context(|| format!("Failed to update function code: {}", function_name))?;

    println!("  {OK} 함수 업데이트 완료");
    println!("  함수 ARN: {}", output.function_arn().unwrap_or("N/A"));
    println!("  버전: {}", output.version().unwrap_or("N/A"));
    println!("  마지막 수정: {}", output.last_modified().unwrap_or("N/A"));
    debug!("New code sha256: {:?}", output.code_sha256());

    Ok(())
}

pub async fn invoke_smoke_test(
    client: &Client,
    function_name: &str,
    smoke_test: &SmokeTest,
) -> Result<SmokeTestResult> {
    let event = serde_json::to_vec(&smoke_test.event())?;

    let output = client
        .invoke()
        .function_name(function_name)
        .invocation_type(InvocationType::RequestResponse)
        .payload(Blob::new(event))
        .send()
        .await
        .with_context(|| format!("Failed to invoke function: {}", function_name))?;

    if let Some(function_error) = output.function_error() {
        debug!("{function_name} reported a function error: {function_error}");
    }

    let payload = output
        .payload()
        .ok_or_else(|| anyhow!("Function {} returned no payload", function_name))?;

    parse_invoke_payload(payload.as_ref(), smoke_test.records_field.as_deref())
}

fn print_smoke_test(result: &SmokeTestResult) -> Result<()> {
    if result.is_ok() {
        println!("  {OK} 테스트 성공!");
        match &result.records {
            Some((field, count)) => println!("  {field} 수: {count}"),
            None => println!(
                "  응답 본문: {}",
                output::truncate(&result.body.to_string(), 500)
            ),
        }
    } else {
        println!("  {FAIL} 테스트 실패");
        println!(
            "  상태 코드: {}",
            result
                .status_code
                .map_or_else(|| "N/A".to_string(), |c| c.to_string())
        );
        println!(
            "  응답: {}",
            output::truncate(&serde_json::to_string_pretty(&result.body)?, 500)
        );
    }
    Ok(())
}

/// Packages `source_dir`, uploads it as the code of `function_name`, and optionally invokes the
/// function once. The smoke test only reports; a failing response does not undo the upload.
pub async fn deploy_function(
    sdk_config: &SdkConfig,
    source_dir: &Path,
    function_name: &str,
    smoke_test: Option<&SmokeTest>,
    invoke_settle: Duration,
) -> Result<()> {
    let client = Client::new(sdk_config);
    let steps = if smoke_test.is_some() { 3 } else { 2 };

    output::banner(&format!("{function_name} Lambda 함수 재배포"), WIDE);

    println!("\n[1/{steps}] Lambda 함수 코드 압축 중...");
    let archive = package_directory(source_dir)?;
    println!("  압축 파일 크기: {} bytes", archive.len());

    let temp_archive = write_temp_archive(function_name, &archive)?;
    let upload = fs::read(temp_archive.path()).with_context(|| {
        format!("Failed to read {}", temp_archive.path().display())
    })?;

    println!("\n[2/{steps}] Lambda 함수 코드 업데이트 중...");
    if let Err(e) = update_function_code(&client, function_name, upload).await {
        println!("  {FAIL} 업데이트 실패: {e:#}");
        let (_, path) = temp_archive.keep()?;
        println!("  압축 파일 보존: {}", path.display());
        return Err(e);
    }

    if let Some(smoke_test) = smoke_test {
        println!("\n[3/{steps}] Lambda 함수 테스트 중...");
        sleep(invoke_settle).await;

        match invoke_smoke_test(&client, function_name, smoke_test).await {
            Ok(result) => print_smoke_test(&result)?,
            Err(e) => println!("  {FAIL} 테스트 실패: {e:#}"),
        }
    }

    temp_archive
        .close()
        .context("Failed to remove temporary archive")?;
    info!("Deployed {} from {}", function_name, source_dir.display());

    output::banner("재배포 완료!", WIDE);
    Ok(())
}
