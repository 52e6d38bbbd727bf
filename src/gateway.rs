use crate::config::Config;
use crate::output::{self, FAIL, NARROW, OK};
use anyhow::{Context, Result, anyhow, bail};
use aws_config::SdkConfig;
use aws_sdk_apigateway::Client;
use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tokio::time::{Duration, sleep};

const LISTED_PATHS: usize = 5;
const RECENT_DEPLOYMENTS: i32 = 5;

/// Paths whose integration targets `stage-status` always reports, alongside the marker path.
const STAGE_CHECK_PATHS: &[&str] = &[
    "/domain-analysis",
    "/recommendations",
    "/quantitative-analysis",
    "/qualitative-analysis",
];

#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySummary {
    pub id: String,
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSummary {
    pub id: String,
    pub path: String,
    pub methods: Vec<String>,
}

/// A method on a gateway, addressed as `<resource-id>/<VERB>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodRef {
    pub resource_id: String,
    pub http_method: String,
}

impl MethodRef {
    pub fn new(resource_id: &str, http_method: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            http_method: http_method.to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_id, self.http_method)
    }
}

impl FromStr for MethodRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((resource_id, http_method))
                if !resource_id.is_empty()
                    && !http_method.is_empty()
                    && !http_method.contains('/') =>
            {
                Ok(Self::new(resource_id, http_method))
            }
            _ => Err(anyhow!("Expected <resource-id>/<VERB>, got: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationSummary {
    pub integration_type: String,
    pub uri: Option<String>,
}

impl IntegrationSummary {
    pub fn lambda_function(&self) -> Option<&str> {
        self.uri.as_deref().and_then(lambda_from_uri)
    }
}

/// Extracts the function name from a Lambda integration URI: the text between the first
/// `function:` and the following `/`.
pub fn lambda_from_uri(uri: &str) -> Option<&str> {
    let (_, rest) = uri.split_once("function:")?;
    rest.split('/').next().filter(|name| !name.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageInfo {
    pub deployment_id: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentSummary {
    pub id: String,
    pub description: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissingIntegration {
    pub path: String,
    pub method: MethodRef,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RepairReport {
    pub deleted: Vec<MethodRef>,
    pub already_missing: Vec<MethodRef>,
    pub failed: Vec<MethodRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployOutcome {
    pub previous_deployment_id: Option<String>,
    pub deployment_id: String,
    pub current_deployment_id: Option<String>,
}

impl DeployOutcome {
    pub fn advanced(&self) -> bool {
        self.current_deployment_id.as_deref() == Some(self.deployment_id.as_str())
            && self.previous_deployment_id.as_deref() != Some(self.deployment_id.as_str())
    }
}

/// One gateway as listed by `enumerate_gateways`.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayListing {
    pub gateway: GatewaySummary,
    /// The first resource paths, at most five.
    pub shown_paths: Vec<String>,
    pub marker_found: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Lambda(String),
    /// An integration that does not point at a function.
    Unresolved,
    NoIntegration,
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Lambda(name) => f.write_str(name),
            RouteTarget::Unresolved => f.write_str("N/A"),
            RouteTarget::NoIntegration => f.write_str("No integration"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteStatus {
    pub path: String,
    pub http_method: String,
    pub target: RouteTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageStatus {
    pub stage: StageInfo,
    pub current: Option<DeploymentSummary>,
    pub routes: Vec<RouteStatus>,
    pub recent: Vec<DeploymentSummary>,
}

/// The REST API operations the gateway manager relies on.
#[allow(async_fn_in_trait)]
pub trait GatewayApi {
    async fn list_gateways(&self) -> Result<Vec<GatewaySummary>>;

    async fn list_resources(&self, gateway_id: &str) -> Result<Vec<ResourceSummary>>;

    /// Returns the integration of a method, or `None` when it has none.
    async fn integration(
        &self,
        gateway_id: &str,
        method: &MethodRef,
    ) -> Result<Option<IntegrationSummary>>;

    /// Deletes a method, returning `false` when it was already gone.
    async fn delete_method(&self, gateway_id: &str, method: &MethodRef) -> Result<bool>;

    async fn create_deployment(
        &self,
        gateway_id: &str,
        stage: &str,
        description: &str,
    ) -> Result<String>;

    async fn stage_deployment(&self, gateway_id: &str, stage: &str) -> Result<StageInfo>;

    async fn deployment(&self, gateway_id: &str, deployment_id: &str)
    -> Result<DeploymentSummary>;

    async fn recent_deployments(
        &self,
        gateway_id: &str,
        limit: i32,
    ) -> Result<Vec<DeploymentSummary>>;
}

pub struct ApiGateway {
    client: Client,
}

impl ApiGateway {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

fn to_chrono(date: &aws_sdk_apigateway::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(date.secs(), date.subsec_nanos())
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map_or_else(|| "N/A".to_string(), |date| date.to_rfc3339())
}

impl GatewayApi for ApiGateway {
    async fn list_gateways(&self) -> Result<Vec<GatewaySummary>> {
        let mut position = None;
        let mut gateways = Vec::new();

        loop {
            trace!("Getting REST APIs (position={position:?})");

            let output = self
                .client
                .get_rest_apis()
                .limit(100)
                .set_position(position)
                .send()
                .await
                .context("Failed to get REST APIs")?;

            gateways.extend(output.items().iter().map(|api| GatewaySummary {
                id: api.id().unwrap_or_default().to_string(),
                name: api.name().unwrap_or_default().to_string(),
                created: api.created_date().and_then(to_chrono),
            }));

            position = output.position;
            if position.is_none() {
                debug!("Found {} REST API(s)", gateways.len());
                break Ok(gateways);
            }
        }
    }

    async fn list_resources(&self, gateway_id: &str) -> Result<Vec<ResourceSummary>> {
        let mut position = None;
        let mut resources = Vec::new();

        loop {
            trace!("Getting resources for {gateway_id} (position={position:?})");

            let output = self
                .client
                .get_resources()
                .rest_api_id(gateway_id)
                .limit(500)
                .set_position(position)
                .send()
                .await
                .with_context(|| format!("Failed to get resources for {}", gateway_id))?;

            resources.extend(output.items().iter().map(|resource| {
                let mut methods: Vec<String> = resource
                    .resource_methods()
                    .map(|methods| methods.keys().cloned().collect())
                    .unwrap_or_default();
                methods.sort();

                ResourceSummary {
                    id: resource.id().unwrap_or_default().to_string(),
                    path: resource.path().unwrap_or_default().to_string(),
                    methods,
                }
            }));

            position = output.position;
            if position.is_none() {
                debug!("Found {} resource(s) in {gateway_id}", resources.len());
                break Ok(resources);
            }
        }
    }

    async fn integration(
        &self,
        gateway_id: &str,
        method: &MethodRef,
    ) -> Result<Option<IntegrationSummary>> {
        match self
            .client
            .get_integration()
            .rest_api_id(gateway_id)
            .resource_id(&method.resource_id)
            .http_method(&method.http_method)
            .send()
            .await
        {
            Ok(output) => Ok(Some(IntegrationSummary {
                integration_type: output
                    .r#type()
                    .map_or("Unknown", |integration_type| integration_type.as_str())
                    .to_string(),
                uri: output.uri().map(str::to_string),
            })),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to get integration for {method}"))
            }
        }
    }

    async fn delete_method(&self, gateway_id: &str, method: &MethodRef) -> Result<bool> {
        match self
            .client
            .delete_method()
            .rest_api_id(gateway_id)
            .resource_id(&method.resource_id)
            .http_method(&method.http_method)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(err).with_context(|| format!("Failed to delete method {method}")),
        }
    }

    async fn create_deployment(
        &self,
        gateway_id: &str,
        stage: &str,
        description: &str,
    ) -> Result<String> {
        let output = self
            .client
            .create_deployment()
            .rest_api_id(gateway_id)
            .stage_name(stage)
            .description(description)
            .send()
            .await
            .with_context(|| format!("Failed to create deployment for {}/{}", gateway_id, stage))?;

        output
            .id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Deployment for {} returned no id", gateway_id))
    }

    async fn stage_deployment(&self, gateway_id: &str, stage: &str) -> Result<StageInfo> {
        let output = self
            .client
            .get_stage()
            .rest_api_id(gateway_id)
            .stage_name(stage)
            .send()
            .await
            .with_context(|| format!("Failed to get stage {}/{}", gateway_id, stage))?;

        Ok(StageInfo {
            deployment_id: output.deployment_id().map(str::to_string),
            last_updated: output.last_updated_date().and_then(to_chrono),
        })
    }

    async fn deployment(
        &self,
        gateway_id: &str,
        deployment_id: &str,
    ) -> Result<DeploymentSummary> {
        let output = self
            .client
            .get_deployment()
            .rest_api_id(gateway_id)
            .deployment_id(deployment_id)
            .send()
            .await
            .with_context(|| format!("Failed to get deployment {}/{}", gateway_id, deployment_id))?;

        Ok(DeploymentSummary {
            id: output.id().unwrap_or(deployment_id).to_string(),
            description: output.description().map(str::to_string),
            created: output.created_date().and_then(to_chrono),
        })
    }

    async fn recent_deployments(
        &self,
        gateway_id: &str,
        limit: i32,
    ) -> Result<Vec<DeploymentSummary>> {
        let output = self
            .client
            .get_deployments()
            .rest_api_id(gateway_id)
            .limit(limit)
            .send()
            .await
            .with_context(|| format!("Failed to get deployments for {}", gateway_id))?;

        Ok(output
            .items()
            .iter()
            .map(|deployment| DeploymentSummary {
                id: deployment.id().unwrap_or_default().to_string(),
                description: deployment.description().map(str::to_string),
                created: deployment.created_date().and_then(to_chrono),
            })
            .collect())
    }
}

/// Prints every gateway in the region with its first resource paths, announcing resources
/// whose path matches the configured marker. A gateway whose resources can't be read is
/// reported and skipped.
pub async fn enumerate_gateways<G: GatewayApi>(
    api: &G,
    config: &Config,
) -> Result<Vec<GatewayListing>> {
    output::banner("API Gateway 목록 조회", NARROW);

    let gateways = api.list_gateways().await?;
    println!("\n발견된 API: {}개\n", gateways.len());

    let mut listings = Vec::new();
    for gateway in gateways {
        println!("API: {}", gateway.name);
        println!("  ID: {}", gateway.id);
        println!("  Created: {}", format_date(gateway.created));
        println!(
            "  Endpoint: https://{}.execute-api.{}.amazonaws.com/{}",
            gateway.id, config.region, config.stage
        );

        let mut listing = GatewayListing {
            gateway,
            shown_paths: Vec::new(),
            marker_found: false,
            error: None,
        };

        match api.list_resources(&listing.gateway.id).await {
            Ok(resources) => {
                listing.shown_paths = resources
                    .iter()
                    .take(LISTED_PATHS)
                    .map(|r| r.path.clone())
                    .collect();
                println!("  Resources: {}", listing.shown_paths.join(", "));

                listing.marker_found = resources
                    .iter()
                    .any(|r| r.path.contains(&config.marker_path));
                if listing.marker_found {
                    println!("  {OK} {} 발견!", config.marker_path);
                }
            }
            Err(e) => {
                println!("  Error: {e:#}");
                listing.error = Some(format!("{e:#}"));
            }
        }

        println!();
        listings.push(listing);
    }

    Ok(listings)
}

/// Walks every method of every resource and collects those without an integration.
pub async fn audit_integrations<G: GatewayApi>(
    api: &G,
    gateway_id: &str,
) -> Result<Vec<MissingIntegration>> {
    let resources = api.list_resources(gateway_id).await?;
    let mut missing = Vec::new();

    for resource in resources {
        if resource.methods.is_empty() {
            continue;
        }

        println!("\n리소스: {} (ID: {})", resource.path, resource.id);

        for http_method in &resource.methods {
            let method = MethodRef::new(&resource.id, http_method);
            match api.integration(gateway_id, &method).await {
                Ok(Some(integration)) => {
                    println!(
                        "  {http_method}: {OK} 통합 존재: {}",
                        integration.integration_type
                    )
                }
                Ok(None) => {
                    println!("  {http_method}: {FAIL} 통합 없음 - 수정 필요!");
                    missing.push(MissingIntegration {
                        path: resource.path.clone(),
                        method,
                    });
                }
                Err(e) => {
                    warn!("Could not check integration for {method}: {e:#}");
                    println!("  {http_method}: {FAIL} 오류: {e:#}");
                }
            }
        }
    }

    Ok(missing)
}

fn print_missing(missing: &[MissingIntegration]) {
    println!("\n{}", output::rule(NARROW));
    if missing.is_empty() {
        println!("모든 메서드에 통합이 있습니다!");
    } else {
        println!("총 {}개의 메서드에 통합이 없습니다:", missing.len());
        for item in missing {
            println!(
                "  - {} {} (ID: {})",
                item.method.http_method, item.path, item.method.resource_id
            );
        }
    }
    println!("{}", output::rule(NARROW));
}

/// Deletes each target method. Targets that are already gone count as repaired; other
/// failures are reported and the remaining targets are still processed.
pub async fn repair_methods<G: GatewayApi>(
    api: &G,
    gateway_id: &str,
    targets: &[MethodRef],
) -> RepairReport {
    let mut report = RepairReport::default();

    for method in targets {
        match api.delete_method(gateway_id, method).await {
            Ok(true) => {
                println!("  {OK} {method} 삭제됨");
                report.deleted.push(method.clone());
            }
            Ok(false) => {
                println!("  ℹ️  {method} 이미 없음");
                report.already_missing.push(method.clone());
            }
            Err(e) => {
                println!("  ⚠️  {method} 삭제 실패: {e:#}");
                report.failed.push(method.clone());
            }
        }
    }

    report
}

/// Creates a deployment on `stage`, waits `settle`, then confirms the stage now points at it.
pub async fn deploy_stage<G: GatewayApi>(
    api: &G,
    gateway_id: &str,
    stage: &str,
    description: &str,
    settle: Duration,
) -> Result<DeployOutcome> {
    let previous_deployment_id = match api.stage_deployment(gateway_id, stage).await {
        Ok(info) => info.deployment_id,
        Err(e) => {
            warn!("Could not read stage {stage} before deploying: {e:#}");
            None
        }
    };
    debug!("Stage {stage} currently at {previous_deployment_id:?}");

    let deployment_id = match api.create_deployment(gateway_id, stage, description).await {
        Ok(id) => id,
        Err(e) => {
            println!("  {FAIL} 배포 실패: {e:#}");
            return Err(e);
        }
    };
    println!("  {OK} 배포 성공! (ID: {deployment_id})");

    println!("\n배포 전파 대기 중 ({}초)...", settle.as_secs());
    sleep(settle).await;

    let current_deployment_id = api.stage_deployment(gateway_id, stage).await?.deployment_id;
    let outcome = DeployOutcome {
        previous_deployment_id,
        deployment_id,
        current_deployment_id,
    };

    if !outcome.advanced() {
        println!(
            "  {FAIL} Stage {stage}가 새 배포를 가리키지 않습니다 (현재: {})",
            outcome.current_deployment_id.as_deref().unwrap_or("N/A")
        );
        bail!(
            "Stage {} did not advance to deployment {}",
            stage,
            outcome.deployment_id
        );
    }

    println!("\n{OK} Stage 업데이트 확인:");
    println!(
        "  Previous Deployment ID: {}",
        outcome.previous_deployment_id.as_deref().unwrap_or("N/A")
    );
    println!("  Current Deployment ID: {}", outcome.deployment_id);
    info!("Deployed {gateway_id}/{stage} as {}", outcome.deployment_id);

    Ok(outcome)
}

/// Audits the gateway, deletes every method lacking an integration plus any explicitly named
/// `extra_targets`, then deploys. Deleted methods are not restored if the deploy fails.
pub async fn repair_and_deploy<G: GatewayApi>(
    api: &G,
    config: &Config,
    extra_targets: &[MethodRef],
    description: &str,
) -> Result<DeployOutcome> {
    let gateway_id = config.gateway_id.as_str();

    output::banner("모든 리소스 및 메서드 확인", NARROW);
    let missing = audit_integrations(api, gateway_id).await?;
    print_missing(&missing);

    let targets: BTreeSet<MethodRef> = missing
        .into_iter()
        .map(|m| m.method)
        .chain(extra_targets.iter().cloned())
        .collect();
    let targets: Vec<MethodRef> = targets.into_iter().collect();

    if !targets.is_empty() {
        println!("\n[통합 없는 메서드 삭제 중...]");
        let report = repair_methods(api, gateway_id, &targets).await;
        debug!("Repair report: {report:?}");
        if !report.failed.is_empty() {
            warn!(
                "{} method(s) could not be deleted; the deployment may be rejected",
                report.failed.len()
            );
        }
    }

    output::banner("배포 시도...", NARROW);
    let outcome = deploy_stage(
        api,
        gateway_id,
        &config.stage,
        description,
        Duration::from_secs(config.deploy_settle_secs),
    )
    .await?;

    println!("\nAPI 엔드포인트:");
    println!("  {}", config.endpoint_base_url());
    output::footer(NARROW);

    Ok(outcome)
}

pub async fn audit_gateway<G: GatewayApi>(
    api: &G,
    gateway_id: &str,
) -> Result<Vec<MissingIntegration>> {
    output::banner("통합이 없는 메서드 찾기...", NARROW);
    let missing = audit_integrations(api, gateway_id).await?;
    print_missing(&missing);
    Ok(missing)
}

pub async fn redeploy_gateway<G: GatewayApi>(
    api: &G,
    config: &Config,
    description: &str,
) -> Result<DeployOutcome> {
    output::banner("API 강제 재배포", NARROW);
    println!("\nAPI Gateway ID: {}", config.gateway_id);
    println!("새 배포 생성 중...");

    let outcome = deploy_stage(
        api,
        &config.gateway_id,
        &config.stage,
        description,
        Duration::from_secs(config.deploy_settle_secs),
    )
    .await?;

    println!("\nAPI 엔드포인트:");
    println!("  {}", config.endpoint_base_url());
    output::footer(NARROW);

    Ok(outcome)
}

/// Numbered `id - created` lines, marking the deployment the stage points at.
pub fn recent_deployment_lines(
    recent: &[DeploymentSummary],
    current_id: Option<&str>,
) -> Vec<String> {
    recent
        .iter()
        .enumerate()
        .map(|(i, deployment)| {
            let marker = if current_id == Some(deployment.id.as_str()) {
                " ← 현재"
            } else {
                ""
            };
            format!(
                "  {}. {} - {}{marker}",
                i + 1,
                deployment.id,
                format_date(deployment.created)
            )
        })
        .collect()
}

fn checked_paths(config: &Config) -> BTreeSet<&str> {
    let mut paths: BTreeSet<&str> = STAGE_CHECK_PATHS.iter().copied().collect();
    paths.insert(config.marker_path.as_str());
    paths
}

/// Shows which deployment the stage serves, which function each checked route invokes, and
/// the most recent deployments of the gateway.
pub async fn stage_status<G: GatewayApi>(api: &G, config: &Config) -> Result<StageStatus> {
    let gateway_id = config.gateway_id.as_str();

    output::banner("Stage 배포 상태 확인", NARROW);

    let stage = api.stage_deployment(gateway_id, &config.stage).await?;
    println!("\nStage: {}", config.stage);
    println!(
        "Deployment ID: {}",
        stage.deployment_id.as_deref().unwrap_or("N/A")
    );
    println!("Last Updated: {}", format_date(stage.last_updated));

    let current = match &stage.deployment_id {
        Some(deployment_id) => Some(api.deployment(gateway_id, deployment_id).await?),
        None => None,
    };
    if let Some(deployment) = &current {
        println!("\nDeployment 정보:");
        println!("  ID: {}", deployment.id);
        println!("  Created: {}", format_date(deployment.created));
        println!(
            "  Description: {}",
            deployment.description.as_deref().unwrap_or("N/A")
        );
    }

    println!("\n리소스 확인:");
    let paths = checked_paths(config);
    let mut routes = Vec::new();
    for resource in api.list_resources(gateway_id).await? {
        if !paths.contains(resource.path.as_str()) {
            continue;
        }

        println!("\n  {}:", resource.path);
        for http_method in resource.methods.iter().filter(|m| m.as_str() != "OPTIONS") {
            let method = MethodRef::new(&resource.id, http_method);
            let target = match api.integration(gateway_id, &method).await {
                Ok(Some(integration)) => integration
                    .lambda_function()
                    .map_or(RouteTarget::Unresolved, |name| {
                        RouteTarget::Lambda(name.to_string())
                    }),
                Ok(None) => RouteTarget::NoIntegration,
                Err(e) => {
                    warn!("Could not read integration for {method}: {e:#}");
                    RouteTarget::NoIntegration
                }
            };
            println!("    {http_method}: {target}");
            routes.push(RouteStatus {
                path: resource.path.clone(),
                http_method: http_method.clone(),
                target,
            });
        }
    }

    println!("\n최근 배포 목록:");
    let recent = api
        .recent_deployments(gateway_id, RECENT_DEPLOYMENTS)
        .await?;
    for line in recent_deployment_lines(&recent, stage.deployment_id.as_deref()) {
        println!("{line}");
    }
    output::footer(NARROW);

    Ok(StageStatus {
        stage,
        current,
        routes,
        recent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    type Methods = BTreeMap<String, Option<IntegrationSummary>>;

    #[derive(Default)]
    struct FakeState {
        // resource id -> (path, method -> integration)
        resources: BTreeMap<String, (String, Methods)>,
        stage: Option<String>,
        // oldest first
        deployments: Vec<DeploymentSummary>,
        created: usize,
        stage_lags: bool,
        unreadable_resources: bool,
    }

    #[derive(Default)]
    struct FakeGateway {
        state: Mutex<FakeState>,
    }

    fn lambda_uri(function: &str) -> String {
        format!(
            "arn:aws:apigateway:us-east-2:lambda:path/2015-03-31/functions/\
             arn:aws:lambda:us-east-2:412677576136:function:{function}/invocations"
        )
    }

    impl FakeGateway {
        fn with_resource(self, id: &str, path: &str, methods: &[(&str, Option<&str>)]) -> Self {
            let methods = methods
                .iter()
                .map(|(method, integration_type)| {
                    let integration = integration_type.map(|t| IntegrationSummary {
                        integration_type: t.to_string(),
                        uri: None,
                    });
                    (method.to_string(), integration)
                })
                .collect();
            self.state
                .lock()
                .unwrap()
                .resources
                .insert(id.to_string(), (path.to_string(), methods));
            self
        }

        fn with_lambda(self, id: &str, method: &str, function: &str) -> Self {
            if let Some((_, methods)) = self.state.lock().unwrap().resources.get_mut(id) {
                methods.insert(
                    method.to_string(),
                    Some(IntegrationSummary {
                        integration_type: "AWS_PROXY".to_string(),
                        uri: Some(lambda_uri(function)),
                    }),
                );
            }
            self
        }

        fn with_stage(self, deployment_id: &str) -> Self {
            {
                let mut state = self.state.lock().unwrap();
                state.stage = Some(deployment_id.to_string());
                state.deployments.push(DeploymentSummary {
                    id: deployment_id.to_string(),
                    description: None,
                    created: None,
                });
            }
            self
        }
    }

    impl GatewayApi for FakeGateway {
        async fn list_gateways(&self) -> Result<Vec<GatewaySummary>> {
            Ok(vec![GatewaySummary {
                id: "ifeniowvpb".to_string(),
                name: "HR-Resource-Optimization-API".to_string(),
                created: None,
            }])
        }

        async fn list_resources(&self, _gateway_id: &str) -> Result<Vec<ResourceSummary>> {
            let state = self.state.lock().unwrap();
            if state.unreadable_resources {
                bail!("AccessDeniedException: apigateway:GET");
            }
            Ok(state
                .resources
                .iter()
                .map(|(id, (path, methods))| ResourceSummary {
                    id: id.clone(),
                    path: path.clone(),
                    methods: methods.keys().cloned().collect(),
                })
                .collect())
        }

        async fn integration(
            &self,
            _gateway_id: &str,
            method: &MethodRef,
        ) -> Result<Option<IntegrationSummary>> {
            let state = self.state.lock().unwrap();
            let (_, methods) = state
                .resources
                .get(&method.resource_id)
                .ok_or_else(|| anyhow!("NotFoundException: resource"))?;
            methods
                .get(&method.http_method)
                .cloned()
                .ok_or_else(|| anyhow!("NotFoundException: method"))
        }

        async fn delete_method(&self, _gateway_id: &str, method: &MethodRef) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            Ok(state
                .resources
                .get_mut(&method.resource_id)
                .and_then(|(_, methods)| methods.remove(&method.http_method))
                .is_some())
        }

        async fn create_deployment(
            &self,
            _gateway_id: &str,
            _stage: &str,
            description: &str,
        ) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            let broken = state
                .resources
                .values()
                .flat_map(|(_, methods)| methods.values())
                .any(Option::is_none);
            if broken {
                bail!("BadRequestException: No integration defined for method");
            }

            state.created += 1;
            let id = format!("dep{:03}", state.created);
            state.deployments.push(DeploymentSummary {
                id: id.clone(),
                description: Some(description.to_string()),
                created: None,
            });
            if !state.stage_lags {
                state.stage = Some(id.clone());
            }
            Ok(id)
        }

        async fn stage_deployment(&self, _gateway_id: &str, _stage: &str) -> Result<StageInfo> {
            Ok(StageInfo {
                deployment_id: self.state.lock().unwrap().stage.clone(),
                last_updated: None,
            })
        }

        async fn deployment(
            &self,
            _gateway_id: &str,
            deployment_id: &str,
        ) -> Result<DeploymentSummary> {
            let state = self.state.lock().unwrap();
            state
                .deployments
                .iter()
                .find(|d| d.id == deployment_id)
                .cloned()
                .ok_or_else(|| anyhow!("NotFoundException: deployment {deployment_id}"))
        }

        async fn recent_deployments(
            &self,
            _gateway_id: &str,
            limit: i32,
        ) -> Result<Vec<DeploymentSummary>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .deployments
                .iter()
                .rev()
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    fn config() -> Config {
        Config {
            deploy_settle_secs: 0,
            ..Config::default()
        }
    }

    fn broken_gateway() -> FakeGateway {
        FakeGateway::default()
            .with_stage("old001")
            .with_resource(
                "aync80",
                "/projects",
                &[("GET", Some("AWS_PROXY")), ("OPTIONS", Some("MOCK"))],
            )
            .with_resource("emp001", "/employees", &[("GET", Some("AWS_PROXY"))])
            .with_resource("3lged3", "/quantitative-analysis", &[("POST", None)])
            .with_resource(
                "gaa5o6",
                "/recommendations",
                &[("POST", None), ("OPTIONS", Some("MOCK"))],
            )
            .with_resource("gd4jzj", "/domain-analysis", &[("POST", None)])
            .with_resource("wrlnsl", "/qualitative-analysis", &[("POST", None)])
    }

    #[test]
    fn test_method_ref_parsing() {
        let method: MethodRef = "3lged3/post".parse().unwrap();
        assert_eq!(MethodRef::new("3lged3", "POST"), method);
        assert_eq!("3lged3/POST", method.to_string());

        assert!("3lged3".parse::<MethodRef>().is_err());
        assert!("/POST".parse::<MethodRef>().is_err());
        assert!("3lged3/".parse::<MethodRef>().is_err());
        assert!("a/b/c".parse::<MethodRef>().is_err());
    }

    #[tokio::test]
    async fn test_audit_finds_missing_integrations() {
        let api = broken_gateway();
        let missing = audit_integrations(&api, "ifeniowvpb").await.unwrap();

        let mut methods: Vec<String> = missing.iter().map(|m| m.method.to_string()).collect();
        methods.sort();
        assert_eq!(
            vec!["3lged3/POST", "gaa5o6/POST", "gd4jzj/POST", "wrlnsl/POST"],
            methods
        );
        assert!(missing.iter().any(|m| m.path == "/recommendations"));
    }

    #[tokio::test]
    async fn test_repair_treats_missing_target_as_repaired() {
        let api = broken_gateway();
        let targets = vec![MethodRef::new("3lged3", "POST"), MethodRef::new("zzzzzz", "POST")];

        let report = repair_methods(&api, "ifeniowvpb", &targets).await;
        assert_eq!(vec![MethodRef::new("3lged3", "POST")], report.deleted);
        assert_eq!(vec![MethodRef::new("zzzzzz", "POST")], report.already_missing);
        assert!(report.failed.is_empty());

        let again = repair_methods(&api, "ifeniowvpb", &targets[..1]).await;
        assert_eq!(targets[..1].to_vec(), again.already_missing);
    }

    #[tokio::test]
    async fn test_deploy_is_rejected_while_methods_are_broken() {
        let api = broken_gateway();
        let result = deploy_stage(&api, "ifeniowvpb", "prod", "test", Duration::ZERO).await;
        assert!(result.is_err());
        assert_eq!(Some("old001".to_string()), api.state.lock().unwrap().stage);
    }

    #[tokio::test]
    async fn test_repair_and_deploy() {
        let api = broken_gateway();
        let outcome = repair_and_deploy(&api, &config(), &[], "Deploy /projects endpoint only")
            .await
            .unwrap();

        assert_eq!(Some("old001".to_string()), outcome.previous_deployment_id);
        assert_eq!("dep001", outcome.deployment_id);
        assert!(outcome.advanced());

        // every remaining method has an integration
        assert!(audit_integrations(&api, "ifeniowvpb").await.unwrap().is_empty());

        let resources = api.list_resources("ifeniowvpb").await.unwrap();
        let recommendations = resources.iter().find(|r| r.id == "gaa5o6").unwrap();
        assert_eq!(vec!["OPTIONS"], recommendations.methods);
        let projects = resources.iter().find(|r| r.id == "aync80").unwrap();
        assert_eq!(vec!["GET", "OPTIONS"], projects.methods);
    }

    #[tokio::test]
    async fn test_repair_is_kept_when_deploy_fails() {
        let api = broken_gateway();
        api.state.lock().unwrap().stage_lags = true;

        assert!(
            repair_and_deploy(&api, &config(), &[], "test")
                .await
                .is_err()
        );

        let resources = api.list_resources("ifeniowvpb").await.unwrap();
        let quantitative = resources.iter().find(|r| r.id == "3lged3").unwrap();
        assert!(quantitative.methods.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_targets_are_deleted_too() {
        let api = broken_gateway();
        let extra = vec![MethodRef::new("aync80", "OPTIONS")];
        repair_and_deploy(&api, &config(), &extra, "test").await.unwrap();

        let resources = api.list_resources("ifeniowvpb").await.unwrap();
        let projects = resources.iter().find(|r| r.id == "aync80").unwrap();
        assert_eq!(vec!["GET"], projects.methods);
    }

    #[tokio::test]
    async fn test_successive_deploys_advance_the_stage() {
        let api = FakeGateway::default().with_resource(
            "emp001",
            "/employees",
            &[("GET", Some("AWS_PROXY"))],
        );

        let first = deploy_stage(&api, "ifeniowvpb", "prod", "first", Duration::ZERO)
            .await
            .unwrap();
        let second = deploy_stage(&api, "ifeniowvpb", "prod", "second", Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(None, first.previous_deployment_id);
        assert_eq!(Some(first.deployment_id.clone()), second.previous_deployment_id);
        assert_ne!(first.deployment_id, second.deployment_id);
        assert_eq!(Some(second.deployment_id.clone()), second.current_deployment_id);
    }

    #[tokio::test]
    async fn test_stage_that_did_not_advance_is_an_error() {
        let api = FakeGateway::default().with_stage("old001");
        api.state.lock().unwrap().stage_lags = true;

        assert!(
            deploy_stage(&api, "ifeniowvpb", "prod", "test", Duration::ZERO)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_enumerate_lists_five_paths_and_announces_marker() {
        let api = FakeGateway::default()
            .with_resource("r1", "/", &[])
            .with_resource("r2", "/employees", &[("GET", Some("AWS_PROXY"))])
            .with_resource("r3", "/projects", &[("GET", Some("AWS_PROXY"))])
            .with_resource("r4", "/recommendations", &[("POST", Some("AWS_PROXY"))])
            .with_resource("r5", "/quantitative-analysis", &[("POST", Some("AWS_PROXY"))])
            .with_resource("r6", "/domain-analysis", &[("POST", Some("AWS_PROXY"))]);

        let listings = enumerate_gateways(&api, &config()).await.unwrap();
        assert_eq!(1, listings.len());

        let listing = &listings[0];
        assert_eq!("ifeniowvpb", listing.gateway.id);
        assert_eq!(
            vec![
                "/",
                "/employees",
                "/projects",
                "/recommendations",
                "/quantitative-analysis"
            ],
            listing.shown_paths
        );
        // the marker sits past the listed paths and is still found
        assert!(listing.marker_found);
        assert_eq!(None, listing.error);

        let other_marker = Config {
            marker_path: "/skills".to_string(),
            ..config()
        };
        let listings = enumerate_gateways(&api, &other_marker).await.unwrap();
        assert!(!listings[0].marker_found);
    }

    #[tokio::test]
    async fn test_enumerate_reports_unreadable_resources() {
        let api = broken_gateway();
        api.state.lock().unwrap().unreadable_resources = true;

        let listings = enumerate_gateways(&api, &config()).await.unwrap();
        assert_eq!(1, listings.len());
        assert!(listings[0].shown_paths.is_empty());
        assert!(
            listings[0]
                .error
                .as_deref()
                .is_some_and(|e| e.contains("AccessDenied"))
        );
    }

    #[test]
    fn test_lambda_from_uri() {
        assert_eq!(
            Some("EmployeeEvaluation"),
            lambda_from_uri(&lambda_uri("EmployeeEvaluation"))
        );
        assert_eq!(
            Some("EmployeesList:live"),
            lambda_from_uri(
                "arn:aws:apigateway:us-east-2:lambda:path/2015-03-31/functions/\
                 arn:aws:lambda:us-east-2:412677576136:function:EmployeesList:live/invocations"
            )
        );
        assert_eq!(None, lambda_from_uri("https://example.com/backend"));
        assert_eq!(None, lambda_from_uri("function:"));
    }

    #[test]
    fn test_recent_deployment_lines_mark_current() {
        let recent = vec![
            DeploymentSummary {
                id: "dep002".to_string(),
                description: None,
                created: DateTime::<Utc>::from_timestamp(1_700_000_000, 0),
            },
            DeploymentSummary {
                id: "dep001".to_string(),
                description: None,
                created: None,
            },
        ];

        let lines = recent_deployment_lines(&recent, Some("dep002"));
        assert_eq!(
            vec![
                "  1. dep002 - 2023-11-14T22:13:20+00:00 ← 현재".to_string(),
                "  2. dep001 - N/A".to_string(),
            ],
            lines
        );

        let lines = recent_deployment_lines(&recent, None);
        assert!(lines.iter().all(|line| !line.contains("← 현재")));
    }

    #[tokio::test]
    async fn test_stage_status() {
        let api = FakeGateway::default()
            .with_stage("old001")
            .with_resource("aync80", "/projects", &[("GET", Some("AWS_PROXY"))])
            .with_resource(
                "gaa5o6",
                "/recommendations",
                &[("POST", Some("AWS_PROXY")), ("OPTIONS", Some("MOCK"))],
            )
            .with_resource("gd4jzj", "/domain-analysis", &[("POST", Some("MOCK"))])
            .with_lambda("gaa5o6", "POST", "EmployeeEvaluation")
            .with_lambda("aync80", "GET", "ProjectsList");

        deploy_stage(&api, "ifeniowvpb", "prod", "first", Duration::ZERO)
            .await
            .unwrap();
        deploy_stage(&api, "ifeniowvpb", "prod", "Deploy all endpoints", Duration::ZERO)
            .await
            .unwrap();
        let api = api.with_resource("wrlnsl", "/qualitative-analysis", &[("POST", None)]);

        let status = stage_status(&api, &config()).await.unwrap();

        assert_eq!(Some("dep002".to_string()), status.stage.deployment_id);
        let current = status.current.unwrap();
        assert_eq!("dep002", current.id);
        assert_eq!(Some("Deploy all endpoints".to_string()), current.description);

        let recent: Vec<&str> = status.recent.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(vec!["dep002", "dep001", "old001"], recent);

        // /projects is not a checked path; OPTIONS methods are skipped
        let routes: Vec<(&str, &str, RouteTarget)> = status
            .routes
            .iter()
            .map(|r| (r.path.as_str(), r.http_method.as_str(), r.target.clone()))
            .collect();
        assert_eq!(
            vec![
                (
                    "/recommendations",
                    "POST",
                    RouteTarget::Lambda("EmployeeEvaluation".to_string())
                ),
                ("/domain-analysis", "POST", RouteTarget::Unresolved),
                ("/qualitative-analysis", "POST", RouteTarget::NoIntegration),
            ],
            routes
        );
        assert_eq!("No integration", RouteTarget::NoIntegration.to_string());
        assert_eq!("N/A", RouteTarget::Unresolved.to_string());
    }

    #[tokio::test]
    async fn test_stage_status_lists_five_recent_deployments() {
        let api = FakeGateway::default().with_resource(
            "emp001",
            "/employees",
            &[("GET", Some("AWS_PROXY"))],
        );
        for i in 0..7 {
            deploy_stage(&api, "ifeniowvpb", "prod", &format!("deploy {i}"), Duration::ZERO)
                .await
                .unwrap();
        }

        let status = stage_status(&api, &config()).await.unwrap();
        assert_eq!(5, status.recent.len());
        assert_eq!("dep007", status.recent[0].id);
        assert!(status.routes.is_empty());
    }
}
