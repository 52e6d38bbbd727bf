use crate::config::Config;
use crate::output::{self, FAIL, OK, WIDE};
use anyhow::{Context, Result, anyhow};
use aws_config::SdkConfig;
use log::{debug, trace};
use serde_json::{Value, json};

pub const BEDROCK_POLICY_NAME: &str = "BedrockInvokeModelPolicy";

/// Inline policy operations on an IAM role.
#[allow(async_fn_in_trait)]
pub trait RolePolicies {
    /// Deletes the policy, returning `false` when the role had no policy of that name.
    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<bool>;

    async fn put_role_policy(&self, role_name: &str, policy_name: &str, document: &str)
    -> Result<()>;

    async fn list_role_policies(&self, role_name: &str) -> Result<Vec<String>>;
}

pub struct IamRolePolicies {
    client: aws_sdk_iam::Client,
}

impl IamRolePolicies {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_iam::Client::new(sdk_config),
        }
    }
}

impl RolePolicies for IamRolePolicies {
    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<bool> {
        match self
            .client
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_entity_exception()) =>
            {
                Ok(false)
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to delete {policy_name} from {role_name}"))
            }
        }
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<()> {
        self.client
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(document)
            .send()
            .await
            .with_context(|| format!("Failed to put {policy_name} on {role_name}"))?;
        Ok(())
    }

    async fn list_role_policies(&self, role_name: &str) -> Result<Vec<String>> {
        let mut marker = None;
        let mut policy_names = Vec::new();

        loop {
            trace!("Listing role policies for {role_name} (marker={marker:?})");

            let output = self
                .client
                .list_role_policies()
                .role_name(role_name)
                .set_marker(marker)
                .send()
                .await
                .with_context(|| format!("Failed to list inline policies for {role_name}"))?;

            policy_names.extend(output.policy_names().iter().cloned());

            marker = if output.is_truncated() {
                output.marker().map(str::to_string)
            } else {
                None
            };
            if marker.is_none() {
                break Ok(policy_names);
            }
        }
    }
}

/// The role name is the last path segment of a role ARN
/// (`arn:aws:iam::123:role/service-role/Name` -> `Name`).
pub fn role_name_from_arn(role_arn: &str) -> Result<&str> {
    role_arn
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != role_arn)
        .ok_or_else(|| anyhow!("Not a role ARN: {}", role_arn))
}

pub fn bedrock_policy_document(account_id: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": [
                    "bedrock:InvokeModel",
                    "bedrock:InvokeModelWithResponseStream"
                ],
                "Resource": [
                    "arn:aws:bedrock:*::foundation-model/*",
                    format!("arn:aws:bedrock:*:{account_id}:inference-profile/*")
                ]
            }
        ]
    })
}

pub async fn function_execution_role(
    client: &aws_sdk_lambda::Client,
    function_name: &str,
) -> Result<String> {
    let output = client
        .get_function()
        .function_name(function_name)
        .send()
        .await
        .with_context(|| format!("Failed to get function: {}", function_name))?;

    output
        .configuration()
        .and_then(|configuration| configuration.role())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Function {} has no execution role", function_name))
}

/// Replaces `policy_name` on `role_name` with `document`, then returns every inline policy on
/// the role. A failed delete is ignored; a failed put aborts.
pub async fn replace_inline_policy<P: RolePolicies>(
    policies: &P,
    role_name: &str,
    policy_name: &str,
    document: &str,
) -> Result<Vec<String>> {
    match policies.delete_role_policy(role_name, policy_name).await {
        Ok(true) => println!("  - 기존 정책 삭제됨"),
        Ok(false) => debug!("{role_name} had no {policy_name} to delete"),
        Err(e) => debug!("Ignoring failed delete of {policy_name}: {e:#}"),
    }

    policies
        .put_role_policy(role_name, policy_name, document)
        .await?;
    println!("  {OK} Bedrock 권한 추가 완료");

    policies.list_role_policies(role_name).await
}

pub async fn grant_bedrock_access(
    sdk_config: &SdkConfig,
    config: &Config,
    function_name: &str,
) -> Result<()> {
    output::banner("Lambda 실행 역할에 Bedrock 권한 추가", WIDE);

    let result = async {
        let lambda = aws_sdk_lambda::Client::new(sdk_config);
        let role_arn = function_execution_role(&lambda, function_name).await?;
        let role_name = role_name_from_arn(&role_arn)?;

        println!("\n[Lambda 함수: {function_name}]");
        println!("실행 역할: {role_name}");
        println!("역할 ARN: {role_arn}");

        let document = serde_json::to_string(&bedrock_policy_document(&config.account_id))?;

        println!("\n[정책 추가 중...]");
        println!("정책 이름: {BEDROCK_POLICY_NAME}");

        let policies = IamRolePolicies::new(sdk_config);
        let policy_names =
            replace_inline_policy(&policies, role_name, BEDROCK_POLICY_NAME, &document).await?;

        println!("\n[현재 역할의 인라인 정책 목록]");
        for policy_name in policy_names {
            println!("  - {policy_name}");
        }

        Ok::<_, anyhow::Error>(())
    }
    .await;

    if let Err(e) = &result {
        println!("\n{FAIL} 오류: {e:#}");
        return result;
    }

    println!("\n{}", output::rule(WIDE));
    println!("{OK} 권한 추가 완료!");
    println!("{}", output::rule(WIDE));

    Ok(())
}
