//! `aws` CLI adapter.
//!
//! Every call runs `aws <service> <operation> ... --output json` and
//! deserializes the response. The response shapes below cover only the
//! fields Duplex reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use duplex_core::config::PricingConfig;
use duplex_core::ports::{
    ArtifactRegistry, CompanionRestarter, PricingSource, ResourceQuery, TrafficHealthQuery,
};
use duplex_core::*;

use crate::process::{self, CommandSpec};

// ── Response shapes ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AutoScalingGroupsResponse {
    auto_scaling_groups: Vec<AutoScalingGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AutoScalingGroup {
    auto_scaling_group_name: String,
    desired_capacity: u32,
    min_size: u32,
    max_size: u32,
    #[serde(default)]
    instances: Vec<GroupInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupInstance {
    instance_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstancesResponse {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    instance_type: String,
    /// Absent for on-demand instances.
    instance_lifecycle: Option<String>,
    state: InstanceState,
    launch_time: DateTime<Utc>,
    placement: Placement,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Placement {
    availability_zone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetHealthResponse {
    target_health_descriptions: Vec<TargetHealthDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetHealthDescription {
    target: Target,
    target_health: TargetHealthBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Target {
    id: String,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetHealthBody {
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpotPriceResponse {
    spot_price_history: Vec<SpotPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpotPrice {
    spot_price: String,
}

/// ECR answers in camelCase.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagesResponse {
    #[serde(default)]
    image_details: Vec<ImageDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageDetail {
    image_digest: Option<String>,
}

// ── Parsing ────────────────────────────────────────────────────────

fn decode<T: DeserializeOwned>(what: &str, json: &str) -> InfraResult<T> {
    serde_json::from_str(json).map_err(|e| InfraError::Parse {
        what: what.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn parse_group(json: &str) -> InfraResult<Option<GroupInfo>> {
    let response: AutoScalingGroupsResponse = decode("describe-auto-scaling-groups", json)?;
    Ok(response.auto_scaling_groups.into_iter().next().map(|g| GroupInfo {
        name: g.auto_scaling_group_name,
        capacity: Capacity {
            desired: g.desired_capacity,
            min: g.min_size,
            max: g.max_size,
        },
        instance_ids: g.instances.into_iter().map(|i| i.instance_id).collect(),
    }))
}

pub(crate) fn parse_instances(json: &str) -> InfraResult<Vec<InstanceInfo>> {
    let response: InstancesResponse = decode("describe-instances", json)?;
    Ok(response
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .map(|i| InstanceInfo {
            id: i.instance_id,
            instance_type: i.instance_type,
            lifecycle: match i.instance_lifecycle.as_deref() {
                Some("spot") => Lifecycle::Spot,
                _ => Lifecycle::OnDemand,
            },
            state: i.state.name,
            launch_time: i.launch_time,
            zone: i.placement.availability_zone,
        })
        .collect())
}

pub(crate) fn parse_target_health(json: &str) -> InfraResult<Vec<TargetHealth>> {
    let response: TargetHealthResponse = decode("describe-target-health", json)?;
    let health = response
        .target_health_descriptions
        .into_iter()
        .map(|d| {
            // An unrecognised state is never settled; it must not fail the
            // whole sample.
            let state = d
                .target_health
                .state
                .parse::<TargetHealthState>()
                .unwrap_or_else(|message| {
                    warn!(target_id = %d.target.id, %message, "treating target as unhealthy");
                    TargetHealthState::Unhealthy
                });
            TargetHealth {
                target_id: d.target.id,
                port: d.target.port,
                state,
            }
        })
        .collect();
    Ok(health)
}

/// Latest spot price, `None` when the history is empty.
pub(crate) fn parse_spot_price(json: &str) -> InfraResult<Option<f64>> {
    let response: SpotPriceResponse = decode("describe-spot-price-history", json)?;
    response
        .spot_price_history
        .first()
        .map(|p| {
            p.spot_price.parse::<f64>().map_err(|e| InfraError::Parse {
                what: "describe-spot-price-history".to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

/// An image counts only once it has a digest.
pub(crate) fn parse_image_exists(json: &str) -> InfraResult<bool> {
    let response: ImagesResponse = decode("describe-images", json)?;
    Ok(response
        .image_details
        .first()
        .is_some_and(|d| d.image_digest.is_some()))
}

// ── Client ─────────────────────────────────────────────────────────

/// Thin wrapper over the `aws` binary.
#[derive(Debug, Clone)]
pub struct AwsCli {
    binary: String,
    region: String,
    profile: Option<String>,
    pricing: PricingConfig,
}

impl AwsCli {
    pub fn new(region: &str) -> Self {
        Self {
            binary: "aws".to_string(),
            region: region.to_string(),
            profile: None,
            pricing: PricingConfig::default(),
        }
    }

    pub fn from_config(config: &DuplexConfig) -> Self {
        let aws = Self::new(config.region()).with_pricing(config.pricing.clone());
        match config.profile.as_deref() {
            Some(profile) => aws.with_profile(profile),
            None => aws,
        }
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    pub fn with_pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    pub(crate) fn command(&self, service: &str, operation: &str, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.binary)
            .args([service, operation])
            .args(args.iter().copied())
            .args(["--region", self.region.as_str(), "--output", "json"]);
        if let Some(profile) = &self.profile {
            spec = spec.args(["--profile", profile.as_str()]);
        }
        spec
    }

    /// Run an operation and return stdout; non-zero exit is an error.
    async fn call(&self, service: &str, operation: &str, args: &[&str]) -> InfraResult<String> {
        let spec = self.command(service, operation, args);
        let output = process::check(&spec, process::run(&spec, None).await?)?;
        Ok(output.stdout)
    }

    async fn terminate(&self, instance_id: &str) -> InfraResult<()> {
        self.call("ec2", "terminate-instances", &["--instance-ids", instance_id])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceQuery for AwsCli {
    async fn describe_group(&self, group: &str) -> InfraResult<Option<GroupInfo>> {
        let json = self
            .call(
                "autoscaling",
                "describe-auto-scaling-groups",
                &["--auto-scaling-group-names", group],
            )
            .await?;
        parse_group(&json)
    }

    async fn describe_instances(&self, ids: &[String]) -> InfraResult<Vec<InstanceInfo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["--instance-ids"];
        args.extend(ids.iter().map(String::as_str));
        let json = self.call("ec2", "describe-instances", &args).await?;
        parse_instances(&json)
    }
}

#[async_trait]
impl TrafficHealthQuery for AwsCli {
    async fn target_health(&self, target: &str) -> InfraResult<Vec<TargetHealth>> {
        let json = self
            .call("elbv2", "describe-target-health", &["--target-group-arn", target])
            .await?;
        parse_target_health(&json)
    }
}

#[async_trait]
impl PricingSource for AwsCli {
    async fn hourly_cost(&self, instance: &InstanceInfo) -> InfraResult<f64> {
        match instance.lifecycle {
            Lifecycle::OnDemand => Ok(self.pricing.on_demand(&instance.instance_type)),
            Lifecycle::Spot => {
                let json = self
                    .call(
                        "ec2",
                        "describe-spot-price-history",
                        &[
                            "--instance-types",
                            instance.instance_type.as_str(),
                            "--product-descriptions",
                            "Linux/UNIX",
                            "--availability-zone",
                            instance.zone.as_str(),
                            "--max-items",
                            "1",
                        ],
                    )
                    .await?;
                Ok(parse_spot_price(&json)?.unwrap_or(0.0))
            }
        }
    }
}

#[async_trait]
impl ArtifactRegistry for AwsCli {
    async fn artifact_exists(&self, repository: &str, tag: &str) -> InfraResult<bool> {
        let image_id = format!("imageTag={tag}");
        let spec = self.command(
            "ecr",
            "describe-images",
            &["--repository-name", repository, "--image-ids", image_id.as_str()],
        );
        let output = process::run(&spec, None).await?;
        if !output.success() && output.stderr.contains("ImageNotFoundException") {
            debug!(repository, tag, "image not found");
            return Ok(false);
        }
        parse_image_exists(&process::check(&spec, output)?.stdout)
    }
}

/// Singleton scheduler companion, restarted by terminating its instance
/// so the group replaces it with one running the new image.
#[derive(Debug, Clone)]
pub struct CompanionGroup {
    aws: AwsCli,
    group: String,
}

impl CompanionGroup {
    pub fn new(aws: AwsCli, group: &str) -> Self {
        Self {
            aws,
            group: group.to_string(),
        }
    }
}

#[async_trait]
impl CompanionRestarter for CompanionGroup {
    async fn restart(&self) -> InfraResult<CompanionRestart> {
        let Some(instance_id) = self
            .aws
            .describe_group(&self.group)
            .await?
            .and_then(|g| g.instance_ids.into_iter().next())
        else {
            return Ok(CompanionRestart::NotFound);
        };

        self.aws.terminate(&instance_id).await?;
        info!(group = %self.group, instance = %instance_id, "companion instance terminated");
        Ok(CompanionRestart::Restarted { instance_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_group_capacity_and_instances() {
        let json = r#"{
            "AutoScalingGroups": [{
                "AutoScalingGroupName": "app-prod-asg-green",
                "DesiredCapacity": 2,
                "MinSize": 1,
                "MaxSize": 4,
                "Instances": [
                    {"InstanceId": "i-0a", "LifecycleState": "InService"},
                    {"InstanceId": "i-0b", "LifecycleState": "Pending"}
                ]
            }]
        }"#;
        let group = parse_group(json).unwrap().unwrap();
        assert_eq!(group.capacity, Capacity { desired: 2, min: 1, max: 4 });
        assert_eq!(group.instance_ids, ["i-0a", "i-0b"]);
    }

    #[test]
    fn empty_group_list_is_missing() {
        assert_eq!(parse_group(r#"{"AutoScalingGroups": []}"#).unwrap(), None);
    }

    #[test]
    fn parses_instances_across_reservations() {
        let json = r#"{
            "Reservations": [
                {"Instances": [{
                    "InstanceId": "i-0a",
                    "InstanceType": "t3.micro",
                    "State": {"Code": 16, "Name": "running"},
                    "LaunchTime": "2025-03-01T10:00:00+00:00",
                    "Placement": {"AvailabilityZone": "us-east-1a"}
                }]},
                {"Instances": [{
                    "InstanceId": "i-0b",
                    "InstanceType": "t3.small",
                    "InstanceLifecycle": "spot",
                    "State": {"Code": 0, "Name": "pending"},
                    "LaunchTime": "2025-03-01T11:30:00.000Z",
                    "Placement": {"AvailabilityZone": "us-east-1b"}
                }]}
            ]
        }"#;
        let instances = parse_instances(json).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].lifecycle, Lifecycle::OnDemand);
        assert_eq!(instances[1].lifecycle, Lifecycle::Spot);
        assert_eq!(instances[1].state, "pending");
        assert_eq!(instances[1].zone, "us-east-1b");
    }

    #[test]
    fn parses_target_health_states() {
        let json = r#"{
            "TargetHealthDescriptions": [
                {"Target": {"Id": "i-0a", "Port": 8000}, "TargetHealth": {"State": "healthy"}},
                {"Target": {"Id": "i-0b", "Port": 8000}, "TargetHealth": {"State": "initial", "Reason": "Elb.RegistrationInProgress"}},
                {"Target": {"Id": "i-0c"}, "TargetHealth": {"State": "unused"}}
            ]
        }"#;
        let health = parse_target_health(json).unwrap();
        let states: Vec<_> = health.iter().map(|h| h.state).collect();
        assert_eq!(
            states,
            [
                TargetHealthState::Healthy,
                TargetHealthState::Initial,
                TargetHealthState::Unused
            ]
        );
        assert_eq!(health[2].port, None);
    }

    #[test]
    fn draining_after_failed_checks_is_draining() {
        let json = r#"{"TargetHealthDescriptions": [
            {"Target": {"Id": "i-0a", "Port": 8000}, "TargetHealth": {"State": "healthy"}},
            {"Target": {"Id": "i-0b", "Port": 8000}, "TargetHealth": {"State": "unhealthy.draining", "Reason": "Target.DeregistrationInProgress"}}
        ]}"#;
        let health = parse_target_health(json).unwrap();
        assert_eq!(health[0].state, TargetHealthState::Healthy);
        assert_eq!(health[1].state, TargetHealthState::Draining);
    }

    #[test]
    fn unknown_health_state_counts_as_unhealthy() {
        let json = r#"{"TargetHealthDescriptions": [
            {"Target": {"Id": "i-0a"}, "TargetHealth": {"State": "sideways"}}
        ]}"#;
        let health = parse_target_health(json).unwrap();
        assert_eq!(health[0].state, TargetHealthState::Unhealthy);
    }

    #[test]
    fn parses_spot_price() {
        let json = r#"{"SpotPriceHistory": [{"SpotPrice": "0.003100", "InstanceType": "t3.micro"}]}"#;
        assert_eq!(parse_spot_price(json).unwrap(), Some(0.0031));
        assert_eq!(parse_spot_price(r#"{"SpotPriceHistory": []}"#).unwrap(), None);
    }

    #[test]
    fn image_needs_digest() {
        assert!(parse_image_exists(r#"{"imageDetails": [{"imageDigest": "sha256:ab"}]}"#).unwrap());
        assert!(!parse_image_exists(r#"{"imageDetails": [{}]}"#).unwrap());
        assert!(!parse_image_exists(r#"{"imageDetails": []}"#).unwrap());
    }

    #[test]
    fn command_carries_region_and_profile() {
        let aws = AwsCli::new("eu-west-1").with_profile("prod");
        let spec = aws.command("elbv2", "describe-target-health", &["--target-group-arn", "arn:tg"]);
        assert_eq!(
            spec.to_string(),
            "aws elbv2 describe-target-health --target-group-arn arn:tg --region eu-west-1 --output json --profile prod"
        );
    }

    #[test]
    fn configured_profile_reaches_every_command() {
        let config = DuplexConfig::from_toml(
            r#"
region = "eu-central-1"
profile = "prod"

[environments.blue]
group = "prod-blue"
[environments.green]
group = "prod-green"
"#,
        )
        .unwrap();
        let spec = AwsCli::from_config(&config).command("ecr", "describe-images", &[]);
        assert!(spec.to_string().ends_with("--region eu-central-1 --output json --profile prod"));
    }

    #[tokio::test]
    async fn on_demand_price_comes_from_config() {
        let mut pricing = PricingConfig::default();
        pricing.on_demand_hourly.insert("t3.small".to_string(), 0.0208);
        let aws = AwsCli::new("us-east-1").with_pricing(pricing);

        let instance = |instance_type: &str| InstanceInfo {
            id: "i-0a".to_string(),
            instance_type: instance_type.to_string(),
            lifecycle: Lifecycle::OnDemand,
            state: "running".to_string(),
            launch_time: Utc::now(),
            zone: "us-east-1a".to_string(),
        };
        assert_eq!(aws.hourly_cost(&instance("t3.small")).await.unwrap(), 0.0208);
        assert_eq!(aws.hourly_cost(&instance("t3.micro")).await.unwrap(), 0.0094);
    }
}
