//! Synthesizes the deployment's resource graph from a stack configuration.
//!
//! Resources are emitted leaf-first in four layers: network, compute,
//! routing, and pipeline. The single [`OriginVerify`] value is threaded into
//! both the gating listener rule and the distribution's origin headers.

use crate::{
    graph::{GraphError, Layer, Resource, ResourceGraph, ResourceId},
    listener::{Listener, Priority},
    HeaderName, OriginVerify, DEFAULT_ORIGIN_HEADER, DEFAULT_SECRET_LENGTH,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct StackConfig {
    pub name: String,
    pub network: NetworkConfig,
    pub service: ServiceConfig,
    pub gate: GateConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub max_azs: u8,
    pub cidr_mask: u8,
    pub nat_gateways: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub container_name: String,
    pub container_port: u16,
    /// The image the service runs before the first pipeline deploy.
    pub image: String,
    pub cpu: u32,
    pub memory_mib: u32,
    pub cpu_architecture: String,
    pub desired_count: u32,
    pub health_check_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GateConfig {
    pub header_name: String,
    pub secret_length: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub repository_name: String,
    pub image_tag: String,
    pub bundle_key: String,
    pub build_image: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("gate.secretLength must be at least 1")]
    EmptySecret,

    #[error("invalid gate.headerName {0:?}")]
    InvalidHeaderName(String),
}

/// A synthesized deployment: its resources in provisioning order, plus
/// named outputs.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub name: String,
    pub resources: ResourceGraph,
    pub outputs: BTreeMap<String, Value>,
}

// === impl StackConfig ===

impl StackConfig {
    /// Rejects settings that would produce an unusable gate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gate.secret_length == 0 {
            return Err(ConfigError::EmptySecret);
        }
        if self.gate.header_name.parse::<HeaderName>().is_err() {
            return Err(ConfigError::InvalidHeaderName(self.gate.header_name.clone()));
        }
        Ok(())
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "frontdoor".to_string(),
            network: NetworkConfig::default(),
            service: ServiceConfig::default(),
            gate: GateConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_azs: 2,
            cidr_mask: 24,
            nat_gateways: 0,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            container_name: "cdk-codebuild".to_string(),
            container_port: 80,
            image: "public.ecr.aws/nginx/nginx:latest-arm64v8".to_string(),
            cpu: 2048,
            memory_mib: 4096,
            cpu_architecture: "ARM64".to_string(),
            desired_count: 1,
            health_check_path: "/".to_string(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            header_name: DEFAULT_ORIGIN_HEADER.to_string(),
            secret_length: DEFAULT_SECRET_LENGTH,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repository_name: "docker-codebuild".to_string(),
            image_tag: "latest".to_string(),
            bundle_key: "source.zip".to_string(),
            build_image: "aws/codebuild/amazonlinux2-aarch64-standard:3.0".to_string(),
        }
    }
}

// === impl Stack ===

impl Stack {
    pub fn synthesize(config: &StackConfig, verify: &OriginVerify) -> Result<Self, GraphError> {
        let mut graph = ResourceGraph::default();

        let net = network(&mut graph, &config.network, config.service.container_port)?;
        let ecs = compute(&mut graph, config, &net, verify)?;
        let distribution = routing(&mut graph, &ecs, verify)?;
        pipeline(&mut graph, config, &ecs)?;

        let mut outputs = BTreeMap::new();
        outputs.insert(
            "distributionDomainName".to_string(),
            attribute(&distribution, "DomainName"),
        );
        Ok(Self {
            name: config.name.clone(),
            resources: graph,
            outputs,
        })
    }
}

struct Network {
    vpc: ResourceId,
    alb_sg: ResourceId,
}

struct Compute {
    alb: ResourceId,
    service: ResourceId,
}

fn network(
    graph: &mut ResourceGraph,
    config: &NetworkConfig,
    port: u16,
) -> Result<Network, GraphError> {
    const SCOPE: &str = "vpcResources";

    let vpc = graph.add(
        Resource::new(ResourceId::new(SCOPE, "vpc"), "AWS::EC2::VPC", Layer::Network)
            .with_properties(json!({
                "maxAzs": config.max_azs,
                "natGateways": config.nat_gateways,
                "subnetConfiguration": [{
                    "name": "public",
                    "subnetType": "PUBLIC",
                    "cidrMask": config.cidr_mask,
                }],
            })),
    )?;

    let alb_sg = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "albSecurityGroup"),
            "AWS::EC2::SecurityGroup",
            Layer::Network,
        )
        .depends_on([&vpc])
        .with_properties(json!({
            "vpc": reference(&vpc),
            "allowAllOutbound": true,
            "ingress": [{ "peer": "0.0.0.0/0", "port": port }],
        })),
    )?;

    Ok(Network { vpc, alb_sg })
}

fn compute(
    graph: &mut ResourceGraph,
    config: &StackConfig,
    net: &Network,
    verify: &OriginVerify,
) -> Result<Compute, GraphError> {
    const SCOPE: &str = "ecsResources";
    let svc = &config.service;

    let cluster = graph.add(
        Resource::new(ResourceId::new(SCOPE, "cluster"), "AWS::ECS::Cluster", Layer::Compute)
            .depends_on([&net.vpc])
            .with_properties(json!({ "vpc": reference(&net.vpc) })),
    )?;

    let task_role = graph.add(
        Resource::new(ResourceId::new(SCOPE, "taskRole"), "AWS::IAM::Role", Layer::Compute)
            .with_properties(json!({
                "assumedBy": "ecs-tasks.amazonaws.com",
                "managedPolicies": ["service-role/AWSLambdaBasicExecutionRole"],
            })),
    )?;

    let task_def = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "taskDefinition"),
            "AWS::ECS::TaskDefinition",
            Layer::Compute,
        )
        .depends_on([&task_role])
        .with_properties(json!({
            "cpu": svc.cpu,
            "memoryLimitMiB": svc.memory_mib,
            "runtimePlatform": {
                "operatingSystemFamily": "LINUX",
                "cpuArchitecture": svc.cpu_architecture,
            },
            "taskRole": reference(&task_role),
            "executionRolePolicy": [{
                "resources": ["*"],
                "actions": [
                    "ecr:GetAuthorizationToken",
                    "ecr:BatchCheckLayerAvailability",
                    "ecr:GetDownloadUrlForLayer",
                    "ecr:BatchGetImage",
                    "logs:CreateLogStream",
                    "logs:PutLogEvents",
                ],
            }],
            "containers": [{
                "name": svc.container_name,
                "image": svc.image,
                "portMappings": [{
                    "containerPort": svc.container_port,
                    "hostPort": svc.container_port,
                }],
                "logging": { "driver": "awslogs", "streamPrefix": svc.container_name },
                "healthCheck": {
                    "command": ["CMD-SHELL", "curl -f http://localhost/"],
                },
            }],
        })),
    )?;

    let service_sg = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "serviceSecurityGroup"),
            "AWS::EC2::SecurityGroup",
            Layer::Compute,
        )
        .depends_on([&net.vpc, &net.alb_sg])
        .with_properties(json!({
            "vpc": reference(&net.vpc),
            "allowAllOutbound": true,
            "ingress": [{ "peer": reference(&net.alb_sg), "port": svc.container_port }],
        })),
    )?;

    let service = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "fargateService"),
            "AWS::ECS::Service",
            Layer::Compute,
        )
        .depends_on([&cluster, &task_def, &service_sg])
        .with_properties(json!({
            "cluster": reference(&cluster),
            "taskDefinition": reference(&task_def),
            "desiredCount": svc.desired_count,
            "assignPublicIp": true,
            "securityGroups": [reference(&service_sg)],
        })),
    )?;

    let alb = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "loadBalancer"),
            "AWS::ElasticLoadBalancingV2::LoadBalancer",
            Layer::Compute,
        )
        .depends_on([&net.vpc, &net.alb_sg])
        .with_properties(json!({
            "vpc": reference(&net.vpc),
            "internetFacing": true,
            "securityGroup": reference(&net.alb_sg),
        })),
    )?;

    let target_group = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "targetGroup"),
            "AWS::ElasticLoadBalancingV2::TargetGroup",
            Layer::Compute,
        )
        .depends_on([&net.vpc, &service])
        .with_properties(json!({
            "vpc": reference(&net.vpc),
            "port": svc.container_port,
            "protocol": "HTTP",
            "targetType": "IP",
            "targets": [reference(&service)],
            "healthCheck": {
                "path": svc.health_check_path,
                "port": svc.container_port.to_string(),
            },
        })),
    )?;

    let listener = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "listener"),
            "AWS::ElasticLoadBalancingV2::Listener",
            Layer::Compute,
        )
        .depends_on([&alb])
        .with_properties(json!({
            "loadBalancer": reference(&alb),
            "port": 80,
            "protocol": "HTTP",
            "defaultAction": {
                "type": "fixedResponse",
                "status": 403,
                "contentType": "text/plain",
                "body": "Forbidden",
            },
        })),
    )?;

    graph.add(
        Resource::new(
            ResourceId::new(SCOPE, Listener::ORIGIN_GATE_RULE),
            "AWS::ElasticLoadBalancingV2::ListenerRule",
            Layer::Compute,
        )
        .depends_on([&listener, &target_group])
        .with_properties(json!({
            "listener": reference(&listener),
            "priority": Priority::HIGHEST.get(),
            "conditions": [{
                "type": "httpHeader",
                "name": verify.header_name().as_str(),
                "values": [verify.secret().as_str()],
            }],
            "action": { "type": "forward", "targetGroup": reference(&target_group) },
        })),
    )?;

    Ok(Compute { alb, service })
}

fn routing(
    graph: &mut ResourceGraph,
    compute: &Compute,
    verify: &OriginVerify,
) -> Result<ResourceId, GraphError> {
    graph.add(
        Resource::new(
            ResourceId::new("distributionResources", "distribution"),
            "AWS::CloudFront::Distribution",
            Layer::Routing,
        )
        .depends_on([&compute.alb])
        .with_properties(json!({
            "defaultBehavior": {
                "origin": {
                    "loadBalancer": attribute(&compute.alb, "DNSName"),
                    "protocolPolicy": "http-only",
                    "customHeaders": {
                        verify.header_name().as_str(): verify.secret().as_str(),
                    },
                },
                "viewerProtocolPolicy": "redirect-to-https",
                "allowedMethods": "ALL",
                "cachePolicy": "CACHING_DISABLED",
                "originRequestPolicy": "ALL_VIEWER",
            },
        })),
    )
}

fn pipeline(
    graph: &mut ResourceGraph,
    config: &StackConfig,
    compute: &Compute,
) -> Result<ResourceId, GraphError> {
    const SCOPE: &str = "pipelineResources";
    let cfg = &config.pipeline;

    let repository = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "repository"),
            "AWS::ECR::Repository",
            Layer::Pipeline,
        )
        .with_properties(json!({
            "repositoryName": cfg.repository_name,
            "imageScanOnPush": true,
            "removalPolicy": "DESTROY",
            "emptyOnDelete": true,
        })),
    )?;

    let bundle = graph.add(
        Resource::new(ResourceId::new(SCOPE, "sourceBundle"), "AWS::S3::Object", Layer::Pipeline)
            .with_properties(json!({ "key": cfg.bundle_key })),
    )?;

    let role = graph.add(
        Resource::new(ResourceId::new(SCOPE, "buildRole"), "AWS::IAM::Role", Layer::Pipeline)
            .depends_on([&repository, &bundle])
            .with_properties(json!({
                "assumedBy": "codebuild.amazonaws.com",
                "grants": [
                    { "push": reference(&repository) },
                    { "actions": ["s3:GetObject"], "resource": reference(&bundle) },
                ],
            })),
    )?;

    let project = graph.add(
        Resource::new(
            ResourceId::new(SCOPE, "buildProject"),
            "AWS::CodeBuild::Project",
            Layer::Pipeline,
        )
        .depends_on([&role, &repository])
        .with_properties(json!({
            "role": reference(&role),
            "environment": {
                "buildImage": cfg.build_image,
                "privileged": true,
            },
            "environmentVariables": {
                "AWS_DEFAULT_REGION": { "pseudo": "AWS::Region" },
                "AWS_ACCOUNT_ID": { "pseudo": "AWS::AccountId" },
                "IMAGE_REPO_NAME": cfg.repository_name,
                "IMAGE_REPO_URI": attribute(&repository, "RepositoryUri"),
                "IMAGE_TAG": cfg.image_tag,
            },
            "artifacts": ["imagedefinitions.json"],
        })),
    )?;

    let service = &compute.service;
    graph.add(
        Resource::new(ResourceId::new(SCOPE, "pipeline"), "AWS::CodePipeline::Pipeline", Layer::Pipeline)
            .depends_on([&bundle, &project, service])
            .with_properties(json!({
                "stages": [
                    {
                        "name": "source",
                        "action": { "type": "s3Source", "bucketKey": cfg.bundle_key, "trigger": "EVENTS" },
                    },
                    {
                        "name": "build",
                        "action": { "type": "codeBuild", "project": reference(&project) },
                    },
                    {
                        "name": "deploy",
                        "action": { "type": "ecsDeploy", "service": reference(service) },
                    },
                ],
            })),
    )
}

fn reference(id: &ResourceId) -> Value {
    json!({ "ref": id })
}

fn attribute(id: &ResourceId, name: &str) -> Value {
    json!({ "ref": id, "attribute": name })
}
