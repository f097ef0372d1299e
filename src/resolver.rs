use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, ReplicationController, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{Api, Client};
use regex::Regex;
use tracing::debug;

use crate::errors::Error;
use crate::utils::parse_labels;

/// Upper bound on scale-target indirections before giving up.
const MAX_INDIRECTIONS: usize = 8;

/// How the watch loop decides which pods belong to the tail set. Exactly
/// one criterion is ever active.
#[derive(Debug, Clone)]
pub enum SelectorSpec {
    /// Client-side match on the pod name.
    NameRegex(Regex),
    /// Server-side label query.
    LabelQuery(BTreeMap<String, String>),
}

/// Resource kinds the `TYPE NAME` target form understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Service,
    ReplicationController,
    Deployment,
    DaemonSet,
    StatefulSet,
    ReplicaSet,
    Job,
    CronJob,
    HorizontalPodAutoscaler,
}

impl ResourceKind {
    /// Accepts the canonical kind, its plural and the usual short alias,
    /// case-insensitively.
    pub fn parse(token: &str) -> Option<Self> {
        use ResourceKind::*;
        let kind = match token.to_ascii_lowercase().as_str() {
            "po" | "pod" | "pods" => Pod,
            "svc" | "service" | "services" => Service,
            "rc" | "replicationcontroller" | "replicationcontrollers" => ReplicationController,
            "deploy" | "deployment" | "deployments" => Deployment,
            "ds" | "daemonset" | "daemonsets" => DaemonSet,
            "sts" | "statefulset" | "statefulsets" => StatefulSet,
            "rs" | "replicaset" | "replicasets" => ReplicaSet,
            "job" | "jobs" => Job,
            "cj" | "cronjob" | "cronjobs" => CronJob,
            "hpa" | "horizontalpodautoscaler" | "horizontalpodautoscalers" => {
                HorizontalPodAutoscaler
            }
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Service => "service",
            ResourceKind::ReplicationController => "replicationcontroller",
            ResourceKind::Deployment => "deployment",
            ResourceKind::DaemonSet => "daemonset",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::ReplicaSet => "replicaset",
            ResourceKind::Job => "job",
            ResourceKind::CronJob => "cronjob",
            ResourceKind::HorizontalPodAutoscaler => "horizontalpodautoscaler",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete object fetched during resolution, one variant per supported
/// kind.
#[derive(Debug, Clone)]
pub enum Workload {
    Pod(Box<Pod>),
    Service(Box<Service>),
    ReplicationController(Box<ReplicationController>),
    Deployment(Box<Deployment>),
    DaemonSet(Box<DaemonSet>),
    StatefulSet(Box<StatefulSet>),
    ReplicaSet(Box<ReplicaSet>),
    Job(Box<Job>),
    CronJob(Box<CronJob>),
    Autoscaler(Box<HorizontalPodAutoscaler>),
}

/// One reduction step: either the final selector, or another reference to
/// chase (autoscalers delegate to their scale target).
pub enum Step {
    Selector(SelectorSpec),
    Follow { kind: ResourceKind, name: String },
}

trait HasMatchSelector {
    fn match_selector(&self) -> Option<&LabelSelector>;
}

impl HasMatchSelector for Deployment {
    fn match_selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl HasMatchSelector for StatefulSet {
    fn match_selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl HasMatchSelector for DaemonSet {
    fn match_selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl HasMatchSelector for ReplicaSet {
    fn match_selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl HasMatchSelector for Job {
    fn match_selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().and_then(|s| s.selector.as_ref())
    }
}

fn match_labels_of<T: HasMatchSelector>(
    resource: &T,
    kind: ResourceKind,
    name: &str,
) -> Result<BTreeMap<String, String>, Error> {
    resource
        .match_selector()
        .and_then(|selector| selector.match_labels.clone())
        .filter(|labels| !labels.is_empty())
        .ok_or_else(|| Error::InvalidSelector {
            kind: kind.as_str(),
            name: name.to_string(),
        })
}

fn label_query(
    labels: Option<BTreeMap<String, String>>,
    kind: ResourceKind,
    name: &str,
) -> Result<Step, Error> {
    labels
        .filter(|labels| !labels.is_empty())
        .map(|labels| Step::Selector(SelectorSpec::LabelQuery(labels)))
        .ok_or_else(|| Error::InvalidSelector {
            kind: kind.as_str(),
            name: name.to_string(),
        })
}

fn matched(labels: BTreeMap<String, String>) -> Result<Step, Error> {
    Ok(Step::Selector(SelectorSpec::LabelQuery(labels)))
}

/// Map a fetched object to its pod-matching criterion. Pure; the fetch loop
/// in [`resolve_reference`] drives it.
pub fn reduce(kind: ResourceKind, name: &str, workload: &Workload) -> Result<Step, Error> {
    match workload {
        Workload::Pod(pod) => {
            let pod_name = pod.metadata.name.as_deref().unwrap_or(name);
            let pattern = format!("^{}$", regex::escape(pod_name));
            let regex = Regex::new(&pattern).map_err(|source| Error::InvalidPattern {
                pattern,
                source,
            })?;
            Ok(Step::Selector(SelectorSpec::NameRegex(regex)))
        }
        Workload::Service(service) => label_query(
            service.spec.as_ref().and_then(|s| s.selector.clone()),
            kind,
            name,
        ),
        Workload::ReplicationController(rc) => label_query(
            rc.spec.as_ref().and_then(|s| s.selector.clone()),
            kind,
            name,
        ),
        Workload::Deployment(deployment) => {
            matched(match_labels_of(deployment.as_ref(), kind, name)?)
        }
        Workload::DaemonSet(daemonset) => matched(match_labels_of(daemonset.as_ref(), kind, name)?),
        Workload::StatefulSet(statefulset) => {
            matched(match_labels_of(statefulset.as_ref(), kind, name)?)
        }
        Workload::ReplicaSet(replicaset) => {
            matched(match_labels_of(replicaset.as_ref(), kind, name)?)
        }
        Workload::Job(job) => matched(match_labels_of(job.as_ref(), kind, name)?),
        Workload::CronJob(cronjob) => {
            // A cron job has no selector of its own; its pods carry the job
            // template's labels.
            let labels = cronjob
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .and_then(|job| job.template.metadata.as_ref())
                .and_then(|meta| meta.labels.clone());
            label_query(labels, kind, name)
        }
        Workload::Autoscaler(hpa) => {
            let target = hpa
                .spec
                .as_ref()
                .map(|s| &s.scale_target_ref)
                .ok_or_else(|| Error::InvalidSelector {
                    kind: kind.as_str(),
                    name: name.to_string(),
                })?;
            let target_kind = ResourceKind::parse(&target.kind)
                .ok_or_else(|| Error::UnsupportedResourceKind(target.kind.clone()))?;
            Ok(Step::Follow {
                kind: target_kind,
                name: target.name.clone(),
            })
        }
    }
}

/// Fetches one namespaced object per supported kind. Implemented on the
/// cluster client; tests substitute a map-backed fake.
pub trait ObjectFetcher {
    async fn fetch(&self, kind: ResourceKind, name: &str) -> Result<Workload, Error>;
}

pub struct ClusterFetcher {
    client: Client,
    namespace: String,
}

impl ClusterFetcher {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    async fn get<T>(&self, kind: ResourceKind, name: &str) -> Result<T, Error>
    where
        T: k8s_openapi::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + k8s_openapi::Metadata<Ty = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta>
            + serde::de::DeserializeOwned
            + serde::Serialize
            + Clone
            + fmt::Debug
            + Send
            + Sync,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), &self.namespace);
        api.get(name).await.map_err(|err| match err {
            kube::Error::Api(ref response) if response.code == 404 => Error::ResourceNotFound {
                kind: kind.as_str(),
                name: name.to_string(),
            },
            other => Error::ResolutionFailed {
                target: format!("{kind} {name}"),
                detail: other.to_string(),
            },
        })
    }
}

impl ObjectFetcher for ClusterFetcher {
    async fn fetch(&self, kind: ResourceKind, name: &str) -> Result<Workload, Error> {
        let workload = match kind {
            ResourceKind::Pod => Workload::Pod(Box::new(self.get(kind, name).await?)),
            ResourceKind::Service => Workload::Service(Box::new(self.get(kind, name).await?)),
            ResourceKind::ReplicationController => {
                Workload::ReplicationController(Box::new(self.get(kind, name).await?))
            }
            ResourceKind::Deployment => Workload::Deployment(Box::new(self.get(kind, name).await?)),
            ResourceKind::DaemonSet => Workload::DaemonSet(Box::new(self.get(kind, name).await?)),
            ResourceKind::StatefulSet => {
                Workload::StatefulSet(Box::new(self.get(kind, name).await?))
            }
            ResourceKind::ReplicaSet => Workload::ReplicaSet(Box::new(self.get(kind, name).await?)),
            ResourceKind::Job => Workload::Job(Box::new(self.get(kind, name).await?)),
            ResourceKind::CronJob => Workload::CronJob(Box::new(self.get(kind, name).await?)),
            ResourceKind::HorizontalPodAutoscaler => {
                Workload::Autoscaler(Box::new(self.get(kind, name).await?))
            }
        };
        Ok(workload)
    }
}

/// Turn the positional target tokens plus the optional label query into the
/// single active selector.
pub async fn resolve<F: ObjectFetcher>(
    fetcher: &F,
    targets: &[String],
    label_query: Option<&str>,
) -> Result<SelectorSpec, Error> {
    match targets {
        [] => {
            let query = label_query
                .filter(|query| !query.is_empty())
                .ok_or_else(|| {
                    Error::InvalidTarget(
                        "no target given and no label query to fall back to".to_string(),
                    )
                })?;
            Ok(SelectorSpec::LabelQuery(parse_labels(query)))
        }
        [pattern] => {
            reject_label_query(label_query)?;
            let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            Ok(SelectorSpec::NameRegex(regex))
        }
        [kind_token, name] => {
            reject_label_query(label_query)?;
            let kind = ResourceKind::parse(kind_token)
                .ok_or_else(|| Error::UnsupportedResourceKind(kind_token.clone()))?;
            resolve_reference(fetcher, kind, name).await
        }
        _ => Err(Error::InvalidTarget(format!(
            "expected NAME_REGEX or TYPE NAME, got {} arguments",
            targets.len()
        ))),
    }
}

fn reject_label_query(label_query: Option<&str>) -> Result<(), Error> {
    match label_query {
        Some(query) if !query.is_empty() => Err(Error::InvalidTarget(
            "a label query cannot be combined with a positional target".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Fetch/reduce loop. Most kinds reduce in one step; autoscalers delegate to
/// their scale target, bounded by [`MAX_INDIRECTIONS`].
pub async fn resolve_reference<F: ObjectFetcher>(
    fetcher: &F,
    kind: ResourceKind,
    name: &str,
) -> Result<SelectorSpec, Error> {
    let mut kind = kind;
    let mut name = name.to_string();
    for _ in 0..MAX_INDIRECTIONS {
        let workload = fetcher.fetch(kind, &name).await?;
        match reduce(kind, &name, &workload)? {
            Step::Selector(spec) => return Ok(spec),
            Step::Follow {
                kind: next_kind,
                name: next_name,
            } => {
                debug!("{kind} {name} delegates to {next_kind} {next_name}");
                kind = next_kind;
                name = next_name;
            }
        }
    }
    Err(Error::ResolutionFailed {
        target: format!("{kind} {name}"),
        detail: format!("more than {MAX_INDIRECTIONS} scale target indirections"),
    })
}
