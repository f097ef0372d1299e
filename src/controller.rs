use std::collections::HashMap;

use futures::{TryStreamExt, stream::StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::runtime::watcher::{Config as WatcherConfig, Event, watcher};
use kube::{Api, ResourceExt};
use regex::Regex;
use tracing::{debug, info};

use crate::output::ColorPicker;
use crate::resolver::SelectorSpec;
use crate::tailer::{TailTarget, Tailer};

/// Drives the pod change feed and owns one tailer set per live pod UID.
/// Single-writer: only this loop ever touches the map; tasks report back
/// solely through their completion flags.
pub struct Controller<T, F> {
    selector: SelectorSpec,
    container_regex: Option<Regex>,
    exit_with_pods: bool,
    colors: Option<ColorPicker>,
    factory: F,
    tailers: HashMap<String, T>,
}

impl<T, F> Controller<T, F>
where
    T: Tailer,
    F: FnMut(TailTarget) -> T,
{
    pub fn new(
        selector: SelectorSpec,
        container_regex: Option<Regex>,
        exit_with_pods: bool,
        colored: bool,
        factory: F,
    ) -> Self {
        Self {
            selector,
            container_regex,
            exit_with_pods,
            colors: colored.then(ColorPicker::default),
            factory,
            tailers: HashMap::new(),
        }
    }

    /// Follow the change feed until it ends, a watch error occurs, or the
    /// exit-with-pods condition fires.
    pub async fn run(&mut self, pods: Api<Pod>, config: WatcherConfig) -> anyhow::Result<()> {
        let mut stream = watcher(pods, config).boxed();
        while let Some(event) = stream.try_next().await? {
            match event {
                Event::Init => debug!("pod watch starting"),
                Event::InitDone => debug!("pod watch synced"),
                Event::InitApply(pod) | Event::Apply(pod) => self.apply(&pod),
                Event::Delete(pod) => {
                    if self.delete(&pod) {
                        info!("all watched pods are gone, exiting");
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// One-shot mode: list the matching pods and fetch every container's
    /// logs to completion, pod by pod.
    pub async fn run_previous(&mut self, pods: Api<Pod>, params: ListParams) -> anyhow::Result<()> {
        let list = pods.list(&params).await?;
        for pod in &list.items {
            if !self.name_matches(pod) {
                continue;
            }
            let Some(uid) = self.insert(pod) else { continue };
            info!("+ [{}] pod added", pod.name_any());
            if let Some(tailer) = self.tailers.get_mut(&uid) {
                tailer.tail_sync().await;
            }
        }
        Ok(())
    }

    /// A pod without a tailer set goes down the added path, a known UID
    /// down the restart-detection path.
    pub(crate) fn apply(&mut self, pod: &Pod) {
        if !self.name_matches(pod) {
            return;
        }
        let Some(uid) = pod.uid() else { return };
        if self.tailers.contains_key(&uid) {
            self.modified(&uid, pod);
        } else {
            self.added(pod);
        }
    }

    fn added(&mut self, pod: &Pod) {
        if let Some(uid) = self.insert(pod)
            && let Some(tailer) = self.tailers.get_mut(&uid)
        {
            info!("+ [{}] pod added", pod.name_any());
            tailer.start();
        }
    }

    /// Creates the tailer set and returns its key, or None when no
    /// container passes the filter.
    fn insert(&mut self, pod: &Pod) -> Option<String> {
        let uid = pod.uid()?;
        let containers = container_names(pod, self.container_regex.as_ref());
        if containers.is_empty() {
            debug!("[{}] no container matches the filter", pod.name_any());
            return None;
        }
        let (pod_color, container_color) = match self.colors.as_mut() {
            Some(picker) => {
                let (pod_color, container_color) = picker.pick();
                (Some(pod_color), Some(container_color))
            }
            None => (None, None),
        };
        let target = TailTarget {
            pod_name: pod.name_any(),
            containers,
            pod_color,
            container_color,
        };
        self.tailers.insert(uid.clone(), (self.factory)(target));
        Some(uid)
    }

    fn modified(&mut self, uid: &str, pod: &Pod) {
        let restarted = restarted_container_names(pod);
        if restarted.is_empty() {
            return;
        }
        if let Some(tailer) = self.tailers.get_mut(uid) {
            tailer.retry_containers(&restarted);
        }
    }

    /// Returns true when exit-with-pods is armed and no tailer set remains.
    pub(crate) fn delete(&mut self, pod: &Pod) -> bool {
        if let Some(uid) = pod.uid()
            && let Some(mut tailer) = self.tailers.remove(&uid)
        {
            info!("- [{}] pod deleted", pod.name_any());
            tailer.close();
        }
        self.exit_with_pods && self.tailers.is_empty()
    }

    fn name_matches(&self, pod: &Pod) -> bool {
        match &self.selector {
            SelectorSpec::NameRegex(regex) => regex.is_match(&pod.name_any()),
            SelectorSpec::LabelQuery(_) => true,
        }
    }

    #[cfg(test)]
    pub(crate) fn tailer_count(&self) -> usize {
        self.tailers.len()
    }
}

/// Init containers first, then regular containers, in declared order,
/// filtered by the optional container-name pattern.
fn container_names(pod: &Pod, filter: Option<&Regex>) -> Vec<String> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .map(|container| container.name.clone())
        .filter(|name| filter.is_none_or(|regex| regex.is_match(name)))
        .collect()
}

/// Containers whose status flipped to Running within the last second. The
/// modified event that reports a restart arrives right after the kubelet
/// starts the new instance.
fn restarted_container_names(pod: &Pod) -> Vec<String> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let now = chrono::Utc::now();
    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .filter(|cs| {
            cs.state
                .as_ref()
                .and_then(|state| state.running.as_ref())
                .and_then(|running| running.started_at.as_ref())
                .is_some_and(|started| now.signed_duration_since(started.0) < chrono::Duration::seconds(1))
        })
        .map(|cs| cs.name.clone())
        .collect()
}
