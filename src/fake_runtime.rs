use crate::image_reference::ImageReference;
use crate::reconciler::Phase;
use crate::runtime::{ContainerRuntime, ContainerSpec, RunningContainer, RuntimeError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Engine calls in the order the fake received them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(String),
    Inspect(String),
    Stop(String),
    Remove(String),
    Pull(String),
    Create(String),
    Start(String),
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub running: bool,
    pub labels: HashMap<String, String>,
    pub network_id: String,
}

#[derive(Default)]
struct Engine {
    containers: Vec<FakeContainer>,
    // image id -> repo digests of images present locally
    images: HashMap<String, Vec<String>>,
    // pullable reference -> (image id, repo digest)
    registry: HashMap<String, (String, String)>,
    // pulled reference -> image id
    tags: HashMap<String, String>,
    calls: Vec<Call>,
    next_id: usize,
    fail_on: Option<Phase>,
}

impl Engine {
    fn record(&mut self, call: Call, phase: Phase) -> Result<(), RuntimeError> {
        self.calls.push(call);
        if self.fail_on == Some(phase) {
            return Err(RuntimeError::Engine(format!("injected {} failure", phase)));
        }
        Ok(())
    }

    fn next_container_id(&mut self) -> String {
        self.next_id += 1;
        format!("container-{}", self.next_id)
    }
}

/// In-memory container engine for exercising the reconciler.
#[derive(Default)]
pub struct FakeRuntime {
    engine: Mutex<Engine>,
    pull_delay: Option<Duration>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, name: &str, image_id: &str, repo_digests: &[&str]) -> Self {
        self.add_container(name, image_id, repo_digests, true)
    }

    /// Adds an exited container, as `docker ps -a` would still list it.
    pub fn with_stopped_container(self, name: &str, image_id: &str, repo_digests: &[&str]) -> Self {
        self.add_container(name, image_id, repo_digests, false)
    }

    fn add_container(self, name: &str, image_id: &str, repo_digests: &[&str], running: bool) -> Self {
        {
            let mut engine = self.engine.lock();
            engine.images.insert(
                image_id.to_string(),
                repo_digests.iter().map(|d| d.to_string()).collect(),
            );
            let id = engine.next_container_id();
            engine.containers.push(FakeContainer {
                id,
                name: name.to_string(),
                image_id: image_id.to_string(),
                running,
                labels: HashMap::new(),
                network_id: String::new(),
            });
        }
        self
    }

    /// Makes `reference` pullable as the image `image_id`.
    pub fn publish(self, reference: &str, image_id: &str, repo_digest: &str) -> Self {
        self.engine.lock().registry.insert(
            reference.to_string(),
            (image_id.to_string(), repo_digest.to_string()),
        );
        self
    }

    pub fn fail_on(self, phase: Phase) -> Self {
        self.engine.lock().fail_on = Some(phase);
        self
    }

    pub fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.engine.lock().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.engine.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn containers_named(&self, name: &str) -> Vec<FakeContainer> {
        self.engine
            .lock()
            .containers
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self, name: &str) -> Result<Vec<RunningContainer>, RuntimeError> {
        let mut engine = self.engine.lock();
        engine.record(Call::List(name.to_string()), Phase::List)?;
        Ok(engine
            .containers
            .iter()
            .filter(|c| c.name == name)
            .map(|c| RunningContainer {
                id: c.id.clone(),
                image_id: c.image_id.clone(),
                running: c.running,
            })
            .collect())
    }

    async fn inspect_image(&self, image_id: &str) -> Result<Vec<String>, RuntimeError> {
        let mut engine = self.engine.lock();
        engine.record(Call::Inspect(image_id.to_string()), Phase::Inspect)?;
        engine
            .images
            .get(image_id)
            .cloned()
            .ok_or_else(|| RuntimeError::Engine(format!("no such image: {}", image_id)))
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        let mut engine = self.engine.lock();
        engine.record(Call::Stop(id.to_string()), Phase::Stop)?;
        let container = engine
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::Engine(format!("no such container: {}", id)))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut engine = self.engine.lock();
        engine.record(Call::Remove(id.to_string()), Phase::Remove)?;
        let before = engine.containers.len();
        engine.containers.retain(|c| c.id != id);
        if engine.containers.len() == before {
            return Err(RuntimeError::Engine(format!("no such container: {}", id)));
        }
        Ok(())
    }

    async fn pull_image(&self, reference: &ImageReference) -> Result<(), RuntimeError> {
        let reference = reference.to_string();
        self.engine
            .lock()
            .record(Call::Pull(reference.clone()), Phase::Pull)?;

        if let Some(delay) = self.pull_delay {
            tokio::time::sleep(delay).await;
        }

        let mut engine = self.engine.lock();
        let (image_id, repo_digest) = engine
            .registry
            .get(&reference)
            .cloned()
            .ok_or_else(|| RuntimeError::Engine(format!("manifest unknown: {}", reference)))?;
        engine.images.insert(image_id.clone(), vec![repo_digest]);
        engine.tags.insert(reference, image_id);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut engine = self.engine.lock();
        engine.record(Call::Create(spec.name.clone()), Phase::Create)?;
        if engine.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Engine(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let image_id = engine
            .tags
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| RuntimeError::Engine(format!("no such image: {}", spec.image)))?;

        let id = engine.next_container_id();
        engine.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image_id,
            running: false,
            labels: spec.labels.clone(),
            network_id: spec.network.id.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut engine = self.engine.lock();
        engine.record(Call::Start(id.to_string()), Phase::Start)?;
        let container = engine
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::Engine(format!("no such container: {}", id)))?;
        container.running = true;
        Ok(())
    }
}
