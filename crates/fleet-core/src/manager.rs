//! The fleet façade: typed commands executed against the image registry,
//! the container runtime and the persisted snapshot.
//!
//! Bulk commands apply per image and keep going when one image fails; the
//! failure is logged with the image name and the rest of the batch still
//! runs. Single-target commands fail fast. Every successful mutating
//! command re-persists the snapshot before returning.

use std::fmt::Write as _;
use std::sync::Arc;

use fleet_common::{ContainerRuntime, FleetError, Result};
use tracing::{error, info, warn};

use crate::config::FleetConfig;
use crate::ids::IdRange;
use crate::image::ChallengeImage;
use crate::registry::{ImageRegistry, RemovePolicy};
use crate::{bundle, lifecycle, names, persist};

/// Interactive confirmation seam. The CLI backs this with stdin; tests
/// script the answers.
pub trait Prompter: Send + Sync {
    fn confirm(&self, question: &str) -> bool;
}

/// Answers yes to everything. Useful for non-interactive callers that
/// already passed `-y`.
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

/// A set of containers addressed as `<image>.<ranges>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub image: String,
    pub ranges: Vec<IdRange>,
}

impl Target {
    pub fn parse(token: &str) -> Result<Self> {
        let (image, ranges) = names::parse_target(token)?;
        Ok(Self { image, ranges })
    }
}

/// What `run` should act on: a whole image (create new containers), a
/// named image's id set, or bare ids resolved against the selected image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    Image(String),
    Containers(Target),
    Ranges(Vec<IdRange>),
}

impl RunTarget {
    /// A token with a dot addresses a named image's containers; a token
    /// starting with a digit is an id range list on the selected image;
    /// anything else is an image name.
    pub fn parse(token: &str) -> Result<Self> {
        if token.contains('.') {
            Ok(RunTarget::Containers(Target::parse(token)?))
        } else if token.starts_with(|c: char| c.is_ascii_digit()) {
            Ok(RunTarget::Ranges(names::parse_ranges(token)?))
        } else {
            names::validate_name(token)?;
            Ok(RunTarget::Image(token.to_string()))
        }
    }
}

/// One fully parsed command, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `new <name|base*n>...`: create images. Nothing is selected until an
    /// explicit `select`.
    New { tokens: Vec<String> },
    Select { name: String },
    SetImage { parent: String },
    SetApt { add: Vec<String>, remove: Vec<String> },
    SetBasedir { path: String },
    SetDeploy { files: Vec<String> },
    SetUndeploy { files: Vec<String> },
    SetEntry { entry: String },
    SetPort { port: u32 },
    ListImage,
    ListApt,
    ListDeploy,
    ListSelect,
    ListStatus,
    /// Empty `names` means the selected image.
    Build { names: Vec<String> },
    Run {
        targets: Vec<RunTarget>,
        count: u32,
        port: Option<u16>,
        flag: Option<String>,
    },
    RmImage { names: Vec<String>, force: bool },
    RmContainer { targets: Vec<Target> },
    StopContainer { targets: Vec<Target> },
}

impl Command {
    /// Whether a successful execution must be re-persisted.
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::Select { .. }
                | Command::ListImage
                | Command::ListApt
                | Command::ListDeploy
                | Command::ListSelect
                | Command::ListStatus
        )
    }
}

pub struct FleetManager {
    config: FleetConfig,
    runtime: Arc<dyn ContainerRuntime>,
    registry: ImageRegistry,
    selected: Option<String>,
    prompter: Box<dyn Prompter>,
}

impl FleetManager {
    pub fn new(
        config: FleetConfig,
        runtime: Arc<dyn ContainerRuntime>,
        prompter: Box<dyn Prompter>,
    ) -> Self {
        Self {
            config,
            runtime,
            registry: ImageRegistry::new(),
            selected: None,
            prompter,
        }
    }

    /// Restore the registry from the persisted snapshot, if any.
    pub async fn load(&mut self) -> Result<()> {
        self.registry = persist::load(&self.config.snapshot_path(), self.runtime.as_ref()).await?;
        info!(
            images = self.registry.len(),
            path = %self.config.snapshot_path().display(),
            "fleet state loaded"
        );
        Ok(())
    }

    pub fn persist(&self) -> Result<()> {
        persist::save(&self.registry, &self.config.snapshot_path())
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn registry(&self) -> &ImageRegistry {
        &self.registry
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Execute one command. List commands return their rendering; mutating
    /// commands return `None` and re-persist the snapshot on success.
    pub async fn execute(&mut self, command: Command) -> Result<Option<String>> {
        let persist_after = command.mutates();
        let output = self.dispatch(command).await?;
        if persist_after {
            self.persist()?;
        }
        Ok(output)
    }

    async fn dispatch(&mut self, command: Command) -> Result<Option<String>> {
        match command {
            Command::New { tokens } => {
                // A bad token skips only itself; the rest of the batch is
                // still created.
                for token in tokens {
                    let expanded = match names::expand_name(&token) {
                        Ok(expanded) => expanded,
                        Err(e) => {
                            error!(token = %token, error = %e, "bad name token");
                            continue;
                        }
                    };
                    for name in expanded {
                        if let Err(e) = self.registry.create(&name) {
                            error!(image = %name, error = %e, "creation failed");
                        }
                    }
                }
                Ok(None)
            }
            Command::Select { name } => {
                if !self.registry.contains(&name) {
                    return Err(FleetError::NotFound(name));
                }
                self.selected = Some(name);
                Ok(None)
            }
            Command::SetImage { parent } => {
                // The parent must exist in the runtime's catalog before it
                // can be assigned.
                let catalog = self.runtime.list_images().await?;
                if !catalog.iter().any(|i| i.reference == parent) {
                    return Err(FleetError::NotFound(format!("runtime image '{parent}'")));
                }
                self.selected_mut()?.parent = Some(parent);
                Ok(None)
            }
            Command::SetApt { add, remove } => {
                let image = self.selected_mut()?;
                for pkg in add {
                    image.apt.insert(pkg);
                }
                for pkg in remove {
                    image.apt.remove(&pkg);
                }
                Ok(None)
            }
            Command::SetBasedir { path } => {
                self.selected_mut()?.deploy.set_basedir(&path)?;
                Ok(None)
            }
            Command::SetDeploy { files } => {
                self.selected_mut()?.deploy.add_files(files)?;
                Ok(None)
            }
            Command::SetUndeploy { files } => {
                self.selected_mut()?
                    .deploy
                    .remove_files(files.iter().map(String::as_str));
                Ok(None)
            }
            Command::SetEntry { entry } => {
                self.selected_mut()?.deploy.set_entry(&entry)?;
                Ok(None)
            }
            Command::SetPort { port } => {
                self.selected_mut()?.set_port(port)?;
                Ok(None)
            }
            Command::ListImage => Ok(Some(self.render_images())),
            Command::ListApt => {
                let image = self.selected_ref()?;
                let mut out = String::new();
                for pkg in &image.apt {
                    let _ = writeln!(out, "{pkg}");
                }
                Ok(Some(out))
            }
            Command::ListDeploy => {
                let image = self.selected_ref()?;
                let mut out = String::new();
                let _ = writeln!(out, "basedir: {}", image.deploy.basedir());
                let _ = writeln!(out, "entry:   {}", image.deploy.entry());
                for file in image.deploy.files() {
                    let _ = writeln!(out, "deploy:  {file}");
                }
                Ok(Some(out))
            }
            Command::ListSelect => {
                let mut out = String::new();
                for name in self.registry.names() {
                    let marker = if self.selected.as_deref() == Some(name) {
                        "*"
                    } else {
                        " "
                    };
                    let _ = writeln!(out, "{marker} {name}");
                }
                Ok(Some(out))
            }
            Command::ListStatus => self.render_status().await.map(Some),
            Command::Build { names } => {
                for name in self.resolve_names(names)? {
                    let Some(image) = self.registry.get_mut(&name) else {
                        error!(image = %name, "no such image");
                        continue;
                    };
                    if let Err(e) =
                        lifecycle::build(image, self.runtime.as_ref(), &self.config).await
                    {
                        error!(image = %name, error = %e, "build failed");
                    }
                }
                Ok(None)
            }
            Command::Run {
                targets,
                count,
                port,
                flag,
            } => self.run(targets, count, port, flag).await,
            Command::RmImage { names, force } => {
                let policy = if force {
                    RemovePolicy::Force
                } else if self.config.script_mode {
                    RemovePolicy::SkipIfBusy
                } else {
                    RemovePolicy::Ask
                };
                self.rm_images(names, policy).await
            }
            Command::RmContainer { targets } => {
                for target in targets {
                    let Some(image) = self.registry.get_mut(&target.image) else {
                        error!(image = %target.image, "no such image");
                        continue;
                    };
                    if let Err(e) =
                        lifecycle::delete_containers(image, self.runtime.as_ref(), &target.ranges)
                            .await
                    {
                        error!(image = %target.image, error = %e, "container removal failed");
                    }
                }
                Ok(None)
            }
            Command::StopContainer { targets } => {
                for target in targets {
                    let Some(image) = self.registry.get(&target.image) else {
                        error!(image = %target.image, "no such image");
                        continue;
                    };
                    if let Err(e) =
                        lifecycle::stop_containers(image, self.runtime.as_ref(), &target.ranges)
                            .await
                    {
                        error!(image = %target.image, error = %e, "container stop failed");
                    }
                }
                Ok(None)
            }
        }
    }

    fn selected_mut(&mut self) -> Result<&mut ChallengeImage> {
        let name = self.selected.clone().ok_or(FleetError::NoSelection)?;
        self.registry
            .get_mut(&name)
            .ok_or(FleetError::NotFound(name))
    }

    fn selected_ref(&self) -> Result<&ChallengeImage> {
        let name = self.selected.as_deref().ok_or(FleetError::NoSelection)?;
        self.registry
            .get(name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))
    }

    /// Empty `names` means "the selected image".
    fn resolve_names(&self, names: Vec<String>) -> Result<Vec<String>> {
        if names.is_empty() {
            let selected = self.selected.clone().ok_or(FleetError::NoSelection)?;
            Ok(vec![selected])
        } else {
            Ok(names)
        }
    }

    async fn run(
        &mut self,
        targets: Vec<RunTarget>,
        count: u32,
        port: Option<u16>,
        flag: Option<String>,
    ) -> Result<Option<String>> {
        let targets = if targets.is_empty() {
            let selected = self.selected.clone().ok_or(FleetError::NoSelection)?;
            vec![RunTarget::Image(selected)]
        } else {
            targets
        };
        for target in targets {
            match target {
                RunTarget::Image(name) => {
                    // Creation is opt-in via `-n`; bare `run` starts nothing.
                    if count == 0 {
                        continue;
                    }
                    let Some(image) = self.registry.get_mut(&name) else {
                        error!(image = %name, "no such image");
                        continue;
                    };
                    if let Err(e) = lifecycle::create_containers(
                        image,
                        self.runtime.as_ref(),
                        &self.config,
                        count,
                        port,
                        flag.as_deref(),
                    )
                    .await
                    {
                        error!(image = %name, error = %e, "container creation failed");
                    }
                }
                RunTarget::Containers(target) => {
                    let Some(image) = self.registry.get(&target.image) else {
                        error!(image = %target.image, "no such image");
                        continue;
                    };
                    if let Err(e) =
                        lifecycle::start_existing(image, self.runtime.as_ref(), &target.ranges)
                            .await
                    {
                        error!(image = %target.image, error = %e, "container start failed");
                    }
                }
                RunTarget::Ranges(ranges) => {
                    let image = self.selected_ref()?;
                    if let Err(e) =
                        lifecycle::start_existing(image, self.runtime.as_ref(), &ranges).await
                    {
                        error!(image = image.name(), error = %e, "container start failed");
                    }
                }
            }
        }
        Ok(None)
    }

    async fn rm_images(&mut self, names: Vec<String>, policy: RemovePolicy) -> Result<Option<String>> {
        for name in self.resolve_names(names)? {
            if let Err(e) = self.rm_image(&name, policy).await {
                error!(image = %name, error = %e, "image removal failed");
            }
        }
        Ok(None)
    }

    async fn rm_image(&mut self, name: &str, policy: RemovePolicy) -> Result<()> {
        let image = self
            .registry
            .get(name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;

        if image.container_count() > 0 {
            let proceed = match policy {
                RemovePolicy::Force => true,
                RemovePolicy::SkipIfBusy => false,
                RemovePolicy::Ask => self.prompter.confirm(&format!(
                    "image '{name}' still has {} container(s); delete them and the image?",
                    image.container_count()
                )),
            };
            if !proceed {
                warn!(image = name, "image still has containers, skipped");
                return Ok(());
            }
        }

        // Tear down containers and the built artifact first; the registry
        // entry is detached only once the runtime side is gone, so a failed
        // teardown never orphans live containers.
        {
            let image = self
                .registry
                .get_mut(name)
                .ok_or_else(|| FleetError::NotFound(name.to_string()))?;
            lifecycle::delete_all(image, self.runtime.as_ref()).await?;
            if let Some(built) = &image.built {
                if let Err(e) = self.runtime.remove_image(built).await {
                    warn!(image = name, error = %e, "built artifact removal failed");
                }
            }
        }
        self.registry.remove(name)?;
        bundle::remove_context(self.config.state_dir(), name);
        if self.selected.as_deref() == Some(name) {
            self.selected = None;
        }
        info!(image = name, "image removed");
        Ok(())
    }

    fn render_images(&self) -> String {
        let mut out = String::new();
        for image in self.registry.iter() {
            let _ = writeln!(
                out,
                "{:<20} {:<24} {}",
                image.name(),
                image.parent.as_deref().unwrap_or("-"),
                image.status()
            );
        }
        out
    }

    async fn render_status(&self) -> Result<String> {
        let mut out = String::new();
        for image in self.registry.iter() {
            let _ = writeln!(out, "{} [{}]", image.name(), image.status());
            for record in image.containers.values() {
                let status = self.runtime.status(&record.runtime_ref).await?;
                let _ = writeln!(
                    out,
                    "  {:>3}  {:<10}  :{:<5}  {}",
                    record.id, status, record.outer_port, record.flag
                );
            }
        }
        Ok(out)
    }
}
