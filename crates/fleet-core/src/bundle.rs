//! Deploy packaging and build-context rendering.
//!
//! A deploy descriptor is packaged once per fingerprint into a tar bundle
//! under `<state>/deploy/bundles/`; identical descriptors reuse the cached
//! bundle. The per-image build context (`<state>/deploy/<name>/`) holds the
//! rendered Dockerfile, xinetd config, service script and a copy of the
//! bundle, and is handed to the runtime as-is.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fleet_common::Result;
use tracing::{info, warn};

use crate::deploy::DeployDescriptor;
use crate::image::ChallengeImage;

const DOCKERFILE_TEMPLATE: &str = include_str!("../templates/Dockerfile.tmpl");
const XINETD_TEMPLATE: &str = include_str!("../templates/xinetd.tmpl");
const SERVICE_TEMPLATE: &str = include_str!("../templates/service.sh.tmpl");

pub fn bundles_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("deploy").join("bundles")
}

pub fn context_dir(state_dir: &Path, image_name: &str) -> PathBuf {
    state_dir.join("deploy").join(image_name)
}

/// Create the on-disk layout if it does not exist yet.
pub fn ensure_layout(state_dir: &Path) -> Result<()> {
    fs::create_dir_all(bundles_dir(state_dir))?;
    Ok(())
}

/// Package the deploy descriptor into `<bundles>/<fingerprint>.tar`,
/// reusing a cached bundle when one exists for the current fingerprint.
/// Listed paths that do not exist under the basedir are reported and
/// skipped.
pub fn package_bundle(deploy: &DeployDescriptor, state_dir: &Path) -> Result<PathBuf> {
    ensure_layout(state_dir)?;
    let bundle = bundles_dir(state_dir).join(format!("{}.tar", deploy.fingerprint()));
    if bundle.exists() {
        info!(bundle = %bundle.display(), "reusing cached deploy bundle");
        return Ok(bundle);
    }

    info!(bundle = %bundle.display(), "packaging deploy bundle");
    let mut builder = tar::Builder::new(File::create(&bundle)?);
    for file in deploy.files() {
        let source = Path::new(deploy.basedir()).join(file);
        if source.is_dir() {
            builder.append_dir_all(file, &source)?;
        } else if source.is_file() {
            builder.append_path_with_name(&source, file)?;
        } else {
            warn!(path = %source.display(), "deploy path not found, skipped");
        }
    }
    builder.into_inner()?.sync_all()?;
    Ok(bundle)
}

/// Render the build context for an image and return its directory.
///
/// The caller has already checked the build preconditions, so parent and
/// port are present here.
pub fn render_context(image: &ChallengeImage, state_dir: &Path, bundle: &Path) -> Result<PathBuf> {
    let context = context_dir(state_dir, image.name());
    fs::create_dir_all(&context)?;

    let parent = image.parent.as_deref().unwrap_or_default();
    let apt = image
        .apt
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    let port = image.port().to_string();
    let entry = image.deploy.entry();

    let dockerfile = DOCKERFILE_TEMPLATE
        .replace("{{parent}}", parent)
        .replace("{{apt}}", &apt)
        .replace("{{port}}", &port)
        .replace("{{entry}}", entry);
    fs::write(context.join("Dockerfile"), dockerfile)?;

    let xinetd = XINETD_TEMPLATE
        .replace("{{port}}", &port)
        .replace("{{entry}}", entry);
    fs::write(context.join("challenge.xinetd"), xinetd)?;

    fs::write(context.join("service.sh"), SERVICE_TEMPLATE)?;
    fs::copy(bundle, context.join("bundle.tar"))?;

    Ok(context)
}

/// Drop an image's build context after the image itself is removed.
pub fn remove_context(state_dir: &Path, image_name: &str) {
    let context = context_dir(state_dir, image_name);
    if context.exists() {
        if let Err(e) = fs::remove_dir_all(&context) {
            warn!(context = %context.display(), error = %e, "failed to remove build context");
        }
    }
}
