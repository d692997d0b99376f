//! Attaching and detaching observers across an object graph.
//!
//! Each observer remembers the roots it was shared on. An instance stays
//! attached while it is reachable from one of those roots, so replacing
//! or unsharing one path never detaches nodes another path still reaches.

use crate::error::{Result, ShareError};
use crate::instance::SharedInstance;
use crate::observer::Observer;
use crate::registry::SchemaRegistry;
use ahash::AHashSet;
use tracing::debug;

fn check_definition(registry: &SchemaRegistry, target: &SharedInstance) -> Result<()> {
    let definition = target.definition();
    if definition.identity().is_none() || !registry.owns(definition) {
        return Err(ShareError::UnknownSchema(definition.name().to_string()));
    }
    Ok(())
}

/// Attaches `observer` to `target` and every instance reachable through
/// its composite fields. Sharing twice is a no-op.
pub fn share(registry: &SchemaRegistry, target: &SharedInstance, observer: &Observer) -> Result<()> {
    validate(registry, target)?;
    observer.add_root(target);
    let instances = attach(registry, target, observer);
    debug!(
        observer = observer.id(),
        target = ?target.identity(),
        instances,
        "shared"
    );
    Ok(())
}

/// Detaches `observer` from `target` and everything reachable from it,
/// except instances another shared root still reaches without passing
/// through `target`. Changes already recorded still flush.
pub fn unshare(registry: &SchemaRegistry, target: &SharedInstance, observer: &Observer) -> Result<()> {
    validate(registry, target)?;
    observer.remove_root(target);
    let keep = reachable(&observer.roots(), Some(target));
    let instances = detach(target, observer, &keep);
    debug!(
        observer = observer.id(),
        target = ?target.identity(),
        instances,
        "unshared"
    );
    Ok(())
}

/// Checks every instance reachable from `target` without changing any.
pub(crate) fn validate(registry: &SchemaRegistry, target: &SharedInstance) -> Result<()> {
    let mut visited = AHashSet::new();
    let mut stack = vec![target.clone()];
    while let Some(instance) = stack.pop() {
        if !visited.insert(instance.key()) {
            continue;
        }
        check_definition(registry, &instance)?;
        stack.extend(instance.composite_children());
    }
    Ok(())
}

/// Assigns identities and attaches the observer across `target`'s graph.
/// Returns how many instances were walked.
pub(crate) fn attach(registry: &SchemaRegistry, target: &SharedInstance, observer: &Observer) -> usize {
    let mut visited = AHashSet::new();
    attach_walk(registry, target, observer, &mut visited);
    visited.len()
}

fn attach_walk(
    registry: &SchemaRegistry,
    target: &SharedInstance,
    observer: &Observer,
    visited: &mut AHashSet<usize>,
) {
    if !visited.insert(target.key()) {
        return;
    }

    target.ensure_identity(registry);

    for child in target.composite_children() {
        attach_walk(registry, &child, observer, visited);
    }

    target.attach(observer);
}

/// Detaches whatever part of `previous` the observer's roots no longer
/// reach. Called after a composite field stopped pointing at it.
pub(crate) fn release(previous: &SharedInstance, observer: &Observer) -> usize {
    let keep = reachable(&observer.roots(), None);
    detach(previous, observer, &keep)
}

/// Keys of every instance reachable from `roots`, never entering `blocked`.
fn reachable(roots: &[SharedInstance], blocked: Option<&SharedInstance>) -> AHashSet<usize> {
    let blocked = blocked.map(SharedInstance::key);
    let mut visited = AHashSet::new();
    let mut stack: Vec<SharedInstance> = roots.to_vec();
    while let Some(instance) = stack.pop() {
        if Some(instance.key()) == blocked || !visited.insert(instance.key()) {
            continue;
        }
        stack.extend(instance.composite_children());
    }
    visited
}

fn detach(target: &SharedInstance, observer: &Observer, keep: &AHashSet<usize>) -> usize {
    let mut visited = AHashSet::new();
    let mut stack = vec![target.clone()];
    let mut detached = 0;
    while let Some(instance) = stack.pop() {
        if keep.contains(&instance.key()) || !visited.insert(instance.key()) {
            continue;
        }
        if instance.detach(observer) {
            detached += 1;
        }
        stack.extend(instance.composite_children());
    }
    detached
}
