//! Finalizer handling
//!
//! The operator's finalizer keeps an object in the store until its remote
//! cleanup ran. All three operations are idempotent.

use kube::ResourceExt;
use tracing::debug;

use crate::crd::FINALIZER_NAME;
use crate::error::Result;
use crate::store::{ObjectStore, StoredObject};

/// True if the operator's finalizer is set on `obj`
pub fn has_finalizer<K: StoredObject>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

/// Add the finalizer and persist; no-op when already present
pub async fn add<K: StoredObject>(store: &dyn ObjectStore<K>, obj: &mut K) -> Result<()> {
    if has_finalizer(obj) {
        return Ok(());
    }

    obj.finalizers_mut().push(FINALIZER_NAME.to_string());
    *obj = store.update(obj).await?;
    debug!(name = %obj.name_any(), "Added finalizer");
    Ok(())
}

/// Remove the finalizer and persist; no-op when absent
pub async fn remove<K: StoredObject>(store: &dyn ObjectStore<K>, obj: &mut K) -> Result<()> {
    if !has_finalizer(obj) {
        return Ok(());
    }

    obj.finalizers_mut().retain(|f| f != FINALIZER_NAME);
    *obj = store.update(obj).await?;
    debug!(name = %obj.name_any(), "Removed finalizer");
    Ok(())
}

/// Re-read the object and remove the finalizer; an object that is already
/// gone counts as success
pub async fn remove_by_name<K: StoredObject>(
    store: &dyn ObjectStore<K>,
    name: &str,
    namespace: &str,
) -> Result<()> {
    let mut obj = match store.get(namespace, name).await {
        Ok(obj) => obj,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    match remove(store, &mut obj).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
