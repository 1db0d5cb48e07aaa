use std::fmt::Debug;

use kube::api::{Api, DeleteParams, PostParams};
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Duration;
use tracing::info;

use crate::util::errors::{Error, ErrorWithRequeue, Result, StdError};

/// Delay before retrying after losing an optimistic-concurrency race.
pub const CONFLICT_RETRY: Duration = Duration::from_millis(500);

/// Outcome of [`upsert`], carrying the live object either way.
#[derive(Debug, Clone)]
pub enum Upserted<K> {
    Created(K),
    Existing(K),
}

impl<K> Upserted<K> {
    pub fn into_inner(self) -> K {
        match self {
            Upserted::Created(obj) | Upserted::Existing(obj) => obj,
        }
    }
}

fn kind_of<K>() -> String
where
    K: Resource,
    K::DynamicType: Default,
{
    K::kind(&K::DynamicType::default()).into_owned()
}

fn requeue_after_race(e: kube::Error) -> Error {
    Error::ErrorWithRequeue(ErrorWithRequeue::new(StdError::KubeError(e), CONFLICT_RETRY))
}

/// Reads `desired` by name and creates it when absent.
///
/// The caller compares the returned live object against `desired` to decide on updates.
pub async fn upsert<K>(api: &Api<K>, desired: &K) -> Result<Upserted<K>>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    K::DynamicType: Default,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing(format!("{} without a name", kind_of::<K>()))))?;

    match api.get(&name).await {
        Ok(live) => Ok(Upserted::Existing(live)),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            info!("Creating {} '{}'", kind_of::<K>(), name);
            match api.create(&PostParams::default(), desired).await {
                Ok(created) => Ok(Upserted::Created(created)),
                // Someone else created it between our read and write
                Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                    Err(requeue_after_race(kube::Error::Api(api_err)))
                }
                Err(e) => Err(Error::StdError(StdError::KubeError(e))),
            }
        }
        Err(e) => Err(Error::StdError(StdError::KubeError(e))),
    }
}

/// Replaces `live` on the server. A stale resourceVersion becomes a short requeue.
pub async fn update<K>(api: &Api<K>, live: &K) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    K::DynamicType: Default,
{
    let name = live.name_any();
    info!("Updating {} '{}'", kind_of::<K>(), name);
    match api.replace(&name, &PostParams::default(), live).await {
        Ok(updated) => Ok(updated),
        Err(kube::Error::Api(api_err)) if api_err.code == 409 => Err(requeue_after_race(kube::Error::Api(api_err))),
        Err(e) => Err(Error::StdError(StdError::KubeError(e))),
    }
}

/// Deletes the named object. Returns false if it was already gone.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => {
            info!("Deleted {} '{}'", kind_of::<K>(), name);
            Ok(true)
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
        Err(e) => Err(Error::StdError(StdError::KubeError(e))),
    }
}

/// True if `owner` is the controller owner of `obj`.
pub fn is_owned_by<K: Resource, O: Resource>(obj: &K, owner: &O) -> bool {
    let Some(uid) = owner.meta().uid.as_deref() else {
        return false;
    };
    obj.owner_references()
        .iter()
        .any(|oref| oref.uid == uid && oref.controller == Some(true))
}
