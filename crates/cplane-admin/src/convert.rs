use std::str::FromStr;

use cplane_types::{CollectionAction, CollectionCommand, CplaneError, CreateCollection};

use crate::handler::DeleteStatus;

pub const ASYNC: &str = "async";
pub const REQUEST_ID: &str = "requestid";
pub const FLUSH: &str = "flush";

/// Ordered, repeatable HTTP-style request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Params(Vec::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn required(&self, key: &str) -> Result<&str, CplaneError> {
        self.get(key)
            .ok_or_else(|| CplaneError::Malformed(format!("missing required parameter: {key}")))
    }

    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, CplaneError> {
        self.get(key)
            .map(|v| {
                v.trim().parse::<T>().map_err(|_| {
                    CplaneError::Malformed(format!("invalid value for {key}: {v}"))
                })
            })
            .transpose()
    }

    /// Comma-separated list; absent or blank yields an empty list.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Params(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Collection and shard names: `[A-Za-z0-9._][A-Za-z0-9._-]*`.
pub fn validate_name(kind: &str, name: &str) -> Result<(), CplaneError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '.' || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CplaneError::Malformed(format!(
            "invalid {kind}: [{name}]. {kind} names must consist entirely of periods, underscores, hyphens, and alphanumerics, and must not start with a hyphen"
        )))
    }
}

fn named(kind: &str, params: &Params, key: &str) -> Result<String, CplaneError> {
    let v = params.required(key)?;
    validate_name(kind, v)?;
    Ok(v.to_string())
}

fn parse_create(params: &Params) -> Result<CreateCollection, CplaneError> {
    let name = named("collection", params, "name")?;

    let rf = params.parse::<u32>("replicationFactor")?;
    let nrt = params.parse::<u32>("nrtReplicas")?;
    if let (Some(a), Some(b)) = (rf, nrt) {
        if a != b {
            return Err(CplaneError::Malformed(
                "Cannot specify both replicationFactor and nrtReplicas as they mean the same thing".into(),
            ));
        }
    }

    let shards = params.list("shards");
    for s in &shards {
        validate_name("shard", s)?;
    }
    let num_shards = match params.parse::<u32>("numShards")? {
        Some(n) => n,
        None => shards.len() as u32,
    };
    if num_shards == 0 {
        return Err(CplaneError::Malformed(
            "numShards is a required param when shards is not given".into(),
        ));
    }

    Ok(CreateCollection {
        name,
        num_shards,
        replication_factor: rf.or(nrt).unwrap_or(1),
        config_name: params.get("collection.configName").map(str::to_string),
        shards,
        node_set: params.list("createNodeSet"),
    })
}

/// Build the typed command for `action` from request parameters.
pub fn parse_command(
    action: CollectionAction,
    params: &Params,
) -> Result<CollectionCommand, CplaneError> {
    let cmd = match action {
        CollectionAction::Create => CollectionCommand::Create(parse_create(params)?),
        CollectionAction::Delete => CollectionCommand::Delete { name: params.required("name")?.to_string() },
        CollectionAction::Reload => CollectionCommand::Reload { name: params.required("name")?.to_string() },
        CollectionAction::SplitShard => CollectionCommand::SplitShard {
            collection: params.required("collection")?.to_string(),
            shard: params.required("shard")?.to_string(),
            split_key: params.get("split.key").map(str::to_string),
        },
        CollectionAction::CreateShard => CollectionCommand::CreateShard {
            collection: params.required("collection")?.to_string(),
            shard: named("shard", params, "shard")?,
        },
        CollectionAction::DeleteShard => CollectionCommand::DeleteShard {
            collection: params.required("collection")?.to_string(),
            shard: params.required("shard")?.to_string(),
        },
        CollectionAction::AddReplica => CollectionCommand::AddReplica {
            collection: params.required("collection")?.to_string(),
            shard: params.required("shard")?.to_string(),
            node: params.get("node").map(str::to_string),
        },
        CollectionAction::DeleteReplica => CollectionCommand::DeleteReplica {
            collection: params.required("collection")?.to_string(),
            shard: params.required("shard")?.to_string(),
            replica: params.required("replica")?.to_string(),
        },
        CollectionAction::MockTask => CollectionCommand::MockTask {
            sleep_ms: params.parse::<u64>("sleep")?.unwrap_or(0),
        },
    };
    Ok(cmd)
}

/// Exactly one of `requestid` or `flush=true`.
pub fn parse_delete_status(params: &Params) -> Result<DeleteStatus, CplaneError> {
    let request_id = params.get(REQUEST_ID);
    let flush = params.parse::<bool>(FLUSH)?.unwrap_or(false);
    match (request_id, flush) {
        (None, false) => Err(CplaneError::Malformed(
            "Either requestid or flush parameter must be specified.".into(),
        )),
        (Some(_), true) => Err(CplaneError::Malformed(
            "Both requestid and flush parameters can not be specified together.".into(),
        )),
        (Some(id), false) => Ok(DeleteStatus::Single(id.to_string())),
        (None, true) => Ok(DeleteStatus::Flush),
    }
}

pub fn http_status(err: &CplaneError) -> u16 {
    if err.is_client_error() {
        400
    } else {
        500
    }
}
