//! Choosing which components a run visits.

use super::Request;
use crate::error::{HubError, Result};
use crate::parameters::ElaborateManifest;
use crate::state::StateManifest;
use tracing::{debug, info};

/// Sub-sequence of the resolved order a request runs, in walk order.
///
/// The component filter wins over offset, offset over guessing. The limit
/// applies last and is inclusive.
pub fn plan(
    manifest: &ElaborateManifest,
    request: &Request,
    prior: Option<&StateManifest>,
) -> Result<Vec<String>> {
    let mut walk: Vec<String> = manifest.lifecycle.order.clone();
    if request.verb.is_reverse() {
        walk.reverse();
    }

    let qualify = |name: &str| -> Result<String> {
        manifest
            .component(name)
            .map(|c| c.qualified_name())
            .ok_or_else(|| HubError::UnknownComponent { component: name.to_string() })
    };

    let mut steps = if !request.components.is_empty() {
        let wanted = request.components.iter().map(|c| qualify(c)).collect::<Result<Vec<_>>>()?;
        walk.into_iter().filter(|name| wanted.contains(name)).collect()
    } else if let Some(offset) = &request.offset {
        let offset = qualify(offset)?;
        let start = walk.iter().position(|n| *n == offset).unwrap_or(0);
        walk.split_off(start)
    } else if request.guess {
        let resume = prior
            .and_then(|state| state.first_incomplete(&walk, request.verb.as_str()))
            .map(str::to_string);
        match resume {
            Some(first) => {
                info!("Resuming {} at {}", request.verb, first);
                let start = walk.iter().position(|n| *n == first).unwrap_or(0);
                walk.split_off(start)
            }
            None if prior.is_some() => {
                info!("Every component already completed {}", request.verb);
                Vec::new()
            }
            None => walk,
        }
    } else {
        walk
    };

    if let Some(limit) = &request.limit {
        let limit = qualify(limit)?;
        match steps.iter().position(|n| *n == limit) {
            Some(end) => steps.truncate(end + 1),
            None => {
                return Err(HubError::InvalidConfig {
                    reason: format!("limit '{}' is not part of the selected components", limit),
                })
            }
        }
    }

    debug!("Planned {:?}", steps);
    Ok(steps)
}
