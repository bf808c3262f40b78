//! Snapshot name resolution.
//!
//! Names have the form `s{date}{letter}-{base}-{device}`. The leading
//! token (`s20240101a`) is the sequence token; the letter advances
//! `a..z` then `A..Z`, giving 52 distinct names per volume per day.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapters::SnapshotQuery;

/// Everything needed to name one volume's snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNameRequest {
    /// `YYYYMMDD`
    pub date: String,
    /// Instance `Name` tag value, or the instance id
    pub base_name: String,
    pub device_name: String,
    pub volume_id: String,
    pub owner_id: String,
}

impl SnapshotNameRequest {
    /// Wildcard matching every name issued for this date
    pub fn query_pattern(&self) -> String {
        format!("s{}*", self.date)
    }

    /// The first name of the day
    pub fn default_name(&self) -> String {
        format!("s{}a-{}-{}", self.date, self.base_name, self.device_name)
    }

    fn token_prefix(&self) -> String {
        format!("s{}", self.date)
    }

    fn key(&self) -> NameKey {
        (
            self.owner_id.clone(),
            self.volume_id.clone(),
            self.date.clone(),
        )
    }
}

/// (owner, volume, date)
type NameKey = (String, String, String);

/// Name resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("snapshot names for volume {volume_id} on {date} are exhausted")]
    Exhausted { volume_id: String, date: String },

    #[error("sequence token '{token}' does not end in a letter")]
    MalformedToken { token: String },
}

/// Date component of snapshot names
pub fn snapshot_date(now: DateTime<Local>) -> String {
    now.format("%Y%m%d").to_string()
}

/// Advance the final character of a sequence token.
///
/// `A..Y` and `a..y` step to the next letter, `Z` wraps to `a` and `z`
/// wraps to `A`. Returns `None` when the token does not end in an ASCII
/// letter.
pub fn increment_token(token: &str) -> Option<String> {
    let mut chars: Vec<char> = token.chars().collect();
    let last = chars.last_mut()?;

    *last = match *last {
        'Z' => 'a',
        'z' => 'A',
        c @ ('A'..='Y' | 'a'..='y') => (c as u8 + 1) as char,
        _ => return None,
    };

    Some(chars.into_iter().collect())
}

/// Position of a suffix letter in issue order (a=0 .. z=25, A=26 .. Z=51)
fn suffix_rank(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a'),
        'A'..='Z' => Some(c as u8 - b'A' + 26),
        _ => None,
    }
}

/// Compute the next free name given the names that already exist.
///
/// Names whose token is not `s{date}` plus one character are ignored;
/// they cannot collide with anything this function produces.
pub fn next_name(
    request: &SnapshotNameRequest,
    existing_names: &[String],
) -> Result<String, NamingError> {
    let prefix = request.token_prefix();

    let tokens: Vec<&str> = existing_names
        .iter()
        .filter_map(|name| name.split('-').next())
        .filter(|token| {
            token
                .strip_prefix(prefix.as_str())
                .map(|suffix| suffix.chars().count() == 1)
                .unwrap_or(false)
        })
        .collect();

    // Letters outrank anything else; a non-letter only wins when it is alone
    let highest = tokens.iter().max_by_key(|token| {
        token
            .chars()
            .last()
            .and_then(suffix_rank)
            .map(|rank| rank as i16)
            .unwrap_or(-1)
    });

    let Some(highest) = highest else {
        return Ok(request.default_name());
    };

    let next = increment_token(highest).ok_or_else(|| NamingError::MalformedToken {
        token: highest.to_string(),
    })?;

    if tokens.contains(&next.as_str()) {
        return Err(NamingError::Exhausted {
            volume_id: request.volume_id.clone(),
            date: request.date.clone(),
        });
    }

    Ok(format!(
        "{}-{}-{}",
        next, request.base_name, request.device_name
    ))
}

/// Resolves snapshot names against the provider.
///
/// The query and the reservation of the result happen under one lock,
/// and every issued name is remembered, so two callers in the same
/// process never receive the same name even before the first snapshot
/// is tagged.
#[derive(Debug, Default)]
pub struct NameResolver {
    issued: Mutex<HashMap<NameKey, Vec<String>>>,
}

impl NameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the next name for a volume.
    ///
    /// Query failures and malformed tokens fall back to the default
    /// `…a…` name. Only an exhausted naming space is returned as an error.
    pub async fn resolve<Q: SnapshotQuery + ?Sized>(
        &self,
        query: &Q,
        request: &SnapshotNameRequest,
    ) -> Result<String, NamingError> {
        let mut issued = self.issued.lock().await;
        let key = request.key();

        // Names from other days can no longer collide
        issued.retain(|(_, _, date), _| *date == request.date);

        let mut existing = match query
            .snapshot_names(
                &request.owner_id,
                &request.volume_id,
                &request.query_pattern(),
            )
            .await
        {
            Ok(names) => names,
            Err(e) => {
                warn!(
                    volume_id = %request.volume_id,
                    error = %e,
                    "Snapshot name query failed, using default name"
                );
                Vec::new()
            }
        };
        if let Some(previous) = issued.get(&key) {
            existing.extend(previous.iter().cloned());
        }

        let name = match next_name(request, &existing) {
            Ok(name) => name,
            Err(NamingError::MalformedToken { token }) => {
                warn!(
                    volume_id = %request.volume_id,
                    %token,
                    "Unrecognised sequence token, using default name"
                );
                request.default_name()
            }
            Err(e) => return Err(e),
        };

        debug!(volume_id = %request.volume_id, %name, "Resolved snapshot name");
        issued.entry(key).or_default().push(name.clone());
        Ok(name)
    }
}
