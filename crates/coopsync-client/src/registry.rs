//! Label-keyed registry of entity synchronizers.
//!
//! Each simulation entity kind (doors, platforms, keys...) registers a
//! producer that turns world state into records and a consumer that folds a
//! record back in. The session never branches on entity kinds; it just moves
//! [`SyncBundle`]s between the registry and the wire.
//!
//! ```
//! use coopsync_client::SyncRegistry;
//! use serde_json::json;
//!
//! struct World { doors_open: Vec<bool> }
//!
//! let mut registry = SyncRegistry::<World>::new();
//! registry
//!     .register(
//!         "doors",
//!         |w: &World| w.doors_open.iter().enumerate()
//!             .map(|(id, open)| json!({ "id": id, "open": open }))
//!             .collect(),
//!         |w: &mut World, rec: &serde_json::Value| {
//!             if let (Some(id), Some(open)) = (rec["id"].as_u64(), rec["open"].as_bool()) {
//!                 w.doors_open[id as usize] = open;
//!             }
//!         },
//!     )
//!     .unwrap();
//!
//! let host = World { doors_open: vec![true, false] };
//! let mut mirror = World { doors_open: vec![false, false] };
//! let bundle = registry.collect_outgoing(&host);
//! registry.apply_incoming(&mut mirror, &bundle);
//! assert_eq!(mirror.doors_open, vec![true, false]);
//! ```

use std::collections::BTreeMap;

use coopsync_protocol::SyncBundle;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{trace, warn};

use crate::SyncError;

type Producer<W> = Box<dyn Fn(&W) -> Vec<Value> + Send>;
/// Returns `false` when the record was rejected.
type Consumer<W> = Box<dyn FnMut(&mut W, &Value) -> bool + Send>;

struct SyncEntry<W> {
    produce: Producer<W>,
    consume: Consumer<W>,
}

/// Outcome of one [`SyncRegistry::apply_incoming`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Records handed to a consumer and accepted.
    pub applied: usize,
    /// Records a typed consumer could not decode.
    pub rejected: usize,
    /// Labels present in the bundle with no registration, in bundle order.
    pub unknown_labels: Vec<String>,
}

/// Producers and consumers for every synchronized entity kind over world `W`.
pub struct SyncRegistry<W> {
    entries: BTreeMap<String, SyncEntry<W>>,
}

impl<W> SyncRegistry<W> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers a raw JSON producer/consumer pair under `label`.
    ///
    /// Consumers must be idempotent per entity identifier: the same record
    /// arrives in every snapshot until the host changes it.
    ///
    /// # Errors
    ///
    /// [`SyncError::DuplicateLabel`] if `label` is taken. The existing entry
    /// is kept.
    pub fn register<P, C>(&mut self, label: impl Into<String>, produce: P, mut consume: C) -> Result<(), SyncError>
    where
        P: Fn(&W) -> Vec<Value> + Send + 'static,
        C: FnMut(&mut W, &Value) + Send + 'static,
    {
        self.insert(
            label.into(),
            SyncEntry {
                produce: Box::new(produce),
                consume: Box::new(move |world, record| {
                    consume(world, record);
                    true
                }),
            },
        )
    }

    /// Registers a pair working on a typed record.
    ///
    /// Records that fail to serialize are left out of the outgoing bundle;
    /// incoming records that fail to decode are skipped with a warning and
    /// counted as rejected.
    pub fn register_typed<T, P, C>(
        &mut self,
        label: impl Into<String>,
        produce: P,
        mut consume: C,
    ) -> Result<(), SyncError>
    where
        T: Serialize + DeserializeOwned,
        P: Fn(&W) -> Vec<T> + Send + 'static,
        C: FnMut(&mut W, T) + Send + 'static,
    {
        let label = label.into();
        let produce_label = label.clone();
        let consume_label = label.clone();

        let produce = move |world: &W| {
            produce(world)
                .iter()
                .filter_map(|record| match serde_json::to_value(record) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(label = %produce_label, error = %e, "sync record failed to serialize, skipping");
                        None
                    }
                })
                .collect()
        };
        let consume = move |world: &mut W, record: &Value| match T::deserialize(record) {
            Ok(typed) => {
                consume(world, typed);
                true
            }
            Err(e) => {
                warn!(label = %consume_label, error = %e, "malformed sync record, skipping");
                false
            }
        };

        self.insert(
            label,
            SyncEntry {
                produce: Box::new(produce),
                consume: Box::new(consume),
            },
        )
    }

    /// Runs every producer once. Every registered label is present in the
    /// result, with an empty list if the producer had nothing.
    pub fn collect_outgoing(&self, world: &W) -> SyncBundle {
        self.entries
            .iter()
            .map(|(label, entry)| (label.clone(), (entry.produce)(world)))
            .collect()
    }

    /// Feeds each record of `bundle` to its label's consumer.
    ///
    /// Records within a label are applied in arrival order. Unknown labels
    /// are logged and skipped.
    pub fn apply_incoming(&mut self, world: &mut W, bundle: &SyncBundle) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (label, records) in bundle {
            let Some(entry) = self.entries.get_mut(label) else {
                warn!(%label, records = records.len(), "no synchronizer for label, skipping");
                report.unknown_labels.push(label.clone());
                continue;
            };
            for record in records {
                if (entry.consume)(world, record) {
                    report.applied += 1;
                } else {
                    report.rejected += 1;
                }
            }
        }

        trace!(
            applied = report.applied,
            rejected = report.rejected,
            unknown = report.unknown_labels.len(),
            "sync bundle applied"
        );
        report
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label)
    }

    /// Registered labels in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, label: String, entry: SyncEntry<W>) -> Result<(), SyncError> {
        if self.entries.contains_key(&label) {
            return Err(SyncError::DuplicateLabel(label));
        }
        self.entries.insert(label, entry);
        Ok(())
    }
}

impl<W> Default for SyncRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> std::fmt::Debug for SyncRegistry<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRegistry")
            .field("labels", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
